//! LIBSVM-format reader.
//!
//! Labeled lines look like `+1 1:5 7:2 15:6`; unlabeled files drop the
//! label field. Feature indices start at 1 and increase strictly within
//! a line.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::{ParseError, RawDataset};

/// Reads a labeled dataset from `path`.
pub fn read_labeled(path: impl AsRef<Path>) -> Result<RawDataset, ParseError> {
    parse(BufReader::new(File::open(path)?), true)
}

/// Reads an unlabeled dataset from `path`.
pub fn read_unlabeled(path: impl AsRef<Path>) -> Result<RawDataset, ParseError> {
    parse(BufReader::new(File::open(path)?), false)
}

/// Parses LIBSVM text from any reader.
pub fn parse(reader: impl Read, labeled: bool) -> Result<RawDataset, ParseError> {
    let reader = BufReader::new(reader);
    let mut labels = Vec::new();
    let mut rows = Vec::new();

    for (k, line) in reader.lines().enumerate() {
        let line = line?;
        let number = k + 1;
        let mut tokens = line.split_ascii_whitespace().peekable();

        if labeled {
            let token = tokens.next().ok_or(ParseError::MissingLabel { line: number })?;
            let label: f64 = token.parse().map_err(|_| ParseError::BadLabel {
                line: number,
                text: token.to_string(),
            })?;
            labels.push(label);
        } else if tokens.peek().is_none() {
            continue;
        }

        let mut row = Vec::new();
        let mut prev = 0;
        for token in tokens {
            let (index, value) = token.split_once(':').ok_or_else(|| ParseError::BadFeature {
                line: number,
                text: token.to_string(),
            })?;
            let index: i32 = index.parse().map_err(|_| ParseError::BadFeature {
                line: number,
                text: token.to_string(),
            })?;
            let value: f64 = value.parse().map_err(|_| ParseError::BadFeature {
                line: number,
                text: token.to_string(),
            })?;
            if index <= prev {
                return Err(ParseError::NonMonotonicIndex { line: number });
            }
            prev = index;
            row.push((index, value));
        }
        rows.push(row);
    }

    Ok(RawDataset {
        labels: labeled.then_some(labels),
        rows,
    })
}
