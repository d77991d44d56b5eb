//! CSV-format reader with a configurable delimiter.
//!
//! Every record is a dense row of feature values; when labeled, the
//! first column carries the label. Column `k` (after the optional label)
//! becomes feature index `k`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::{ParseError, RawDataset};

/// Reads a labeled CSV dataset from `path`.
pub fn read_labeled(path: impl AsRef<Path>, delimiter: u8) -> Result<RawDataset, ParseError> {
    parse(File::open(path)?, delimiter, true)
}

/// Reads an unlabeled CSV dataset from `path`.
pub fn read_unlabeled(path: impl AsRef<Path>, delimiter: u8) -> Result<RawDataset, ParseError> {
    parse(File::open(path)?, delimiter, false)
}

/// Parses CSV text from any reader.
pub fn parse(reader: impl Read, delimiter: u8, labeled: bool) -> Result<RawDataset, ParseError> {
    let mut csv_reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut labels = Vec::new();
    let mut rows = Vec::new();

    for (k, record) in csv_reader.records().enumerate() {
        let record = record?;
        let number = k + 1;
        let mut fields = record.iter();

        if labeled {
            let token = fields.next().filter(|t| !t.is_empty()).ok_or(
                ParseError::MissingLabel { line: number },
            )?;
            let label: f64 = token.parse().map_err(|_| ParseError::BadLabel {
                line: number,
                text: token.to_string(),
            })?;
            labels.push(label);
        }

        let mut row = Vec::new();
        for (column, token) in fields.enumerate() {
            let value: f64 = token.trim().parse().map_err(|_| ParseError::BadFeature {
                line: number,
                text: token.to_string(),
            })?;
            row.push((column as i32 + 1, value));
        }
        rows.push(row);
    }

    Ok(RawDataset {
        labels: labeled.then_some(labels),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_labeled_records() {
        let text = "1,0.5,2.0\n-1,1.5,0.0\n";
        let raw = parse(text.as_bytes(), b',', true).unwrap();
        assert_eq!(raw.labels, Some(vec![1.0, -1.0]));
        assert_eq!(raw.rows[0], vec![(1, 0.5), (2, 2.0)]);
        assert_eq!(raw.rows[1], vec![(1, 1.5), (2, 0.0)]);
    }

    #[rstest]
    fn honors_the_configured_delimiter(#[values(b';', b'\t', b'|')] delimiter: u8) {
        let text: String = "1S0.5S2.0\n".replace('S', &(delimiter as char).to_string());
        let raw = parse(text.as_bytes(), delimiter, true).unwrap();
        assert_eq!(raw.rows[0], vec![(1, 0.5), (2, 2.0)]);
    }

    #[test]
    fn unlabeled_records_use_every_column() {
        let text = "0.5,2.0\n";
        let raw = parse(text.as_bytes(), b',', false).unwrap();
        assert_eq!(raw.labels, None);
        assert_eq!(raw.rows[0], vec![(1, 0.5), (2, 2.0)]);
    }

    #[test]
    fn rejects_malformed_values() {
        let text = "1,abc\n";
        assert!(matches!(
            parse(text.as_bytes(), b',', true),
            Err(ParseError::BadFeature { line: 1, .. })
        ));
    }
}
