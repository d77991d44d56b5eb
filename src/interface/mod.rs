//! Adapters between the raw file formats and the training structures.

use std::path::Path;

use derive_more::{Display, Error, From};

use crate::E;
use crate::dataset::Dataset;
use loaders::RawDataset;

pub mod model_file;

/// Errors produced while loading external inputs.
#[derive(Debug, Display, Error, From)]
pub enum InputError {
    #[display("i/o failure: {_0}")]
    Io(std::io::Error),

    #[display("{_0}")]
    Parse(loaders::ParseError),

    #[display("dataset has no labels")]
    MissingLabels,

    #[display("malformed model file")]
    BadModelFile,
}

/// Supported dataset file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Dense rows, configurable delimiter.
    Csv,
    /// Sparse `index:value` rows.
    Libsvm,
}

/// Turns a labeled raw dataset into a training [`Dataset`]: squared
/// norms, the sparse flag and the two class-average samples are computed
/// here.
pub fn labeled_dataset(raw: &RawDataset) -> Result<Dataset, InputError> {
    let labels = raw.labels.as_ref().ok_or(InputError::MissingLabels)?;
    let rows: Vec<(E, Vec<(i32, E)>)> = labels
        .iter()
        .zip(&raw.rows)
        .map(|(label, row)| (*label, row.clone()))
        .collect();
    Ok(Dataset::labeled(&rows))
}

/// Turns a raw dataset into an unlabeled [`Dataset`] (prediction input).
pub fn unlabeled_dataset(raw: &RawDataset) -> Dataset {
    Dataset::unlabeled(&raw.rows)
}

/// Reads a labeled dataset file in the given format.
pub fn load_labeled(
    path: impl AsRef<Path>,
    format: FileFormat,
    delimiter: u8,
) -> Result<Dataset, InputError> {
    let raw = match format {
        FileFormat::Libsvm => loaders::libsvm::read_labeled(path)?,
        FileFormat::Csv => loaders::csv::read_labeled(path, delimiter)?,
    };
    labeled_dataset(&raw)
}

/// Reads a dataset file for prediction; labels are kept when present.
pub fn load_for_prediction(
    path: impl AsRef<Path>,
    format: FileFormat,
    delimiter: u8,
    labeled: bool,
) -> Result<Dataset, InputError> {
    if labeled {
        load_labeled(path, format, delimiter)
    } else {
        let raw = match format {
            FileFormat::Libsvm => loaders::libsvm::read_unlabeled(path)?,
            FileFormat::Csv => loaders::csv::read_unlabeled(path, delimiter)?,
        };
        Ok(unlabeled_dataset(&raw))
    }
}
