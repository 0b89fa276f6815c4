use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::rhd::IntanError;

/// Errors raised while locating, reading, assembling or writing a conversion.
///
/// Every error is fatal for the conversion that raised it. Nothing is skipped,
/// since a dropped trial or frame shifts every index that follows it.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// A text or structured source file could not be understood
    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    /// A binary buffer does not have the expected layout
    #[error("decode error: {0}")]
    Decode(String),

    /// The metadata or conversion configuration is missing something a reader needs
    #[error("configuration error: {0}")]
    Config(String),

    /// Two sources disagree about a value that must be shared
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A file referenced by a header, a trial list or the command line does not exist
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Intan file error: {0}")]
    Intan(#[from] IntanError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("array write error: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),

    #[error("array read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl ConvertError {
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::Parse {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Returns `FileNotFound` for a missing path instead of letting the open call
/// report a bare IO error.
pub(crate) fn require_file(path: &std::path::Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConvertError::FileNotFound(path.to_path_buf()))
    }
}

pub(crate) fn require_dir(path: &std::path::Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConvertError::FileNotFound(path.to_path_buf()))
    }
}
