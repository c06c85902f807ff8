//! Error types for the data crate.

use std::path::PathBuf;

use covergan_core::CoverGanError;
use thiserror::Error;

/// Result type for data operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Error type for data operations.
#[derive(Error, Debug)]
pub enum DataError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed metadata line.
    #[error("Failed to parse line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Parser message.
        message: String,
    },

    /// Image could not be decoded.
    #[error("Failed to decode image {path:?}: {message}")]
    Image {
        /// Image path.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// No usable records.
    #[error("Empty dataset: {0}")]
    Empty(String),

    /// Invalid loader or dataset settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Preloading exceeds the memory budget or the allocation failed.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// MLX error.
    #[error("MLX error: {0}")]
    Mlx(#[from] mlx_rs::error::Exception),
}

impl From<DataError> for CoverGanError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::Io(e) => Self::Io(e),
            DataError::Config(msg) => Self::Config(msg),
            DataError::ResourceExhausted(msg) => Self::ResourceExhausted(msg),
            DataError::Mlx(e) => Self::Mlx(e.to_string()),
            other => Self::Data(other.to_string()),
        }
    }
}
