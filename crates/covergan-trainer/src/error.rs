//! Error types for the trainer crate.

use covergan_core::CoverGanError;
use covergan_data::DataError;
use covergan_models::ModelError;
use mlx_rs::error::Exception;
use thiserror::Error;

/// Result type for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Error type for training operations.
#[derive(Error, Debug)]
pub enum TrainError {
    /// MLX operation error.
    #[error("MLX error: {0}")]
    Mlx(#[from] Exception),

    /// Network error.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Dataset or loader error.
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid training configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint could not be written or read.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Training error.
    #[error("Training error: {0}")]
    Training(String),
}

impl From<CoverGanError> for TrainError {
    fn from(e: CoverGanError) -> Self {
        match e {
            CoverGanError::Io(e) => Self::Io(e),
            CoverGanError::Config(msg) => Self::Config(msg),
            CoverGanError::InvalidBlock { requested, max } => {
                Self::Model(ModelError::InvalidBlock { requested, max })
            }
            other => Self::Training(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TrainError {
    fn from(e: serde_json::Error) -> Self {
        Self::Checkpoint(e.to_string())
    }
}

impl From<TrainError> for CoverGanError {
    fn from(e: TrainError) -> Self {
        match e {
            TrainError::Io(e) => Self::Io(e),
            TrainError::Model(e) => e.into(),
            TrainError::Data(e) => e.into(),
            TrainError::Config(msg) => Self::Config(msg),
            TrainError::Mlx(e) => Self::Mlx(e.to_string()),
            other => Self::Training(other.to_string()),
        }
    }
}
