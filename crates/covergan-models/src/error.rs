//! Error types for the model crate.

use covergan_core::CoverGanError;
use mlx_rs::error::Exception;
use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error type for model operations.
#[derive(Error, Debug)]
pub enum ModelError {
    /// MLX operation error.
    #[error("MLX error: {0}")]
    Mlx(#[from] Exception),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested growth block does not exist.
    #[error("Invalid block {requested}: topology only has blocks 0..={max}")]
    InvalidBlock {
        /// Requested block index.
        requested: usize,
        /// Largest block index.
        max: usize,
    },

    /// Shape mismatch error.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<i32>,
        /// Actual shape.
        actual: Vec<i32>,
    },
}

impl From<CoverGanError> for ModelError {
    fn from(e: CoverGanError) -> Self {
        match e {
            CoverGanError::InvalidBlock { requested, max } => Self::InvalidBlock { requested, max },
            CoverGanError::ShapeMismatch { expected, actual } => {
                Self::ShapeMismatch { expected, actual }
            }
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<ModelError> for CoverGanError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Mlx(e) => Self::Mlx(e.to_string()),
            ModelError::Config(msg) => Self::Config(msg),
            ModelError::InvalidBlock { requested, max } => Self::InvalidBlock { requested, max },
            ModelError::ShapeMismatch { expected, actual } => {
                Self::ShapeMismatch { expected, actual }
            }
        }
    }
}
