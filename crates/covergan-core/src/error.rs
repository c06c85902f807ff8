//! Error types for CoverGAN.

use thiserror::Error;

/// Result type alias for CoverGAN operations.
pub type Result<T> = std::result::Result<T, CoverGanError>;

/// Main error type for CoverGAN operations.
#[derive(Error, Debug)]
pub enum CoverGanError {
    /// Configuration errors. Always raised before any compute starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested growth block does not exist in the topology.
    #[error("Invalid block {requested}: topology only has blocks 0..={max}")]
    InvalidBlock {
        /// Requested block index.
        requested: usize,
        /// Largest block index of the topology.
        max: usize,
    },

    /// Tensor shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<i32>,
        /// Actual shape.
        actual: Vec<i32>,
    },

    /// Dataset errors.
    #[error("Data error: {0}")]
    Data(String),

    /// The dataset does not fit the preload budget.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Training errors.
    #[error("Training error: {0}")]
    Training(String),

    /// MLX backend errors.
    #[error("MLX error: {0}")]
    Mlx(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoverGanError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for CoverGanError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
