//! Core types, traits, and configuration for CoverGAN.
//!
//! This crate provides the foundational abstractions shared by the model,
//! data, and trainer crates:
//!
//! - Configuration types for the architecture, the progressive schedule and the dataset
//! - The training phase enum driven by the progressive state machine
//! - Callback and metric sink traits
//! - Error handling infrastructure

#![warn(missing_docs)]

mod config;
mod error;
mod phase;
mod traits;

pub use config::*;
pub use error::*;
pub use phase::*;
pub use traits::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{CoverGanError, Result};
    pub use crate::phase::*;
    pub use crate::traits::*;
}
