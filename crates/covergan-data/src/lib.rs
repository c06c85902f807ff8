//! Dataset handling for CoverGAN.
//!
//! This crate provides:
//! - Album metadata records read from JSON lines
//! - Release-year standardization for conditional training
//! - Image decoding and dynamic-range adjustment
//! - Preloaded and streaming datasets behind [`CoverSource`]
//! - A wrap-around batch loader that reshuffles on every pass

#![warn(missing_docs)]

pub mod dataset;
pub mod error;
pub mod loader;
pub mod record;
pub mod scaler;
pub mod transform;

pub use dataset::*;
pub use error::{DataError, Result};
pub use loader::*;
pub use record::*;
pub use scaler::*;
pub use transform::*;
