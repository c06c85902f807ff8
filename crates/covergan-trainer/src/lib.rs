//! Progressive training for CoverGAN.
//!
//! This crate provides:
//! - The burn-in/fade-in state machine driving both networks through one shared plan
//! - Wasserstein losses with gradient penalty and the `n_critic` update protocol
//! - Atomic checkpoints with exact schedule resumption
//! - Training callbacks, metric sinks and generated image strips

#![warn(missing_docs)]

pub mod callbacks;
pub mod checkpoint;
pub mod error;
pub mod history;
pub mod loss;
pub mod progressive;
pub mod sink;

pub use callbacks::*;
pub use checkpoint::*;
pub use error::{Result, TrainError};
pub use history::*;
pub use loss::*;
pub use progressive::*;
pub use sink::*;
