//! Progressive networks for CoverGAN.
//!
//! This crate provides:
//! - Equalized learning rate layers and the normalization, noise and style layers
//! - The block [`Topology`] and the [`StackPlan`] descriptor interpreted by both networks
//! - Progressive GAN and style-based generators behind [`ProgressiveGenerator`]
//! - The progressive discriminator
//!
//! Every block of both networks is allocated up front. Growing the network
//! means switching to a plan with a higher block and activating its parameters.

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod error;
pub mod generator;
pub mod layers;
pub mod progan;
pub mod stylegan;
pub mod topology;

pub use error::{ModelError, Result};
pub use generator::{AnyGenerator, ProgressiveGenerator};
pub use layers::{SharedAlpha, WeightedSum};
pub use progan::{ProGanDiscriminator, ProGanGenerator};
pub use stylegan::StyleGanGenerator;
pub use topology::{BlockSpec, FadeIn, PlanLayer, StackPlan, Topology};
