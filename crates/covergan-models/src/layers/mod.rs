//! Building blocks of the progressive networks.

mod blend;
mod noise;
mod norm;
mod resample;
mod scaled;
mod style;

pub use blend::{SharedAlpha, WeightedSum};
pub use noise::NoiseInjection;
pub use norm::{instance_norm, pixel_norm, MinibatchStdDev};
pub use resample::{avg_pool, upsample_nearest};
pub use scaled::{he_scale, ScaledConv2d, ScaledDense, DEFAULT_GAIN};
pub use style::{SharedLatent, StyleModulation, Truncation};

use mlx_rs::{error::Exception, Array};

/// Leaky ReLU slope used throughout both networks.
pub const LEAKY_SLOPE: f32 = 0.2;

/// Leaky ReLU with the network-wide slope.
pub fn lrelu(x: &Array) -> Result<Array, Exception> {
    mlx_rs::nn::leaky_relu(x, LEAKY_SLOPE)
}
