//! Style modulation and the truncation trick.

use std::cell::RefCell;
use std::rc::Rc;

use mlx_rs::{
    error::Exception, macros::ModuleParameters, module::Param, ops::indexing::IndexOp, Array,
};

use super::ScaledDense;

/// Adaptive instance normalization style input.
///
/// Projects the style vector to a per-channel (scale, bias) pair and applies
/// `x * (scale + 1) + bias`.
#[derive(Debug, ModuleParameters)]
pub struct StyleModulation {
    /// Style projection, gain 1.
    #[param]
    pub dense: ScaledDense,
    /// Channels of the modulated feature map.
    pub channels: i32,
}

impl StyleModulation {
    /// Create a new modulation layer.
    pub fn new(latent_size: i32, channels: i32) -> Result<Self, Exception> {
        Ok(Self {
            dense: ScaledDense::new(latent_size, channels * 2, Some(1.0), true, 1.0)?,
            channels,
        })
    }

    /// Modulate `x` [batch, channels, h, w] with `w` [batch, latent].
    pub fn forward(&self, x: &Array, w: &Array) -> Result<Array, Exception> {
        let style = self.dense.forward(w)?;
        let style = style.reshape(&[-1, 2, self.channels, 1, 1])?;
        let scale = style.index((.., 0));
        let bias = style.index((.., 1));

        let scale = scale.add(&Array::from_f32(1.0))?;
        x.multiply(&scale)?.add(&bias)
    }
}

/// Running average of the mapping output.
///
/// Cloning shares the buffer. The training loop is the only writer.
#[derive(Debug, Clone)]
pub struct SharedLatent(Rc<RefCell<Array>>);

impl SharedLatent {
    /// Zero-initialized average of `latent_size` components.
    pub fn zeros(latent_size: i32) -> Result<Self, Exception> {
        Ok(Self(Rc::new(RefCell::new(mlx_rs::ops::zeros::<f32>(&[
            latent_size,
        ])?))))
    }

    /// Current average.
    pub fn get(&self) -> Array {
        self.0.borrow().clone()
    }

    /// Replace the average.
    pub fn set(&self, value: Array) {
        *self.0.borrow_mut() = value;
    }
}

/// Truncation trick.
#[derive(Debug, Clone)]
pub struct Truncation {
    /// Moving average of the mapping output.
    pub avg_latent: SharedLatent,
    /// Interpolation factor: 0 collapses to the average, 1 is a no-op.
    pub threshold: f32,
    /// Moving-average decay.
    pub beta: f32,
    /// Style layers at or above this index are left untouched.
    pub max_layer: usize,
}

impl Truncation {
    /// Create a truncation layer with a zero average.
    pub fn new(latent_size: i32, threshold: f32, beta: f32, max_layer: usize) -> Result<Self, Exception> {
        Ok(Self {
            avg_latent: SharedLatent::zeros(latent_size)?,
            threshold,
            beta,
            max_layer,
        })
    }

    /// `avg = beta * avg + (1 - beta) * latent`.
    pub fn update(&self, latent: &Array) -> Result<(), Exception> {
        let latent = mlx_rs::stop_gradient(latent)?;
        let avg = self.avg_latent.get();
        let updated = avg
            .multiply(&Array::from_f32(self.beta))?
            .add(&latent.multiply(&Array::from_f32(1.0 - self.beta))?)?;
        updated.eval()?;
        self.avg_latent.set(updated);
        Ok(())
    }

    /// Pull the first `max_layer` style vectors of `w` [batch, layers, latent]
    /// towards the average.
    pub fn forward(&self, w: &Array) -> Result<Array, Exception> {
        let layers = w.dim(1);
        let avg = self.avg_latent.get();
        let interpolated = avg.add(&w.subtract(&avg)?.multiply(&Array::from_f32(self.threshold))?)?;

        let mask: Vec<f32> = (0..layers as usize)
            .map(|i| if i < self.max_layer { 1.0 } else { 0.0 })
            .collect();
        let mask = Array::from_slice(&mask, &[1, layers, 1]);
        let keep = Array::from_f32(1.0).subtract(&mask)?;

        interpolated.multiply(&mask)?.add(&w.multiply(&keep)?)
    }
}
