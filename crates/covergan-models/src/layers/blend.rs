//! Fade-in blending.

use std::cell::Cell;
use std::rc::Rc;

use mlx_rs::{error::Exception, Array};

/// Blend factor shared by every [`WeightedSum`] of one fade-in phase.
///
/// Cloning shares the cell. Only the training state machine writes it.
#[derive(Debug, Clone, Default)]
pub struct SharedAlpha(Rc<Cell<f32>>);

impl SharedAlpha {
    /// Create a new cell, clamped to [0, 1].
    pub fn new(alpha: f32) -> Self {
        Self(Rc::new(Cell::new(alpha.clamp(0.0, 1.0))))
    }

    /// Current value.
    pub fn get(&self) -> f32 {
        self.0.get()
    }

    /// Overwrite the value, clamped to [0, 1].
    pub fn set(&self, alpha: f32) {
        self.0.set(alpha.clamp(0.0, 1.0));
    }

    /// Whether both handles point at the same cell.
    pub fn shares_with(&self, other: &SharedAlpha) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// `alpha * new + (1 - alpha) * old` with an externally owned alpha.
#[derive(Debug, Clone)]
pub struct WeightedSum {
    /// Blend factor.
    pub alpha: SharedAlpha,
}

impl WeightedSum {
    /// Create a weighted sum reading `alpha`.
    pub fn new(alpha: SharedAlpha) -> Self {
        Self { alpha }
    }

    /// Blend the old-resolution residual with the new path.
    pub fn forward(&self, old: &Array, new: &Array) -> Result<Array, Exception> {
        let alpha = self.alpha.get();
        let new = new.multiply(&Array::from_f32(alpha))?;
        let old = old.multiply(&Array::from_f32(1.0 - alpha))?;
        new.add(&old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_abs_diff(a: &Array, b: &Array) -> f32 {
        a.subtract(b).unwrap().abs().unwrap().max(None).unwrap().item::<f32>()
    }

    #[test]
    fn test_endpoints() {
        let old = mlx_rs::random::normal::<f32>(&[2, 3, 4, 4], None, None, None).unwrap();
        let new = mlx_rs::random::normal::<f32>(&[2, 3, 4, 4], None, None, None).unwrap();
        let alpha = SharedAlpha::new(0.0);
        let sum = WeightedSum::new(alpha.clone());

        assert!(max_abs_diff(&sum.forward(&old, &new).unwrap(), &old) < 1e-7);
        alpha.set(1.0);
        assert!(max_abs_diff(&sum.forward(&old, &new).unwrap(), &new) < 1e-7);
    }

    #[test]
    fn test_midpoint() {
        let old = Array::from_slice(&[0.0_f32, 2.0], &[2]);
        let new = Array::from_slice(&[4.0_f32, 2.0], &[2]);
        let sum = WeightedSum::new(SharedAlpha::new(0.25));
        let values: Vec<f32> = sum.forward(&old, &new).unwrap().as_slice::<f32>().to_vec();
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_shared_cell() {
        let alpha = SharedAlpha::new(0.0);
        let generator_side = WeightedSum::new(alpha.clone());
        let critic_side = WeightedSum::new(alpha.clone());
        alpha.set(0.6);
        assert_eq!(generator_side.alpha.get(), 0.6);
        assert_eq!(critic_side.alpha.get(), 0.6);
        assert!(generator_side.alpha.shares_with(&critic_side.alpha));

        alpha.set(3.0);
        assert_eq!(critic_side.alpha.get(), 1.0);
    }
}
