//! Standardization of the release year.

use serde::{Deserialize, Serialize};

/// Zero-mean, unit-variance scaling fitted on a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Sample mean.
    pub mean: f32,
    /// Population standard deviation, 1.0 when the sample is constant.
    pub scale: f32,
}

impl Default for StandardScaler {
    fn default() -> Self {
        Self {
            mean: 0.0,
            scale: 1.0,
        }
    }
}

impl StandardScaler {
    /// Fit on `values`. An empty sample yields the identity scaler.
    pub fn fit(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        Self {
            mean: mean as f32,
            scale: if std > 0.0 { std as f32 } else { 1.0 },
        }
    }

    /// Standardize one value.
    pub fn transform(&self, value: f32) -> f32 {
        (value - self.mean) / self.scale
    }

    /// Undo [`StandardScaler::transform`].
    pub fn inverse_transform(&self, value: f32) -> f32 {
        value * self.scale + self.mean
    }
}
