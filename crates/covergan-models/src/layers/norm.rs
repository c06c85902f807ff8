//! Normalization layers.

use mlx_rs::{error::Exception, Array};

const PIXEL_NORM_EPS: f32 = 1e-8;
const INSTANCE_NORM_EPS: f32 = 1e-5;
const STDDEV_EPS: f32 = 1e-8;

/// Pixelwise feature normalization.
///
/// Divides every spatial position's channel vector by its RMS magnitude.
/// Works on [batch, channels, ...] and on [batch, features] latents.
pub fn pixel_norm(x: &Array) -> Result<Array, Exception> {
    let mean_sq = x.square()?.mean_axis(1, Some(true))?;
    let rms = mean_sq.add(&Array::from_f32(PIXEL_NORM_EPS))?.sqrt()?;
    x.divide(&rms)
}

/// Per-sample, per-channel normalization over the spatial axes (no affine).
pub fn instance_norm(x: &Array) -> Result<Array, Exception> {
    let mean = x.mean_axes(&[2, 3], Some(true))?;
    let centered = x.subtract(&mean)?;
    let var = centered.square()?.mean_axes(&[2, 3], Some(true))?;
    let std = var.add(&Array::from_f32(INSTANCE_NORM_EPS))?.sqrt()?;
    centered.divide(&std)
}

/// Minibatch standard deviation.
///
/// Splits the batch into groups, computes the per-position standard deviation
/// of the features inside each group, averages it into `num_new_features`
/// scalars and appends them as constant feature maps.
#[derive(Debug, Clone, Copy)]
pub struct MinibatchStdDev {
    /// Maximum number of samples per group.
    pub group_size: i32,
    /// Number of appended feature maps.
    pub num_new_features: i32,
}

impl Default for MinibatchStdDev {
    fn default() -> Self {
        Self {
            group_size: 4,
            num_new_features: 1,
        }
    }
}

impl MinibatchStdDev {
    /// Create a new layer.
    pub fn new(group_size: i32, num_new_features: i32) -> Self {
        Self {
            group_size,
            num_new_features,
        }
    }

    /// Group size used for a batch of `batch` samples.
    ///
    /// Batches that are not a multiple of the group size collapse into a
    /// single group.
    pub fn effective_group_size(&self, batch: i32) -> i32 {
        let group = self.group_size.min(batch).max(1);
        if batch % group == 0 {
            group
        } else {
            batch
        }
    }

    /// Forward pass on [batch, channels, height, width].
    ///
    /// Returns [batch, channels + num_new_features, height, width].
    pub fn forward(&self, x: &Array) -> Result<Array, Exception> {
        let (b, c, h, w) = (x.dim(0), x.dim(1), x.dim(2), x.dim(3));
        let group = self.effective_group_size(b);
        let features = self.num_new_features;
        let members = b / group;

        // [G, M, F, C/F, H, W]: sample g * M + m sits in group m.
        let y = x.reshape(&[group, members, features, c / features, h, w])?;
        let y = y.subtract(&y.mean_axis(0, Some(true))?)?;
        let y = y.square()?.mean_axis(0, Some(true))?;
        let y = y.add(&Array::from_f32(STDDEV_EPS))?.sqrt()?;
        let y = y.mean_axes(&[3, 4, 5], Some(false))?;

        let y = y.reshape(&[1, members, features, 1, 1])?;
        let y = mlx_rs::ops::broadcast_to(&y, &[group, members, features, h, w])?;
        let y = y.reshape(&[b, features, h, w])?;

        mlx_rs::ops::concatenate_axis(&[x, &y], 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlx_rs::ops::indexing::IndexOp;

    #[test]
    fn test_pixel_norm_unit_rms() {
        let x = mlx_rs::random::normal::<f32>(&[2, 8, 4, 4], None, None, None).unwrap();
        let y = pixel_norm(&x).unwrap();
        let rms = y.square().unwrap().mean_axis(1, None).unwrap();
        let mean = rms.mean(None).unwrap().item::<f32>();
        assert!((mean - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_instance_norm_statistics() {
        let x = mlx_rs::random::normal::<f32>(&[2, 3, 8, 8], Some(3.0), Some(2.0), None).unwrap();
        let y = instance_norm(&x).unwrap();
        let mean = y.mean_axes(&[2, 3], None).unwrap().abs().unwrap().max(None).unwrap();
        assert!(mean.item::<f32>() < 1e-4);
    }

    #[test]
    fn test_channel_count() {
        let layer = MinibatchStdDev::new(4, 2);
        let x = mlx_rs::random::normal::<f32>(&[8, 6, 4, 4], None, None, None).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[8, 8, 4, 4]);
    }

    #[test]
    fn test_small_batch_collapses_group() {
        let layer = MinibatchStdDev::default();
        assert_eq!(layer.effective_group_size(2), 2);
        assert_eq!(layer.effective_group_size(6), 6);
        assert_eq!(layer.effective_group_size(8), 4);

        let x = mlx_rs::random::normal::<f32>(&[3, 4, 2, 2], None, None, None).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[3, 5, 2, 2]);

        // A single group: every sample receives the same statistic.
        let stat = y.index((.., 4..5, .., ..));
        let first = stat.index((0..1, .., .., ..));
        let diff = stat.subtract(&first).unwrap().abs().unwrap().max(None).unwrap();
        assert!(diff.item::<f32>() < 1e-7);
    }

    #[test]
    fn test_permutation_invariance() {
        let layer = MinibatchStdDev::default();
        let data: Vec<f32> = (0..4 * 3 * 2 * 2).map(|i| ((i * 7) % 11) as f32).collect();
        let x = Array::from_slice(&data, &[4, 3, 2, 2]);

        let sample = 3 * 2 * 2;
        let mut shuffled = Vec::with_capacity(data.len());
        for &i in &[2usize, 0, 3, 1] {
            shuffled.extend_from_slice(&data[i * sample..(i + 1) * sample]);
        }
        let permuted = Array::from_slice(&shuffled, &[4, 3, 2, 2]);

        let y = layer.forward(&x).unwrap().index((.., 3..4, .., ..));
        let y_perm = layer.forward(&permuted).unwrap().index((.., 3..4, .., ..));
        let diff = y.subtract(&y_perm).unwrap().abs().unwrap().max(None).unwrap();
        assert!(diff.item::<f32>() < 1e-6);
    }

    #[test]
    fn test_known_stddev() {
        // Two samples valued 0 and 2 everywhere: std 1 at every position.
        let layer = MinibatchStdDev::new(2, 1);
        let mut data = vec![0.0_f32; 4];
        data.extend(vec![2.0_f32; 4]);
        let x = Array::from_slice(&data, &[2, 1, 2, 2]);
        let y = layer.forward(&x).unwrap().index((.., 1..2, .., ..));
        let mean = y.mean(None).unwrap().item::<f32>();
        assert!((mean - 1.0).abs() < 1e-4);
    }
}
