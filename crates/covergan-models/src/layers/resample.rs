//! Spatial resampling on NCHW tensors.

use mlx_rs::{error::Exception, Array};

/// Nearest-neighbour upsampling by an integer factor.
pub fn upsample_nearest(x: &Array, factor: i32) -> Result<Array, Exception> {
    if factor == 1 {
        return Ok(x.clone());
    }
    let (n, c, h, w) = (x.dim(0), x.dim(1), x.dim(2), x.dim(3));
    let y = x.reshape(&[n, c, h, 1, w, 1])?;
    let y = mlx_rs::ops::broadcast_to(&y, &[n, c, h, factor, w, factor])?;
    y.reshape(&[n, c, h * factor, w * factor])
}

/// Average pooling with window and stride `factor`.
pub fn avg_pool(x: &Array, factor: i32) -> Result<Array, Exception> {
    if factor == 1 {
        return Ok(x.clone());
    }
    let (n, c, h, w) = (x.dim(0), x.dim(1), x.dim(2), x.dim(3));
    let y = x.reshape(&[n, c, h / factor, factor, w / factor, factor])?;
    y.mean_axes(&[3, 5], None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsample_repeats_pixels() {
        let x = Array::from_slice(&[1.0_f32, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let y = upsample_nearest(&x, 2).unwrap();
        assert_eq!(y.shape(), &[1, 1, 4, 4]);
        let values: Vec<f32> = y.as_slice::<f32>().to_vec();
        assert_eq!(&values[..4], &[1.0, 1.0, 2.0, 2.0]);
        assert_eq!(&values[12..], &[3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_avg_pool_inverts_upsample() {
        let x = mlx_rs::random::normal::<f32>(&[2, 3, 4, 4], None, None, None).unwrap();
        let y = avg_pool(&upsample_nearest(&x, 4).unwrap(), 4).unwrap();
        let diff = y.subtract(&x).unwrap().abs().unwrap().max(None).unwrap();
        assert!(diff.item::<f32>() < 1e-6);
    }

    #[test]
    fn test_avg_pool_values() {
        let x = Array::from_slice(&[1.0_f32, 3.0, 5.0, 7.0], &[1, 1, 2, 2]);
        let y = avg_pool(&x, 2).unwrap();
        assert_eq!(y.shape(), &[1, 1, 1, 1]);
        assert!((y.item::<f32>() - 4.0).abs() < 1e-6);
    }
}
