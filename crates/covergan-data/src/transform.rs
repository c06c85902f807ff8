//! Pixel conversions.

use std::path::Path;

use image::imageops::FilterType;
use mlx_rs::Array;

use crate::error::{DataError, Result};

/// Linearly map `values` from `input` to `output` range, clamping to `output`.
pub fn adjust_dynamic_range(values: &mut [f32], input: (f32, f32), output: (f32, f32)) {
    let (lo, hi) = output;
    if input != output {
        let scale = (hi - lo) / (input.1 - input.0);
        let bias = lo - input.0 * scale;
        for v in values.iter_mut() {
            *v = *v * scale + bias;
        }
    }
    for v in values.iter_mut() {
        *v = v.clamp(lo, hi);
    }
}

/// Decode an image file into planar CHW RGB values in [0, 255], resized to
/// `size` x `size`.
pub fn decode_image(path: &Path, size: u32) -> Result<Vec<f32>> {
    let img = image::open(path).map_err(|e| DataError::Image {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let rgb = if img.width() == size && img.height() == size {
        img.to_rgb8()
    } else {
        img.resize_exact(size, size, FilterType::Triangle).to_rgb8()
    };

    let num_pixels = (size * size) as usize;
    let pixels = rgb.as_raw();
    let mut data = Vec::with_capacity(3 * num_pixels);
    for c in 0..3 {
        data.extend((0..num_pixels).map(|i| pixels[i * 3 + c] as f32));
    }
    Ok(data)
}

/// Copy `array` to the host as `f32` values in row-major order.
///
/// Transposes and broadcasts share their source buffer, so the buffer is read
/// through the array's strides rather than in storage order.
pub fn to_row_major(array: &Array) -> Result<Vec<f32>> {
    let mut array = array.as_type::<f32>()?;
    array.eval()?;
    if array.size() == 0 {
        return Ok(Vec::new());
    }
    if !is_dense(array.shape(), array.strides()) {
        // Elementwise ops over non-contiguous input allocate a row-major result.
        array = array.multiply(&Array::from_f32(1.0))?;
        array.eval()?;
    }

    let shape: Vec<usize> = array.shape().iter().map(|&d| d as usize).collect();
    let strides = array.strides().to_vec();
    let data = array
        .try_as_slice::<f32>()
        .map_err(|e| DataError::Config(format!("cannot read array: {}", e)))?;
    if is_row_major(&shape, &strides) {
        return Ok(data.to_vec());
    }
    if !is_dense(array.shape(), &strides) {
        return Err(DataError::Config(format!(
            "array of shape {:?} has non-dense strides {:?}",
            shape, strides
        )));
    }

    let mut values = Vec::with_capacity(data.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..data.len() {
        let offset: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
        values.push(data[offset]);
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Ok(values)
}

fn is_row_major(shape: &[usize], strides: &[usize]) -> bool {
    let mut expected = 1;
    for (&dim, &stride) in shape.iter().zip(strides).rev() {
        if dim > 1 && stride != expected {
            return false;
        }
        expected *= dim;
    }
    true
}

/// Whether the strides address every element of the buffer exactly once.
fn is_dense(shape: &[i32], strides: &[usize]) -> bool {
    let mut axes: Vec<(usize, usize)> = shape
        .iter()
        .zip(strides)
        .map(|(&dim, &stride)| (dim as usize, stride))
        .filter(|&(dim, _)| dim > 1)
        .collect();
    axes.sort_by_key(|&(_, stride)| stride);
    let mut expected = 1;
    for (dim, stride) in axes {
        if stride != expected {
            return false;
        }
        expected *= dim;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_dynamic_range() {
        let mut values = vec![0.0, 127.5, 255.0];
        adjust_dynamic_range(&mut values, (0.0, 255.0), (-1.0, 1.0));
        assert!((values[0] + 1.0).abs() < 1e-6);
        assert!(values[1].abs() < 1e-6);
        assert!((values[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_adjust_dynamic_range_clamps() {
        let mut values = vec![-2.0, 0.5, 3.0];
        adjust_dynamic_range(&mut values, (-1.0, 1.0), (-1.0, 1.0));
        assert_eq!(values, vec![-1.0, 0.5, 1.0]);
    }

    #[test]
    fn test_to_row_major_follows_transpose() {
        let x = Array::from_slice(&[0.0_f32, 1.0, 2.0, 3.0, 4.0, 5.0], &[2, 3]);
        let t = x.transpose_axes(&[1, 0]).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(to_row_major(&t).unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert_eq!(to_row_major(&x).unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_to_row_major_expands_broadcast() {
        let column = Array::from_slice(&[1.0_f32, 2.0], &[2, 1]);
        let wide = mlx_rs::ops::broadcast_to(&column, &[2, 3]).unwrap();
        assert_eq!(
            to_row_major(&wide).unwrap(),
            vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]
        );
    }

    #[test]
    fn test_decode_is_planar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 10]))
            .save(&path)
            .unwrap();

        let data = decode_image(&path, 4).unwrap();
        assert_eq!(data.len(), 3 * 16);
        assert!(data[..16].iter().all(|&v| v == 255.0));
        assert!(data[16..32].iter().all(|&v| v == 0.0));
        assert!(data[32..].iter().all(|&v| v == 10.0));
    }
}
