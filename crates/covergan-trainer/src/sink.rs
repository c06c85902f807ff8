//! Generated image strips.
//!
//! The sink keeps a fixed set of latents interpolated between two seeded
//! draws, so strips written at different steps show the same walk through
//! latent space and can be compared directly.

use std::path::{Path, PathBuf};

use covergan_models::ProgressiveGenerator;
use mlx_rs::error::Exception;
use mlx_rs::Array;

use crate::error::{Result, TrainError};

/// Latents linearly interpolated between two normal draws seeded by `seed`.
///
/// Returns `[n, noise_size]`; row 0 is the first draw and row `n - 1` the second.
pub fn interpolation_latents(noise_size: i32, n: usize, seed: u64) -> Result<Array> {
    if n == 0 {
        return Err(TrainError::Config("strip needs at least one latent".to_string()));
    }
    let key = mlx_rs::random::key(seed)?;
    let ends = mlx_rs::random::normal::<f32>(&[2, noise_size], None, None, Some(&key))?;
    let ends = ends.as_slice::<f32>().to_vec();
    let (start, end) = ends.split_at(noise_size as usize);

    let mut values = Vec::with_capacity(n * noise_size as usize);
    for i in 0..n {
        let t = if n == 1 { 0.0 } else { i as f32 / (n - 1) as f32 };
        values.extend(start.iter().zip(end).map(|(a, b)| a + (b - a) * t));
    }
    Ok(Array::from_slice(&values, &[n as i32, noise_size]))
}

/// Standardized years spread evenly over [-1, 1], shaped `[n, 1]`.
pub fn conditioning_sweep(n: usize) -> Array {
    let years: Vec<f32> = (0..n)
        .map(|i| if n <= 1 { 0.0 } else { -1.0 + 2.0 * i as f32 / (n - 1) as f32 })
        .collect();
    Array::from_slice(&years, &[n as i32, 1])
}

/// Map network output in [-1, 1] to display range [0, 255].
pub fn rescale_to_display(images: &Array) -> std::result::Result<Array, Exception> {
    let scaled = images
        .add(&Array::from_f32(1.0))?
        .multiply(&Array::from_f32(127.5))?;
    let scaled = mlx_rs::ops::maximum(&scaled, &Array::from_f32(0.0))?;
    mlx_rs::ops::minimum(&scaled, &Array::from_f32(255.0))
}

/// Write `[n, height, width, channels]` display-range images side by side as a PNG.
pub fn save_strip(images: &Array, path: &Path) -> Result<()> {
    if images.ndim() != 4 {
        return Err(TrainError::Config(format!(
            "expected [N, H, W, C] images, got {:?}",
            images.shape()
        )));
    }
    let (n, h, w, c) = (
        images.dim(0) as u32,
        images.dim(1) as u32,
        images.dim(2) as u32,
        images.dim(3) as u32,
    );
    if c != 1 && c != 3 {
        return Err(TrainError::Config(format!("cannot save {} channel images", c)));
    }
    let pixels = covergan_data::to_row_major(images)?;

    let mut strip = image::RgbImage::new(n * w, h);
    for i in 0..n {
        for y in 0..h {
            for x in 0..w {
                let base = (((i * h + y) * w + x) * c) as usize;
                let rgb = if c == 1 {
                    let v = pixels[base] as u8;
                    [v, v, v]
                } else {
                    [pixels[base] as u8, pixels[base + 1] as u8, pixels[base + 2] as u8]
                };
                strip.put_pixel(i * w + x, y, image::Rgb(rgb));
            }
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    strip
        .save(path)
        .map_err(|e| TrainError::Training(format!("failed to write {:?}: {}", path, e)))
}

/// Periodic writer of generated image strips.
#[derive(Debug)]
pub struct ImageSink {
    output_dir: PathBuf,
    latents: Array,
    conditioning: Option<Array>,
    target_size: i32,
    seed: u64,
}

impl ImageSink {
    /// Create a sink writing `n` interpolated samples per strip into `output_dir`.
    ///
    /// Conditional generators receive conditioning values spread evenly over
    /// [-1, 1] standardized years.
    pub fn new(
        output_dir: impl AsRef<Path>,
        noise_size: i32,
        conditional: bool,
        n: usize,
        target_size: i32,
        seed: u64,
    ) -> Result<Self> {
        let latents = interpolation_latents(noise_size, n, seed)?;
        let conditioning = conditional.then(|| conditioning_sweep(n));
        Ok(Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            latents,
            conditioning,
            target_size,
            seed,
        })
    }

    /// Generate display-range images `[B, H, W, C]` at `block`, upsampled to `target_size`.
    pub fn generate<G: ProgressiveGenerator>(
        generator: &G,
        latents: &Array,
        conditioning: Option<&Array>,
        block: usize,
        alpha: f32,
        seed: Option<u64>,
        target_size: i32,
    ) -> Result<Array> {
        let images = generator.forward(latents, conditioning, block, alpha, seed)?;
        let resolution = images.dim(2);
        let factor = (target_size / resolution).max(1);
        let images = covergan_models::layers::upsample_nearest(&images, factor)?;
        let images = rescale_to_display(&images)?.transpose_axes(&[0, 2, 3, 1])?;
        images.eval()?;
        Ok(images)
    }

    /// Write the strip for `step` and return its path.
    pub fn write<G: ProgressiveGenerator>(
        &self,
        generator: &G,
        step: usize,
        block: usize,
        alpha: f32,
    ) -> Result<PathBuf> {
        let images = Self::generate(
            generator,
            &self.latents,
            self.conditioning.as_ref(),
            block,
            alpha,
            Some(self.seed),
            self.target_size,
        )?;
        let path = self
            .output_dir
            .join(format!("step_{:07}_block_{}.png", step, block));
        save_strip(&images, &path)?;
        tracing::debug!(path = %path.display(), "Wrote image strip");
        Ok(path)
    }

    /// Number of images per strip.
    pub fn len(&self) -> usize {
        self.latents.dim(0) as usize
    }

    /// Whether the strip is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_interpolation_endpoints() {
        let latents = interpolation_latents(4, 5, 7).unwrap();
        assert_eq!(latents.shape(), &[5, 4]);
        let values = latents.as_slice::<f32>();
        // The midpoint is the mean of both ends.
        for j in 0..4 {
            let mid = (values[j] + values[16 + j]) / 2.0;
            assert!((values[8 + j] - mid).abs() < 1e-5);
        }

        let again = interpolation_latents(4, 5, 7).unwrap();
        assert_eq!(again.as_slice::<f32>(), values);
        assert!(interpolation_latents(4, 0, 7).is_err());
    }

    #[test]
    fn test_conditioning_sweep() {
        let years = conditioning_sweep(3);
        assert_eq!(years.shape(), &[3, 1]);
        assert_eq!(years.as_slice::<f32>(), &[-1.0, 0.0, 1.0]);
        assert_eq!(conditioning_sweep(1).as_slice::<f32>(), &[0.0]);
    }

    #[test]
    fn test_rescale_to_display_clamps() {
        let x = Array::from_slice(&[-2.0_f32, -1.0, 0.0, 1.0, 3.0], &[5]);
        let y = rescale_to_display(&x).unwrap();
        assert_eq!(y.as_slice::<f32>(), &[0.0, 0.0, 127.5, 255.0, 255.0]);
    }

    #[test]
    fn test_save_strip_reads_transposed_channels() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("planar.png");
        // One 2x2 NCHW image: red ramps, green constant, blue mirrors red.
        let nchw = [
            0.0_f32, 50.0, 100.0, 150.0, // R
            7.0, 7.0, 7.0, 7.0, // G
            150.0, 100.0, 50.0, 0.0, // B
        ];
        let images = Array::from_slice(&nchw, &[1, 3, 2, 2])
            .transpose_axes(&[0, 2, 3, 1])
            .unwrap();
        save_strip(&images, &path).unwrap();

        let strip = image::open(&path).unwrap().to_rgb8();
        assert_eq!(strip.get_pixel(0, 0).0, [0, 7, 150]);
        assert_eq!(strip.get_pixel(1, 0).0, [50, 7, 100]);
        assert_eq!(strip.get_pixel(0, 1).0, [100, 7, 50]);
        assert_eq!(strip.get_pixel(1, 1).0, [150, 7, 0]);
    }

    #[test]
    fn test_generated_strip_matches_network_output() {
        let config = covergan_core::ModelConfig {
            latent_size: 8,
            n_blocks: 1,
            base_channels: 8,
            reference_channels: 32,
            ..Default::default()
        };
        let generator = covergan_models::AnyGenerator::from_config(&config, 1).unwrap();
        let latents = interpolation_latents(generator.noise_size(), 2, 5).unwrap();

        let raw = generator.forward(&latents, None, 0, 1.0, Some(3)).unwrap();
        let expected = covergan_data::to_row_major(&rescale_to_display(&raw).unwrap()).unwrap();

        let images = ImageSink::generate(&generator, &latents, None, 0, 1.0, Some(3), 4).unwrap();
        assert_eq!(images.shape(), &[2, 4, 4, 3]);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("strip.png");
        save_strip(&images, &path).unwrap();

        let strip = image::open(&path).unwrap().to_rgb8();
        for i in 0..2u32 {
            for y in 0..4u32 {
                for x in 0..4u32 {
                    let pixel = strip.get_pixel(i * 4 + x, y).0;
                    for c in 0..3u32 {
                        let value = expected[(((i * 3 + c) * 4 + y) * 4 + x) as usize];
                        assert_eq!(pixel[c as usize], value as u8, "image {} ({}, {}) c{}", i, x, y, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_save_strip_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("strips/out.png");
        // Two 2x2 RGB images, first black, second white.
        let mut data = vec![0.0_f32; 12];
        data.extend(vec![255.0_f32; 12]);
        let images = Array::from_slice(&data, &[2, 2, 2, 3]);
        save_strip(&images, &path).unwrap();

        let strip = image::open(&path).unwrap().to_rgb8();
        assert_eq!(strip.dimensions(), (4, 2));
        assert_eq!(strip.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(strip.get_pixel(3, 1).0, [255, 255, 255]);
    }
}
