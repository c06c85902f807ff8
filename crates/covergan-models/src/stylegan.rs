//! Style-based generator.
//!
//! A mapping network turns the latent into an intermediate style vector that is
//! broadcast to two style layers per block. Every convolution is followed by an
//! epilogue (noise, activation, instance norm, style modulation). Synthesis
//! starts from a learned 4x4 constant instead of the latent.

use std::cell::RefCell;
use std::collections::HashMap;

use covergan_core::{ModelConfig, BASE_RESOLUTION};
use mlx_rs::{
    macros::ModuleParameters,
    module::{ModuleParameters, Param},
    ops::indexing::IndexOp,
    Array,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ModelError, Result};
use crate::generator::{join_conditioning, ProgressiveGenerator};
use crate::layers::{
    instance_norm, lrelu, pixel_norm, upsample_nearest, NoiseInjection, ScaledConv2d, ScaledDense,
    StyleModulation, Truncation,
};
use crate::topology::{StackPlan, Topology};

/// Learning-rate multiplier of the mapping network.
pub const MAPPING_LR_MULTIPLIER: f32 = 0.01;

const TRUNCATION_KEY: &str = "truncation.avg_latent";

/// Latent to intermediate style vector.
#[derive(Debug, ModuleParameters)]
pub struct MappingNetwork {
    /// Dense layers, each followed by a leaky ReLU.
    #[param]
    pub layers: Vec<ScaledDense>,
}

impl MappingNetwork {
    /// Create `depth` dense layers of width `latent_size`.
    pub fn new(latent_size: i32, depth: usize) -> Result<Self> {
        let layers = (0..depth)
            .map(|_| {
                ScaledDense::new(latent_size, latent_size, None, true, MAPPING_LR_MULTIPLIER)
                    .map_err(ModelError::from)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Map `z` [batch, latent] to `w` [batch, latent].
    pub fn forward(&self, z: &Array) -> Result<Array> {
        let mut x = pixel_norm(z)?;
        for layer in &self.layers {
            x = lrelu(&layer.forward(&x)?)?;
        }
        Ok(x)
    }
}

/// Noise, activation, instance norm and style modulation after a convolution.
#[derive(Debug, ModuleParameters)]
pub struct Epilogue {
    /// Per-pixel noise.
    #[param]
    pub noise: NoiseInjection,
    /// Style input.
    #[param]
    pub style: StyleModulation,
}

impl Epilogue {
    fn new(latent_size: i32, channels: i32) -> Result<Self> {
        Ok(Self {
            noise: NoiseInjection::new()?,
            style: StyleModulation::new(latent_size, channels)?,
        })
    }

    fn forward(&self, x: &Array, w: &Array, seed: Option<u64>) -> Result<Array> {
        let x = self.noise.forward(x, seed)?;
        let x = instance_norm(&lrelu(&x)?)?;
        Ok(self.style.forward(&x, w)?)
    }
}

/// Block 0: learned constant, epilogue, 3x3 convolution, epilogue.
#[derive(Debug, ModuleParameters)]
pub struct SynthesisBase {
    /// Learned input [1, channels, 4, 4], initialized to ones.
    #[param]
    pub constant: Param<Array>,
    /// Epilogue on the constant.
    #[param]
    pub epilogue1: Epilogue,
    /// 3x3 convolution.
    #[param]
    pub conv: ScaledConv2d,
    /// Epilogue on the convolution.
    #[param]
    pub epilogue2: Epilogue,
}

impl SynthesisBase {
    fn new(latent_size: i32, channels: i32) -> Result<Self> {
        Ok(Self {
            constant: Param::new(mlx_rs::ops::ones::<f32>(&[
                1,
                channels,
                BASE_RESOLUTION,
                BASE_RESOLUTION,
            ])?),
            epilogue1: Epilogue::new(latent_size, channels)?,
            conv: ScaledConv2d::new(channels, channels, 3, None, true)?,
            epilogue2: Epilogue::new(latent_size, channels)?,
        })
    }

    fn forward(&self, styles: &Array, seed: Option<u64>) -> Result<Array> {
        let batch = styles.dim(0);
        let constant = self.constant.as_ref();
        let shape = [batch, constant.dim(1), constant.dim(2), constant.dim(3)];
        let x = mlx_rs::ops::broadcast_to(constant, &shape)?;

        let x = self.epilogue1.forward(&x, &styles.index((.., 0)), layer_seed(seed, 0))?;
        let x = self.conv.forward(&x)?;
        self.epilogue2.forward(&x, &styles.index((.., 1)), layer_seed(seed, 1))
    }
}

/// Growth block: upsample, then two convolution and epilogue stages.
#[derive(Debug, ModuleParameters)]
pub struct SynthesisBlock {
    /// First convolution.
    #[param]
    pub conv1: ScaledConv2d,
    /// First epilogue.
    #[param]
    pub epilogue1: Epilogue,
    /// Second convolution.
    #[param]
    pub conv2: ScaledConv2d,
    /// Second epilogue.
    #[param]
    pub epilogue2: Epilogue,
    index: usize,
}

impl SynthesisBlock {
    fn new(index: usize, latent_size: i32, in_channels: i32, out_channels: i32) -> Result<Self> {
        Ok(Self {
            conv1: ScaledConv2d::new(in_channels, out_channels, 3, None, true)?,
            epilogue1: Epilogue::new(latent_size, out_channels)?,
            conv2: ScaledConv2d::new(out_channels, out_channels, 3, None, true)?,
            epilogue2: Epilogue::new(latent_size, out_channels)?,
            index,
        })
    }

    fn forward(&self, x: &Array, styles: &Array, seed: Option<u64>) -> Result<Array> {
        let first = 2 * self.index as i32;
        let x = upsample_nearest(x, 2)?;
        let x = self.conv1.forward(&x)?;
        let x = self.epilogue1.forward(
            &x,
            &styles.index((.., first)),
            layer_seed(seed, first as u64),
        )?;
        let x = self.conv2.forward(&x)?;
        self.epilogue2.forward(
            &x,
            &styles.index((.., first + 1)),
            layer_seed(seed, first as u64 + 1),
        )
    }
}

fn layer_seed(seed: Option<u64>, layer: u64) -> Option<u64> {
    seed.map(|s| s.wrapping_mul(1_000_003).wrapping_add(layer))
}

/// Style-based generator.
#[derive(Debug, ModuleParameters)]
pub struct StyleGanGenerator {
    /// Latent to style mapping.
    #[param]
    pub mapping: MappingNetwork,
    /// Block 0.
    #[param]
    pub base: SynthesisBase,
    /// Blocks 1..=N, stored at index `block - 1`.
    #[param]
    pub blocks: Vec<SynthesisBlock>,
    /// 1x1 to-image projection per block, gain 1.
    #[param]
    pub to_image: Vec<ScaledConv2d>,
    /// Truncation trick, applied outside training.
    pub truncation: Truncation,
    /// Probability of mixing two styles per training batch.
    pub style_mixing_prob: f32,
    training: bool,
    mixing_rng: RefCell<StdRng>,
    topology: Topology,
}

impl StyleGanGenerator {
    /// Build every block of the configured topology.
    ///
    /// `seed` drives the style mixing decisions of unseeded forward passes.
    pub fn new(config: &ModelConfig, seed: u64) -> Result<Self> {
        let topology = Topology::from_config(config)?;
        let latent_size = topology.latent_size;

        let mapping = MappingNetwork::new(latent_size, config.n_mapping)?;
        let base = SynthesisBase::new(latent_size, topology.channels(0)?)?;
        let blocks = topology.blocks[1..]
            .iter()
            .map(|spec| {
                SynthesisBlock::new(spec.index, latent_size, spec.in_channels, spec.out_channels)
            })
            .collect::<Result<Vec<_>>>()?;
        let to_image = topology
            .blocks
            .iter()
            .map(|spec| {
                ScaledConv2d::new(spec.out_channels, topology.image_channels, 1, Some(1.0), true)
                    .map_err(ModelError::from)
            })
            .collect::<Result<Vec<_>>>()?;
        let truncation = Truncation::new(
            latent_size,
            config.truncation.threshold,
            config.truncation.beta,
            config.truncation.max_layer,
        )?;

        Ok(Self {
            mapping,
            base,
            blocks,
            to_image,
            truncation,
            style_mixing_prob: config.style_mixing_prob,
            training: true,
            mixing_rng: RefCell::new(StdRng::seed_from_u64(seed)),
            topology,
        })
    }

    /// Number of style layers: two per block.
    pub fn num_style_layers(&self) -> i32 {
        2 * self.topology.blocks.len() as i32
    }

    /// Whether style mixing is active (training) or truncation (inference).
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Map and broadcast `z` to [batch, layers, latent].
    fn styles(&self, z: &Array) -> Result<Array> {
        let w = self.mapping.forward(z)?;
        let (batch, width) = (w.dim(0), w.dim(1));
        let w = w.reshape(&[batch, 1, width])?;
        Ok(mlx_rs::ops::broadcast_to(
            &w,
            &[batch, self.num_style_layers(), width],
        )?)
    }

    /// Replace the styles from a random cutoff onwards with those of a second latent.
    ///
    /// A `seed` fixes both the mixing decision and the second latent.
    fn mix_styles(
        &self,
        styles: Array,
        block: usize,
        noise: &Array,
        conditioning: Option<&Array>,
        seed: Option<u64>,
    ) -> Result<Array> {
        let cutoff = {
            let mut seeded = seed.map(|s| StdRng::seed_from_u64(s.wrapping_add(2)));
            let mut shared = self.mixing_rng.borrow_mut();
            let rng: &mut StdRng = match seeded.as_mut() {
                Some(rng) => rng,
                None => &mut *shared,
            };
            if rng.gen::<f32>() >= self.style_mixing_prob {
                return Ok(styles);
            }
            rng.gen_range(1..2 * (block + 1))
        };

        let shape = noise.shape().to_vec();
        let other = match seed {
            Some(s) => {
                let key = mlx_rs::random::key(s.wrapping_add(1))?;
                mlx_rs::random::normal::<f32>(&shape, None, None, Some(&key))?
            }
            None => mlx_rs::random::normal::<f32>(&shape, None, None, None)?,
        };
        let other = self.styles(&join_conditioning(&self.topology, &other, conditioning)?)?;

        let layers = self.num_style_layers();
        let mask: Vec<f32> = (0..layers as usize)
            .map(|i| if i < cutoff { 1.0 } else { 0.0 })
            .collect();
        let mask = Array::from_slice(&mask, &[1, layers, 1]);
        let keep = Array::from_f32(1.0).subtract(&mask)?;

        Ok(styles.multiply(&mask)?.add(&other.multiply(&keep)?)?)
    }
}

impl ProgressiveGenerator for StyleGanGenerator {
    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn forward_plan(
        &self,
        plan: &StackPlan,
        latent: &Array,
        conditioning: Option<&Array>,
        seed: Option<u64>,
    ) -> Result<Array> {
        self.topology.check_block(plan.block)?;
        let z = join_conditioning(&self.topology, latent, conditioning)?;
        if z.dim(1) != self.topology.latent_size {
            return Err(ModelError::ShapeMismatch {
                expected: vec![z.dim(0), self.topology.latent_size],
                actual: z.shape().to_vec(),
            });
        }

        let styles = self.styles(&z)?;
        let styles = if self.training {
            self.mix_styles(styles, plan.block, latent, conditioning, seed)?
        } else {
            self.truncation.forward(&styles)?
        };

        let mut x = self.base.forward(&styles, seed)?;
        let mut previous = x.clone();
        for block in &self.blocks[..plan.block] {
            previous = x;
            x = block.forward(&previous, &styles, seed)?;
        }

        let image = self.to_image[plan.block].forward(&x)?;
        match &plan.fade {
            Some(fade) => {
                let residual = self.to_image[fade.old_projection].forward(&previous)?;
                let residual = upsample_nearest(&residual, 2)?;
                Ok(fade.weighted_sum.forward(&residual, &image)?)
            }
            None => Ok(image),
        }
    }

    fn activate(&mut self, plan: &StackPlan) {
        self.freeze_parameters(true);
        self.mapping.unfreeze_parameters(true);
        self.base.unfreeze_parameters(true);
        for block in self.blocks.iter_mut().take(plan.block) {
            block.unfreeze_parameters(true);
        }
        for projection in plan.projections() {
            if let Some(layer) = self.to_image.get_mut(projection) {
                layer.unfreeze_parameters(true);
            }
        }
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn after_step(&self, latent: &Array, conditioning: Option<&Array>) -> Result<()> {
        let z = join_conditioning(&self.topology, latent, conditioning)?;
        let w = self.mapping.forward(&z)?;
        self.truncation.update(&w.mean_axis(0, None)?)?;
        Ok(())
    }

    fn buffers(&self) -> HashMap<String, Array> {
        HashMap::from([(TRUNCATION_KEY.to_string(), self.truncation.avg_latent.get())])
    }

    fn load_buffers(&mut self, buffers: &HashMap<String, Array>) -> Result<()> {
        let avg = buffers.get(TRUNCATION_KEY).ok_or_else(|| {
            ModelError::Config(format!("missing buffer '{}'", TRUNCATION_KEY))
        })?;
        if avg.shape() != &[self.topology.latent_size][..] {
            return Err(ModelError::ShapeMismatch {
                expected: vec![self.topology.latent_size],
                actual: avg.shape().to_vec(),
            });
        }
        self.truncation.avg_latent.set(avg.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::SharedAlpha;

    fn config() -> ModelConfig {
        ModelConfig {
            architecture: covergan_core::Architecture::StyleGan,
            latent_size: 8,
            n_blocks: 2,
            base_channels: 8,
            reference_channels: 64,
            n_mapping: 2,
            ..Default::default()
        }
    }

    fn max_abs_diff(a: &Array, b: &Array) -> f32 {
        a.subtract(b).unwrap().abs().unwrap().max(None).unwrap().item::<f32>()
    }

    #[test]
    fn test_output_resolution_per_block() {
        let g = StyleGanGenerator::new(&config(), 0).unwrap();
        assert_eq!(g.num_style_layers(), 6);
        let z = mlx_rs::random::normal::<f32>(&[2, 8], None, None, None).unwrap();
        for (block, res) in [(0, 4), (1, 8), (2, 16)] {
            let images = g.forward(&z, None, block, 0.5, Some(3)).unwrap();
            assert_eq!(images.shape(), &[2, 3, res, res]);
        }
    }

    #[test]
    fn test_seeded_inference_is_deterministic() {
        let mut g = StyleGanGenerator::new(&config(), 0).unwrap();
        g.set_training(false);
        assert!(!g.is_training());
        let z = mlx_rs::random::normal::<f32>(&[2, 8], None, None, None).unwrap();
        let a = g.forward(&z, None, 2, 1.0, Some(11)).unwrap();
        let b = g.forward(&z, None, 2, 1.0, Some(11)).unwrap();
        assert!(max_abs_diff(&a, &b) < 1e-6);
    }

    #[test]
    fn test_seeded_training_pass_fixes_style_mixing() {
        let mut config = config();
        config.style_mixing_prob = 1.0;
        let g = StyleGanGenerator::new(&config, 0).unwrap();
        assert!(g.is_training());
        let z = mlx_rs::random::normal::<f32>(&[2, 8], None, None, None).unwrap();

        let first = g.forward(&z, None, 2, 1.0, Some(11)).unwrap();
        for _ in 0..4 {
            let again = g.forward(&z, None, 2, 1.0, Some(11)).unwrap();
            assert!(max_abs_diff(&first, &again) < 1e-6);
        }
    }

    #[test]
    fn test_fade_in_at_full_alpha_matches_pruned() {
        let mut g = StyleGanGenerator::new(&config(), 0).unwrap();
        g.set_training(false);
        let z = mlx_rs::random::normal::<f32>(&[2, 8], None, None, None).unwrap();

        let fade = StackPlan::fade_in(g.topology(), 2, SharedAlpha::new(1.0)).unwrap();
        let faded = g.forward_plan(&fade, &z, None, Some(5)).unwrap();
        let pruned = g.forward_plan(&fade.prune(), &z, None, Some(5)).unwrap();
        assert!(max_abs_diff(&faded, &pruned) < 1e-5);
    }

    #[test]
    fn test_after_step_moves_average() {
        let config = ModelConfig {
            truncation: covergan_core::TruncationConfig {
                beta: 0.0,
                ..Default::default()
            },
            ..config()
        };
        let g = StyleGanGenerator::new(&config, 0).unwrap();
        let z = mlx_rs::random::normal::<f32>(&[4, 8], None, None, None).unwrap();
        g.after_step(&z, None).unwrap();

        let expected = g.mapping.forward(&z).unwrap().mean_axis(0, None).unwrap();
        assert!(max_abs_diff(&g.truncation.avg_latent.get(), &expected) < 1e-5);
    }

    #[test]
    fn test_buffers_roundtrip() {
        let g = StyleGanGenerator::new(&config(), 0).unwrap();
        g.truncation
            .avg_latent
            .set(mlx_rs::ops::ones::<f32>(&[8]).unwrap());
        let buffers = g.buffers();

        let mut restored = StyleGanGenerator::new(&config(), 1).unwrap();
        restored.load_buffers(&buffers).unwrap();
        assert!(max_abs_diff(&restored.truncation.avg_latent.get(), &buffers[TRUNCATION_KEY]) < 1e-7);

        assert!(restored.load_buffers(&HashMap::new()).is_err());
    }

    #[test]
    fn test_activate_keeps_mapping_trainable() {
        let mut g = StyleGanGenerator::new(&config(), 0).unwrap();
        let plan = StackPlan::straight(g.topology(), 0).unwrap();
        g.activate(&plan);
        let trainable = g.trainable_parameters().flatten();
        assert!(trainable.keys().any(|k| k.starts_with("mapping.")));
        assert!(!trainable.keys().any(|k| k.starts_with("blocks.")));
    }
}
