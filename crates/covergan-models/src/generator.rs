//! Generator capability and architecture dispatch.

use std::collections::HashMap;

use covergan_core::{Architecture, ModelConfig};
use mlx_rs::{module::ModuleParameters, Array};

use crate::error::{ModelError, Result};
use crate::layers::SharedAlpha;
use crate::progan::ProGanGenerator;
use crate::stylegan::StyleGanGenerator;
use crate::topology::{StackPlan, Topology};

/// A generator that can be grown block by block.
pub trait ProgressiveGenerator: ModuleParameters {
    /// Block layout shared with the discriminator.
    fn topology(&self) -> &Topology;

    /// Generator input size, including the conditioning slot.
    fn latent_size(&self) -> i32 {
        self.topology().latent_size
    }

    /// Number of latent components drawn from the normal distribution.
    fn noise_size(&self) -> i32 {
        let topology = self.topology();
        topology.latent_size - i32::from(topology.conditional)
    }

    /// Run the stack described by `plan`.
    ///
    /// # Arguments
    /// * `latent` - Noise [batch, noise_size]
    /// * `conditioning` - Standardized year [batch, 1], required for conditional models
    /// * `seed` - Seed for per-pixel noise, `None` draws fresh noise
    fn forward_plan(
        &self,
        plan: &StackPlan,
        latent: &Array,
        conditioning: Option<&Array>,
        seed: Option<u64>,
    ) -> Result<Array>;

    /// Generate images at `block`, blended with the previous resolution by `alpha`.
    ///
    /// `alpha >= 1` and `block == 0` run the straight stack.
    fn forward(
        &self,
        latent: &Array,
        conditioning: Option<&Array>,
        block: usize,
        alpha: f32,
        seed: Option<u64>,
    ) -> Result<Array> {
        let topology = self.topology();
        let plan = if block > 0 && alpha < 1.0 {
            StackPlan::fade_in(topology, block, SharedAlpha::new(alpha))?
        } else {
            StackPlan::straight(topology, block)?
        };
        self.forward_plan(&plan, latent, conditioning, seed)
    }

    /// Freeze every parameter outside `plan`.
    fn activate(&mut self, plan: &StackPlan);

    /// Switch between training and inference behavior.
    fn set_training(&mut self, _training: bool) {}

    /// Hook run after every generator update with the latents of that update.
    fn after_step(&self, _latent: &Array, _conditioning: Option<&Array>) -> Result<()> {
        Ok(())
    }

    /// Non-trainable state that belongs in a checkpoint.
    fn buffers(&self) -> HashMap<String, Array> {
        HashMap::new()
    }

    /// Restore state produced by [`ProgressiveGenerator::buffers`].
    fn load_buffers(&mut self, _buffers: &HashMap<String, Array>) -> Result<()> {
        Ok(())
    }
}

/// Append the conditioning column to the latent.
pub(crate) fn join_conditioning(
    topology: &Topology,
    latent: &Array,
    conditioning: Option<&Array>,
) -> Result<Array> {
    match (topology.conditional, conditioning) {
        (true, Some(cond)) => {
            let cond = cond.reshape(&[-1, 1])?;
            Ok(mlx_rs::ops::concatenate_axis(&[latent, &cond], 1)?)
        }
        (true, None) => Err(ModelError::Config(
            "conditional model requires a conditioning input".to_string(),
        )),
        (false, _) => Ok(latent.clone()),
    }
}

/// Generator of either architecture.
#[derive(Debug)]
pub enum AnyGenerator {
    /// Progressive GAN generator.
    ProGan(ProGanGenerator),
    /// Style-based generator.
    StyleGan(StyleGanGenerator),
}

impl AnyGenerator {
    /// Build the generator selected by `config.architecture`.
    pub fn from_config(config: &ModelConfig, seed: u64) -> Result<Self> {
        Ok(match config.architecture {
            Architecture::ProGan => Self::ProGan(ProGanGenerator::new(config)?),
            Architecture::StyleGan => Self::StyleGan(StyleGanGenerator::new(config, seed)?),
        })
    }

    /// Architecture of the wrapped generator.
    pub fn architecture(&self) -> Architecture {
        match self {
            Self::ProGan(_) => Architecture::ProGan,
            Self::StyleGan(_) => Architecture::StyleGan,
        }
    }
}

impl ModuleParameters for AnyGenerator {
    fn num_parameters(&self) -> usize {
        match self {
            Self::ProGan(m) => m.num_parameters(),
            Self::StyleGan(m) => m.num_parameters(),
        }
    }

    fn parameters(&self) -> mlx_rs::module::ModuleParamRef<'_> {
        match self {
            Self::ProGan(m) => m.parameters(),
            Self::StyleGan(m) => m.parameters(),
        }
    }

    fn parameters_mut(&mut self) -> mlx_rs::module::ModuleParamMut<'_> {
        match self {
            Self::ProGan(m) => m.parameters_mut(),
            Self::StyleGan(m) => m.parameters_mut(),
        }
    }

    fn trainable_parameters(&self) -> mlx_rs::module::ModuleParamRef<'_> {
        match self {
            Self::ProGan(m) => m.trainable_parameters(),
            Self::StyleGan(m) => m.trainable_parameters(),
        }
    }

    fn freeze_parameters(&mut self, recursive: bool) {
        match self {
            Self::ProGan(m) => m.freeze_parameters(recursive),
            Self::StyleGan(m) => m.freeze_parameters(recursive),
        }
    }

    fn unfreeze_parameters(&mut self, recursive: bool) {
        match self {
            Self::ProGan(m) => m.unfreeze_parameters(recursive),
            Self::StyleGan(m) => m.unfreeze_parameters(recursive),
        }
    }

    fn all_frozen(&self) -> Option<bool> {
        match self {
            Self::ProGan(m) => m.all_frozen(),
            Self::StyleGan(m) => m.all_frozen(),
        }
    }

    fn any_frozen(&self) -> Option<bool> {
        match self {
            Self::ProGan(m) => m.any_frozen(),
            Self::StyleGan(m) => m.any_frozen(),
        }
    }
}

impl ProgressiveGenerator for AnyGenerator {
    fn topology(&self) -> &Topology {
        match self {
            Self::ProGan(m) => m.topology(),
            Self::StyleGan(m) => m.topology(),
        }
    }

    fn forward_plan(
        &self,
        plan: &StackPlan,
        latent: &Array,
        conditioning: Option<&Array>,
        seed: Option<u64>,
    ) -> Result<Array> {
        match self {
            Self::ProGan(m) => m.forward_plan(plan, latent, conditioning, seed),
            Self::StyleGan(m) => m.forward_plan(plan, latent, conditioning, seed),
        }
    }

    fn activate(&mut self, plan: &StackPlan) {
        match self {
            Self::ProGan(m) => m.activate(plan),
            Self::StyleGan(m) => m.activate(plan),
        }
    }

    fn set_training(&mut self, training: bool) {
        match self {
            Self::ProGan(m) => m.set_training(training),
            Self::StyleGan(m) => m.set_training(training),
        }
    }

    fn after_step(&self, latent: &Array, conditioning: Option<&Array>) -> Result<()> {
        match self {
            Self::ProGan(m) => m.after_step(latent, conditioning),
            Self::StyleGan(m) => m.after_step(latent, conditioning),
        }
    }

    fn buffers(&self) -> HashMap<String, Array> {
        match self {
            Self::ProGan(m) => m.buffers(),
            Self::StyleGan(m) => m.buffers(),
        }
    }

    fn load_buffers(&mut self, buffers: &HashMap<String, Array>) -> Result<()> {
        match self {
            Self::ProGan(m) => m.load_buffers(buffers),
            Self::StyleGan(m) => m.load_buffers(buffers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(architecture: Architecture) -> ModelConfig {
        ModelConfig {
            architecture,
            latent_size: 8,
            n_blocks: 1,
            base_channels: 8,
            reference_channels: 64,
            n_mapping: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_dispatch_matches_config() {
        let g = AnyGenerator::from_config(&tiny(Architecture::ProGan), 0).unwrap();
        assert_eq!(g.architecture(), Architecture::ProGan);
        let g = AnyGenerator::from_config(&tiny(Architecture::StyleGan), 0).unwrap();
        assert_eq!(g.architecture(), Architecture::StyleGan);
        assert!(g.num_parameters() > 0);
        assert_eq!(g.topology().max_block(), 1);
    }

    #[test]
    fn test_forward_rejects_unknown_block() {
        let g = AnyGenerator::from_config(&tiny(Architecture::ProGan), 0).unwrap();
        let z = mlx_rs::random::normal::<f32>(&[2, 8], None, None, None).unwrap();
        assert!(matches!(
            g.forward(&z, None, 2, 1.0, None),
            Err(ModelError::InvalidBlock { requested: 2, max: 1 })
        ));
    }

    #[test]
    fn test_conditioning_is_required_when_configured() {
        let config = ModelConfig {
            conditional: true,
            ..tiny(Architecture::ProGan)
        };
        let topology = Topology::from_config(&config).unwrap();
        let z = mlx_rs::ops::zeros::<f32>(&[2, 7]).unwrap();
        assert!(join_conditioning(&topology, &z, None).is_err());

        let year = Array::from_slice(&[0.5_f32, -0.5], &[2]);
        let joined = join_conditioning(&topology, &z, Some(&year)).unwrap();
        assert_eq!(joined.shape(), &[2, 8]);
    }
}
