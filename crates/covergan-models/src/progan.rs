//! Progressive GAN generator and the shared discriminator.
//!
//! Both networks are built with every block up front. A [`StackPlan`] selects
//! which blocks take part in a forward pass, and `activate` freezes the rest so
//! that only the active stack receives gradients.

use covergan_core::{ModelConfig, BASE_RESOLUTION};
use mlx_rs::{macros::ModuleParameters, module::ModuleParameters, Array};

use crate::error::{ModelError, Result};
use crate::generator::{join_conditioning, ProgressiveGenerator};
use crate::layers::{
    avg_pool, lrelu, pixel_norm, upsample_nearest, MinibatchStdDev, ScaledConv2d, ScaledDense,
    SharedAlpha, DEFAULT_GAIN,
};
use crate::topology::{StackPlan, Topology};

/// 4x4 base of the generator: latent to feature map.
#[derive(Debug, ModuleParameters)]
pub struct ProGanGeneratorBase {
    /// Latent to 4x4 features, gain sqrt(2)/4.
    #[param]
    pub dense: ScaledDense,
    /// 3x3 convolution.
    #[param]
    pub conv: ScaledConv2d,
    /// Feature channels.
    pub channels: i32,
}

impl ProGanGeneratorBase {
    fn new(latent_size: i32, channels: i32) -> Result<Self> {
        let area = BASE_RESOLUTION * BASE_RESOLUTION;
        Ok(Self {
            dense: ScaledDense::new(latent_size, channels * area, Some(DEFAULT_GAIN / 4.0), true, 1.0)?,
            conv: ScaledConv2d::new(channels, channels, 3, None, true)?,
            channels,
        })
    }

    fn forward(&self, latent: &Array) -> Result<Array> {
        let x = pixel_norm(latent)?;
        let x = self.dense.forward(&x)?;
        let x = x.reshape(&[-1, self.channels, BASE_RESOLUTION, BASE_RESOLUTION])?;
        let x = pixel_norm(&lrelu(&x)?)?;
        let x = self.conv.forward(&x)?;
        Ok(pixel_norm(&lrelu(&x)?)?)
    }
}

/// Growth block: upsample then two 3x3 convolutions.
#[derive(Debug, ModuleParameters)]
pub struct ProGanGeneratorBlock {
    /// First convolution.
    #[param]
    pub conv1: ScaledConv2d,
    /// Second convolution.
    #[param]
    pub conv2: ScaledConv2d,
}

impl ProGanGeneratorBlock {
    fn new(in_channels: i32, out_channels: i32) -> Result<Self> {
        Ok(Self {
            conv1: ScaledConv2d::new(in_channels, out_channels, 3, None, true)?,
            conv2: ScaledConv2d::new(out_channels, out_channels, 3, None, true)?,
        })
    }

    fn forward(&self, x: &Array) -> Result<Array> {
        let x = upsample_nearest(x, 2)?;
        let x = pixel_norm(&lrelu(&self.conv1.forward(&x)?)?)?;
        Ok(pixel_norm(&lrelu(&self.conv2.forward(&x)?)?)?)
    }
}

/// Progressive GAN generator.
#[derive(Debug, ModuleParameters)]
pub struct ProGanGenerator {
    /// Block 0.
    #[param]
    pub base: ProGanGeneratorBase,
    /// Blocks 1..=N, stored at index `block - 1`.
    #[param]
    pub blocks: Vec<ProGanGeneratorBlock>,
    /// 1x1 to-image projection per block, gain 1.
    #[param]
    pub to_image: Vec<ScaledConv2d>,
    topology: Topology,
}

impl ProGanGenerator {
    /// Build every block of the configured topology.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let topology = Topology::from_config(config)?;

        let base = ProGanGeneratorBase::new(topology.latent_size, topology.channels(0)?)?;
        let blocks = topology.blocks[1..]
            .iter()
            .map(|spec| ProGanGeneratorBlock::new(spec.in_channels, spec.out_channels))
            .collect::<Result<Vec<_>>>()?;
        let to_image = topology
            .blocks
            .iter()
            .map(|spec| {
                ScaledConv2d::new(spec.out_channels, topology.image_channels, 1, Some(1.0), true)
                    .map_err(ModelError::from)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base,
            blocks,
            to_image,
            topology,
        })
    }
}

impl ProgressiveGenerator for ProGanGenerator {
    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn forward_plan(
        &self,
        plan: &StackPlan,
        latent: &Array,
        conditioning: Option<&Array>,
        _seed: Option<u64>,
    ) -> Result<Array> {
        self.topology.check_block(plan.block)?;
        let z = join_conditioning(&self.topology, latent, conditioning)?;
        if z.dim(1) != self.topology.latent_size {
            return Err(ModelError::ShapeMismatch {
                expected: vec![z.dim(0), self.topology.latent_size],
                actual: z.shape().to_vec(),
            });
        }

        let mut x = self.base.forward(&z)?;
        let mut previous = x.clone();
        for block in &self.blocks[..plan.block] {
            previous = x;
            x = block.forward(&previous)?;
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
}

/// 4x4 base of the discriminator: minibatch statistics to a single score.
#[derive(Debug, ModuleParameters)]
pub struct ProGanDiscriminatorBase {
    /// 3x3 convolution over features plus minibatch statistics.
    #[param]
    pub conv: ScaledConv2d,
    /// Flattened features (and conditioning) to `channels`.
    #[param]
    pub dense: ScaledDense,
    /// Score, gain 1.
    #[param]
    pub output: ScaledDense,
    /// Minibatch standard deviation.
    pub minibatch: MinibatchStdDev,
}

impl ProGanDiscriminatorBase {
    fn new(channels: i32, conditional: bool, minibatch: MinibatchStdDev) -> Result<Self> {
        let flat = channels * BASE_RESOLUTION * BASE_RESOLUTION + i32::from(conditional);
        Ok(Self {
            conv: ScaledConv2d::new(channels + minibatch.num_new_features, channels, 3, None, true)?,
            dense: ScaledDense::new(flat, channels, None, true, 1.0)?,
            output: ScaledDense::new(channels, 1, Some(1.0), true, 1.0)?,
            minibatch,
        })
    }

    fn forward(&self, x: &Array, conditioning: Option<&Array>) -> Result<Array> {
        let x = self.minibatch.forward(x)?;
        let x = lrelu(&self.conv.forward(&x)?)?;
        let x = x.reshape(&[x.dim(0), -1])?;
        let x = match conditioning {
            Some(cond) => mlx_rs::ops::concatenate_axis(&[&x, &cond.reshape(&[-1, 1])?], 1)?,
            None => x,
        };
        let x = lrelu(&self.dense.forward(&x)?)?;
        Ok(self.output.forward(&x)?)
    }
}

/// Discriminator block: two 3x3 convolutions then 2x average pooling.
#[derive(Debug, ModuleParameters)]
pub struct ProGanDiscriminatorBlock {
    /// First convolution.
    #[param]
    pub conv1: ScaledConv2d,
    /// Second convolution, narrows to the next block's channels.
    #[param]
    pub conv2: ScaledConv2d,
}

impl ProGanDiscriminatorBlock {
    fn new(in_channels: i32, out_channels: i32) -> Result<Self> {
        Ok(Self {
            conv1: ScaledConv2d::new(in_channels, in_channels, 3, None, true)?,
            conv2: ScaledConv2d::new(in_channels, out_channels, 3, None, true)?,
        })
    }

    fn forward(&self, x: &Array) -> Result<Array> {
        let x = lrelu(&self.conv1.forward(x)?)?;
        let x = lrelu(&self.conv2.forward(&x)?)?;
        Ok(avg_pool(&x, 2)?)
    }
}

/// Progressive discriminator, used with both generator families.
#[derive(Debug, ModuleParameters)]
pub struct ProGanDiscriminator {
    /// Block 0.
    #[param]
    pub base: ProGanDiscriminatorBase,
    /// Blocks 1..=N, stored at index `block - 1`.
    #[param]
    pub blocks: Vec<ProGanDiscriminatorBlock>,
    /// 1x1 from-image projection per block.
    #[param]
    pub from_image: Vec<ScaledConv2d>,
    topology: Topology,
}

impl ProGanDiscriminator {
    /// Build every block of the configured topology.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let topology = Topology::from_config(config)?;
        let minibatch = MinibatchStdDev::new(config.minibatch_group_size, config.minibatch_features);

        let base = ProGanDiscriminatorBase::new(topology.channels(0)?, topology.conditional, minibatch)?;
        let blocks = topology.blocks[1..]
            .iter()
            .map(|spec| ProGanDiscriminatorBlock::new(spec.out_channels, spec.in_channels))
            .collect::<Result<Vec<_>>>()?;
        let from_image = topology
            .blocks
            .iter()
            .map(|spec| {
                ScaledConv2d::new(topology.image_channels, spec.out_channels, 1, None, true)
                    .map_err(ModelError::from)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base,
            blocks,
            from_image,
            topology,
        })
    }

    /// Block layout.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Score `images` [batch, channels, res, res] with the stack in `plan`.
    ///
    /// Returns [batch, 1].
    pub fn forward_plan(
        &self,
        plan: &StackPlan,
        images: &Array,
        conditioning: Option<&Array>,
    ) -> Result<Array> {
        let resolution = self.topology.resolution(plan.block)?;
        let expected = [images.dim(0), self.topology.image_channels, resolution, resolution];
        if images.ndim() != 4 || images.shape() != &expected[..] {
            return Err(ModelError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: images.shape().to_vec(),
            });
        }
        let conditioning = match (self.topology.conditional, conditioning) {
            (true, Some(cond)) => Some(cond),
            (true, None) => {
                return Err(ModelError::Config(
                    "conditional model requires a conditioning input".to_string(),
                ))
            }
            (false, _) => None,
        };

        let mut x = lrelu(&self.from_image[plan.block].forward(images)?)?;
        if plan.block > 0 {
            x = self.blocks[plan.block - 1].forward(&x)?;
            if let Some(fade) = &plan.fade {
                let downscaled = avg_pool(images, 2)?;
                let residual = lrelu(&self.from_image[fade.old_projection].forward(&downscaled)?)?;
                x = fade.weighted_sum.forward(&residual, &x)?;
            }
            for block in self.blocks[..plan.block - 1].iter().rev() {
                x = block.forward(&x)?;
            }
        }

        self.base.forward(&x, conditioning)
    }

    /// Score `images` at `block`, blended with the previous resolution by `alpha`.
    pub fn forward(
        &self,
        images: &Array,
        conditioning: Option<&Array>,
        block: usize,
        alpha: f32,
    ) -> Result<Array> {
        let plan = if block > 0 && alpha < 1.0 {
            StackPlan::fade_in(&self.topology, block, SharedAlpha::new(alpha))?
        } else {
            StackPlan::straight(&self.topology, block)?
        };
        self.forward_plan(&plan, images, conditioning)
    }

    /// Freeze every parameter outside `plan`.
    pub fn activate(&mut self, plan: &StackPlan) {
        self.freeze_parameters(true);
        self.base.unfreeze_parameters(true);
        for block in self.blocks.iter_mut().take(plan.block) {
            block.unfreeze_parameters(true);
        }
        for projection in plan.projections() {
            if let Some(layer) = self.from_image.get_mut(projection) {
                layer.unfreeze_parameters(true);
            }
        }
    }
}
