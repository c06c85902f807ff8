//! Block topology and stack plans.
//!
//! A [`Topology`] is the immutable list of growth blocks derived from the
//! model configuration. A [`StackPlan`] describes which of those blocks make
//! up the active network for one phase: the straight-through stack at a block,
//! or the fade-in stack that additionally routes an old-resolution residual
//! through a [`WeightedSum`]. Both networks interpret the same plan, so the
//! generator and discriminator of a phase always share one alpha cell.

use covergan_core::ModelConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::layers::{SharedAlpha, WeightedSum};

/// One resolution stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpec {
    /// Block index, 0 is the 4x4 base.
    pub index: usize,
    /// Output resolution of the block.
    pub resolution: i32,
    /// Channels entering the block (generator direction).
    pub in_channels: i32,
    /// Channels produced by the block (generator direction).
    pub out_channels: i32,
}

/// Growth blocks of one architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Blocks 0..=N.
    pub blocks: Vec<BlockSpec>,
    /// Generator input size, including the conditioning slot.
    pub latent_size: i32,
    /// Image channels.
    pub image_channels: i32,
    /// Whether the networks consume a conditioning scalar.
    pub conditional: bool,
}

impl Topology {
    /// Build the block list from a validated configuration.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        config.validate()?;

        let blocks = (0..=config.n_blocks)
            .map(|index| BlockSpec {
                index,
                resolution: config.resolution(index),
                in_channels: if index == 0 {
                    config.latent_size
                } else {
                    config.channels(index - 1)
                },
                out_channels: config.channels(index),
            })
            .collect();

        Ok(Self {
            blocks,
            latent_size: config.latent_size,
            image_channels: config.image_channels,
            conditional: config.conditional,
        })
    }

    /// Largest block index.
    pub fn max_block(&self) -> usize {
        self.blocks.len().saturating_sub(1)
    }

    /// Fail with [`ModelError::InvalidBlock`] if `block` does not exist.
    pub fn check_block(&self, block: usize) -> Result<()> {
        if block > self.max_block() {
            return Err(ModelError::InvalidBlock {
                requested: block,
                max: self.max_block(),
            });
        }
        Ok(())
    }

    /// Layout of `block`.
    pub fn block(&self, block: usize) -> Result<&BlockSpec> {
        self.check_block(block)?;
        Ok(&self.blocks[block])
    }

    /// Output resolution of `block`.
    pub fn resolution(&self, block: usize) -> Result<i32> {
        Ok(self.block(block)?.resolution)
    }

    /// Feature channels at `block`.
    pub fn channels(&self, block: usize) -> Result<i32> {
        Ok(self.block(block)?.out_channels)
    }
}

/// Layer slots of a plan, in generator order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanLayer {
    /// Convolution block `i` (block 0 is the base).
    Block(usize),
    /// to-image / from-image projection of block `i`.
    Projection(usize),
    /// Resampling on the residual path.
    ResidualResample,
    /// Projection of the previous block on the residual path.
    ResidualProjection(usize),
    /// Blend of residual and new path.
    WeightedSum,
}

impl PlanLayer {
    /// Layers that only exist during a fade-in phase.
    pub fn removable(&self) -> bool {
        matches!(
            self,
            Self::ResidualResample | Self::ResidualProjection(_) | Self::WeightedSum
        )
    }
}

/// Removable part of a fade-in plan.
#[derive(Debug, Clone)]
pub struct FadeIn {
    /// Block whose projection feeds the residual path.
    pub old_projection: usize,
    /// Blend of residual and new path.
    pub weighted_sum: WeightedSum,
}

/// Active stack for one phase.
#[derive(Debug, Clone)]
pub struct StackPlan {
    /// Highest active block.
    pub block: usize,
    /// Residual path, present only while fading in.
    pub fade: Option<FadeIn>,
}

impl StackPlan {
    /// Straight-through stack ending at `block`.
    pub fn straight(topology: &Topology, block: usize) -> Result<Self> {
        topology.check_block(block)?;
        Ok(Self { block, fade: None })
    }

    /// Fade-in stack for `block`, blending through `alpha`.
    pub fn fade_in(topology: &Topology, block: usize, alpha: SharedAlpha) -> Result<Self> {
        topology.check_block(block)?;
        if block == 0 {
            return Err(ModelError::Config(
                "block 0 has no smaller resolution to fade from".to_string(),
            ));
        }
        Ok(Self {
            block,
            fade: Some(FadeIn {
                old_projection: block - 1,
                weighted_sum: WeightedSum::new(alpha),
            }),
        })
    }

    /// Whether the residual path is present.
    pub fn is_fade_in(&self) -> bool {
        self.fade.is_some()
    }

    /// Current blend factor, 1.0 for straight stacks.
    pub fn alpha(&self) -> f32 {
        self.fade
            .as_ref()
            .map(|f| f.weighted_sum.alpha.get())
            .unwrap_or(1.0)
    }

    /// All layer slots of the plan.
    pub fn layers(&self) -> Vec<PlanLayer> {
        let mut layers: Vec<PlanLayer> = (0..=self.block).map(PlanLayer::Block).collect();
        layers.push(PlanLayer::Projection(self.block));
        if let Some(fade) = &self.fade {
            layers.push(PlanLayer::ResidualProjection(fade.old_projection));
            layers.push(PlanLayer::ResidualResample);
            layers.push(PlanLayer::WeightedSum);
        }
        layers
    }

    /// Blocks whose projection is used by this plan.
    pub fn projections(&self) -> Vec<usize> {
        let mut projections = vec![self.block];
        if let Some(fade) = &self.fade {
            projections.push(fade.old_projection);
        }
        projections
    }

    /// Drop the removable layers, leaving the straight stack at the same block.
    pub fn prune(&self) -> StackPlan {
        StackPlan {
            block: self.block,
            fade: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ModelConfig {
        ModelConfig {
            latent_size: 16,
            n_blocks: 2,
            base_channels: 16,
            reference_channels: 128,
            ..Default::default()
        }
    }

    #[test]
    fn test_blocks_follow_channel_schedule() {
        let topology = Topology::from_config(&small_config()).unwrap();
        assert_eq!(topology.max_block(), 2);
        let resolutions: Vec<i32> = topology.blocks.iter().map(|b| b.resolution).collect();
        assert_eq!(resolutions, vec![4, 8, 16]);
        assert_eq!(topology.blocks[1].in_channels, 16);
        assert_eq!(topology.blocks[2].in_channels, 16);
        assert_eq!(topology.blocks[2].out_channels, 8);
    }

    #[test]
    fn test_block_lookups_reject_out_of_range() {
        let topology = Topology::from_config(&small_config()).unwrap();
        assert_eq!(topology.resolution(2).unwrap(), 16);
        assert_eq!(topology.channels(2).unwrap(), 8);
        assert!(matches!(
            topology.resolution(3),
            Err(ModelError::InvalidBlock { requested: 3, max: 2 })
        ));
        assert!(matches!(
            topology.channels(7),
            Err(ModelError::InvalidBlock { requested: 7, max: 2 })
        ));
    }

    #[test]
    fn test_invalid_block_fails_fast() {
        let topology = Topology::from_config(&small_config()).unwrap();
        assert!(matches!(
            StackPlan::straight(&topology, 3),
            Err(ModelError::InvalidBlock { requested: 3, max: 2 })
        ));
        assert!(StackPlan::fade_in(&topology, 0, SharedAlpha::new(0.0)).is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ModelConfig {
            n_blocks: 0,
            ..small_config()
        };
        assert!(matches!(
            Topology::from_config(&config),
            Err(ModelError::Config(_))
        ));
    }

    #[test]
    fn test_prune_removes_only_fade_layers() {
        let topology = Topology::from_config(&small_config()).unwrap();
        let plan = StackPlan::fade_in(&topology, 2, SharedAlpha::new(0.3)).unwrap();
        assert!((plan.alpha() - 0.3).abs() < 1e-7);

        let kept: Vec<PlanLayer> = plan
            .layers()
            .into_iter()
            .filter(|l| !l.removable())
            .collect();
        let pruned = plan.prune();
        assert_eq!(pruned.layers(), kept);
        assert_eq!(
            pruned.layers(),
            StackPlan::straight(&topology, 2).unwrap().layers()
        );
        assert_eq!(pruned.alpha(), 1.0);
        assert_eq!(plan.projections(), vec![2, 1]);
    }
}
