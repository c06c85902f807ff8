//! Configuration types for CoverGAN.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CoverGanError, Result};

/// Resolution of block 0.
pub const BASE_RESOLUTION: i32 = 4;

/// Generator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Progressive-growing GAN with pixelwise normalization.
    #[default]
    ProGan,
    /// Style-based generator with a mapping network.
    StyleGan,
}

/// Truncation trick settings for the style-based generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Interpolation factor towards the average latent.
    #[serde(default = "default_truncation_threshold")]
    pub threshold: f32,

    /// Moving-average decay of the average latent.
    #[serde(default = "default_truncation_beta")]
    pub beta: f32,

    /// Only style layers with index below this value are truncated.
    #[serde(default = "default_truncation_max_layer")]
    pub max_layer: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            threshold: default_truncation_threshold(),
            beta: default_truncation_beta(),
            max_layer: default_truncation_max_layer(),
        }
    }
}

/// Network architecture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Generator family.
    #[serde(default)]
    pub architecture: Architecture,

    /// Size of the latent vector fed to the generator (including the
    /// conditioning slot when `conditional` is set).
    #[serde(default = "default_latent_size")]
    pub latent_size: i32,

    /// Number of growth blocks on top of the 4x4 base block.
    #[serde(default = "default_n_blocks")]
    pub n_blocks: usize,

    /// Number of image channels.
    #[serde(default = "default_image_channels")]
    pub image_channels: i32,

    /// Upper bound of the channel schedule.
    #[serde(default = "default_base_channels")]
    pub base_channels: i32,

    /// Numerator of the channel schedule, `32 · latent_size` for the
    /// reference 512-wide network.
    #[serde(default = "default_reference_channels")]
    pub reference_channels: i32,

    /// Condition generator and discriminator on the standardized release year.
    #[serde(default)]
    pub conditional: bool,

    /// Number of dense layers in the mapping network.
    #[serde(default = "default_n_mapping")]
    pub n_mapping: usize,

    /// Probability of mixing two styles during training.
    #[serde(default = "default_style_mixing_prob")]
    pub style_mixing_prob: f32,

    /// Truncation trick settings.
    #[serde(default)]
    pub truncation: TruncationConfig,

    /// Group size for the minibatch standard deviation layer.
    #[serde(default = "default_minibatch_group_size")]
    pub minibatch_group_size: i32,

    /// Number of feature maps appended by the minibatch standard deviation layer.
    #[serde(default = "default_minibatch_features")]
    pub minibatch_features: i32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::default(),
            latent_size: default_latent_size(),
            n_blocks: default_n_blocks(),
            image_channels: default_image_channels(),
            base_channels: default_base_channels(),
            reference_channels: default_reference_channels(),
            conditional: false,
            n_mapping: default_n_mapping(),
            style_mixing_prob: default_style_mixing_prob(),
            truncation: TruncationConfig::default(),
            minibatch_group_size: default_minibatch_group_size(),
            minibatch_features: default_minibatch_features(),
        }
    }
}

impl ModelConfig {
    /// Spatial resolution produced at `stage`.
    pub fn resolution(&self, stage: usize) -> i32 {
        BASE_RESOLUTION << stage
    }

    /// Resolution of the last block.
    pub fn max_resolution(&self) -> i32 {
        self.resolution(self.n_blocks)
    }

    /// Channel count at `stage`: `min(base, reference / resolution)`.
    pub fn channels(&self, stage: usize) -> i32 {
        self.base_channels
            .min(self.reference_channels / self.resolution(stage))
    }

    /// Number of latent components drawn from the normal distribution.
    pub fn noise_size(&self) -> i32 {
        if self.conditional {
            self.latent_size - 1
        } else {
            self.latent_size
        }
    }

    /// Check the architecture before anything is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.n_blocks == 0 {
            return Err(CoverGanError::Config(
                "n_blocks must be at least 1".to_string(),
            ));
        }
        if self.n_blocks > 10 {
            return Err(CoverGanError::Config(format!(
                "n_blocks = {} exceeds the 4096px limit",
                self.n_blocks
            )));
        }
        if self.latent_size < 1 || (self.conditional && self.latent_size < 2) {
            return Err(CoverGanError::Config(format!(
                "latent_size = {} is too small",
                self.latent_size
            )));
        }
        if self.image_channels < 1 {
            return Err(CoverGanError::Config(
                "image_channels must be positive".to_string(),
            ));
        }
        let max = self.max_resolution();
        if max <= 0 || (max & (max - 1)) != 0 {
            return Err(CoverGanError::Config(format!(
                "resolution {} is not a power of two",
                max
            )));
        }

        let mut previous = i32::MAX;
        for stage in 0..=self.n_blocks {
            let channels = self.channels(stage);
            if channels < 1 {
                return Err(CoverGanError::Config(format!(
                    "channel schedule yields {} channels at stage {}",
                    channels, stage
                )));
            }
            if channels > previous {
                return Err(CoverGanError::Config(format!(
                    "channel schedule increases at stage {} ({} > {})",
                    stage, channels, previous
                )));
            }
            previous = channels;
        }

        if self.minibatch_group_size < 1 || self.minibatch_features < 1 {
            return Err(CoverGanError::Config(
                "minibatch group size and features must be positive".to_string(),
            ));
        }
        if self.channels(0) % self.minibatch_features != 0 {
            return Err(CoverGanError::Config(format!(
                "{} base channels are not divisible into {} minibatch features",
                self.channels(0),
                self.minibatch_features
            )));
        }
        if !(0.0..=1.0).contains(&self.style_mixing_prob) {
            return Err(CoverGanError::Config(format!(
                "style_mixing_prob = {} is outside [0, 1]",
                self.style_mixing_prob
            )));
        }
        if !(0.0..=1.0).contains(&self.truncation.beta)
            || !(0.0..=1.0).contains(&self.truncation.threshold)
        {
            return Err(CoverGanError::Config(
                "truncation beta and threshold must lie in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Progressive training hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Default batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-resolution batch size overrides.
    #[serde(default)]
    pub batch_sizes: BTreeMap<i32, usize>,

    /// Discriminator updates per generator update.
    #[serde(default = "default_n_critic")]
    pub n_critic: usize,

    /// Adam learning rate for both networks.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    /// Adam beta1.
    #[serde(default = "default_beta1")]
    pub beta1: f32,

    /// Adam beta2.
    #[serde(default = "default_beta2")]
    pub beta2: f32,

    /// Weight of the gradient penalty term.
    #[serde(default = "default_gradient_penalty_weight")]
    pub gradient_penalty_weight: f32,

    /// Steps per burn-in phase.
    #[serde(default = "default_phase_steps")]
    pub burn_in_steps: usize,

    /// Steps per fade-in phase (length of the alpha schedule).
    #[serde(default = "default_phase_steps")]
    pub fade_in_steps: usize,

    /// Last block to train. Defaults to the last block of the topology.
    #[serde(default)]
    pub target_block: Option<usize>,

    /// Random seed.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Log every N steps.
    #[serde(default = "default_log_every")]
    pub log_every: usize,

    /// Checkpoint every N steps (0 to disable).
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Write generated image strips every N steps (0 to disable).
    #[serde(default = "default_image_every")]
    pub image_every: usize,

    /// Maximum number of checkpoints kept on disk.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_sizes: BTreeMap::new(),
            n_critic: default_n_critic(),
            learning_rate: default_learning_rate(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            gradient_penalty_weight: default_gradient_penalty_weight(),
            burn_in_steps: default_phase_steps(),
            fade_in_steps: default_phase_steps(),
            target_block: None,
            seed: default_seed(),
            log_every: default_log_every(),
            checkpoint_every: default_checkpoint_every(),
            image_every: default_image_every(),
            max_checkpoints: default_max_checkpoints(),
        }
    }
}

impl TrainingConfig {
    /// Batch size used at `resolution`.
    pub fn batch_size_for(&self, resolution: i32) -> usize {
        self.batch_sizes
            .get(&resolution)
            .copied()
            .unwrap_or(self.batch_size)
    }

    /// Check the schedule before anything is allocated.
    pub fn validate(&self, model: &ModelConfig) -> Result<()> {
        if let Some(target) = self.target_block {
            if target > model.n_blocks {
                return Err(CoverGanError::InvalidBlock {
                    requested: target,
                    max: model.n_blocks,
                });
            }
        }
        if self.n_critic == 0 {
            return Err(CoverGanError::Config("n_critic must be at least 1".to_string()));
        }
        if self.batch_size == 0 || self.batch_sizes.values().any(|&b| b == 0) {
            return Err(CoverGanError::Config("batch sizes must be positive".to_string()));
        }
        if self.burn_in_steps == 0 {
            return Err(CoverGanError::Config(
                "burn_in_steps must be at least 1".to_string(),
            ));
        }
        if self.fade_in_steps == 0 {
            return Err(CoverGanError::Config(
                "fade_in_steps must be at least 1".to_string(),
            ));
        }
        if self.gradient_penalty_weight.is_nan() || self.gradient_penalty_weight < 0.0 {
            return Err(CoverGanError::Config(format!(
                "gradient_penalty_weight = {} must be non-negative",
                self.gradient_penalty_weight
            )));
        }
        if self.learning_rate <= 0.0 {
            return Err(CoverGanError::Config(format!(
                "learning_rate = {} must be positive",
                self.learning_rate
            )));
        }
        if self.log_every == 0 {
            return Err(CoverGanError::Config("log_every must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Last block trained under `model`.
    pub fn target_block(&self, model: &ModelConfig) -> usize {
        self.target_block.unwrap_or(model.n_blocks)
    }
}

/// Dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// JSON-lines metadata file, one album per line.
    #[serde(default)]
    pub metadata_path: PathBuf,

    /// Directory that relative image paths are resolved against.
    #[serde(default)]
    pub image_root: Option<PathBuf>,

    /// Edge length of the training images.
    #[serde(default = "default_image_size")]
    pub image_size: u32,

    /// Pixel range of the decoded images.
    #[serde(default = "default_input_range")]
    pub input_range: (f32, f32),

    /// Pixel range fed to the networks.
    #[serde(default = "default_output_range")]
    pub output_range: (f32, f32),

    /// Datasets estimated above this size are streamed from disk.
    #[serde(default = "default_preload_budget_bytes")]
    pub preload_budget_bytes: u64,

    /// Shuffle the dataset each time it is exhausted.
    #[serde(default = "default_true")]
    pub shuffle: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::new(),
            image_root: None,
            image_size: default_image_size(),
            input_range: default_input_range(),
            output_range: default_output_range(),
            preload_budget_bytes: default_preload_budget_bytes(),
            shuffle: true,
        }
    }
}

/// Complete configuration for a training run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoverGanConfig {
    /// Architecture configuration.
    #[serde(default)]
    pub model: ModelConfig,

    /// Training hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,

    /// Dataset configuration.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Directory for checkpoints, metrics and image strips.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl CoverGanConfig {
    /// Load from a YAML or JSON file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Validate every section and their consistency.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.training.validate(&self.model)?;
        let max = self.model.max_resolution();
        if self.dataset.image_size as i32 != max {
            return Err(CoverGanError::Config(format!(
                "dataset image_size {} does not match the final resolution {}",
                self.dataset.image_size, max
            )));
        }
        let (lo, hi) = self.dataset.input_range;
        let (out_lo, out_hi) = self.dataset.output_range;
        if lo >= hi || out_lo >= out_hi {
            return Err(CoverGanError::Config(
                "dynamic ranges must be increasing".to_string(),
            ));
        }
        Ok(())
    }
}

// Default functions for serde
fn default_truncation_threshold() -> f32 {
    0.7
}
fn default_truncation_beta() -> f32 {
    0.995
}
fn default_truncation_max_layer() -> usize {
    8
}
fn default_latent_size() -> i32 {
    512
}
fn default_n_blocks() -> usize {
    4
}
fn default_image_channels() -> i32 {
    3
}
fn default_base_channels() -> i32 {
    512
}
fn default_reference_channels() -> i32 {
    16384
}
fn default_n_mapping() -> usize {
    8
}
fn default_style_mixing_prob() -> f32 {
    0.9
}
fn default_minibatch_group_size() -> i32 {
    4
}
fn default_minibatch_features() -> i32 {
    1
}
fn default_batch_size() -> usize {
    16
}
fn default_n_critic() -> usize {
    1
}
fn default_learning_rate() -> f32 {
    0.001
}
fn default_beta1() -> f32 {
    0.0
}
fn default_beta2() -> f32 {
    0.99
}
fn default_gradient_penalty_weight() -> f32 {
    10.0
}
fn default_phase_steps() -> usize {
    1000
}
fn default_seed() -> u64 {
    42
}
fn default_log_every() -> usize {
    10
}
fn default_checkpoint_every() -> usize {
    500
}
fn default_image_every() -> usize {
    500
}
fn default_max_checkpoints() -> usize {
    5
}
fn default_image_size() -> u32 {
    64
}
fn default_input_range() -> (f32, f32) {
    (0.0, 255.0)
}
fn default_output_range() -> (f32, f32) {
    (-1.0, 1.0)
}
fn default_preload_budget_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoverGanConfig::default();
        config.validate().unwrap();
        assert_eq!(config.model.max_resolution(), 64);
    }

    #[test]
    fn test_channel_schedule() {
        let config = ModelConfig {
            n_blocks: 8,
            ..Default::default()
        };
        let channels: Vec<i32> = (0..=8).map(|s| config.channels(s)).collect();
        assert_eq!(channels, vec![512, 512, 512, 512, 256, 128, 64, 32, 16]);
    }

    #[test]
    fn test_small_schedule() {
        let config = ModelConfig {
            base_channels: 16,
            reference_channels: 128,
            n_blocks: 2,
            ..Default::default()
        };
        assert_eq!(config.channels(0), 16);
        assert_eq!(config.channels(1), 16);
        assert_eq!(config.channels(2), 8);
        config.validate().unwrap();
    }

    #[test]
    fn test_schedule_collapsing_to_zero_is_rejected() {
        let config = ModelConfig {
            reference_channels: 16,
            n_blocks: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoverGanError::Config(_))));
    }

    #[test]
    fn test_target_block_out_of_range() {
        let model = ModelConfig {
            n_blocks: 2,
            ..Default::default()
        };
        let training = TrainingConfig {
            target_block: Some(3),
            ..Default::default()
        };
        match training.validate(&model) {
            Err(CoverGanError::InvalidBlock { requested, max }) => {
                assert_eq!(requested, 3);
                assert_eq!(max, 2);
            }
            other => panic!("expected InvalidBlock, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_phases_are_rejected() {
        let model = ModelConfig::default();
        for training in [
            TrainingConfig {
                burn_in_steps: 0,
                ..Default::default()
            },
            TrainingConfig {
                fade_in_steps: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                training.validate(&model),
                Err(CoverGanError::Config(_))
            ));
        }
    }

    #[test]
    fn test_negative_penalty_weight_is_rejected() {
        let model = ModelConfig::default();
        let training = TrainingConfig {
            gradient_penalty_weight: -1.0,
            ..Default::default()
        };
        match training.validate(&model) {
            Err(CoverGanError::Config(msg)) => assert!(msg.contains("gradient_penalty_weight")),
            other => panic!("expected Config error, got {:?}", other),
        }

        let training = TrainingConfig {
            gradient_penalty_weight: f32::NAN,
            ..Default::default()
        };
        assert!(training.validate(&model).is_err());

        let training = TrainingConfig {
            gradient_penalty_weight: 0.0,
            ..Default::default()
        };
        training.validate(&model).unwrap();
    }

    #[test]
    fn test_image_size_must_match_topology() {
        let mut config = CoverGanConfig::default();
        config.dataset.image_size = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_size_override() {
        let mut training = TrainingConfig::default();
        training.batch_sizes.insert(64, 4);
        assert_eq!(training.batch_size_for(64), 4);
        assert_eq!(training.batch_size_for(32), 16);
    }

    #[test]
    fn test_conditional_noise_size() {
        let config = ModelConfig {
            conditional: true,
            latent_size: 64,
            ..Default::default()
        };
        assert_eq!(config.noise_size(), 63);
    }

    #[test]
    fn test_yaml_partial_config() {
        let yaml = r#"
model:
  architecture: stylegan
  n_blocks: 2
training:
  n_critic: 2
dataset:
  image_size: 16
"#;
        let config: CoverGanConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.model.architecture, Architecture::StyleGan);
        assert_eq!(config.model.truncation.max_layer, 8);
        assert_eq!(config.training.n_critic, 2);
        assert!((config.training.beta2 - 0.99).abs() < 1e-6);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"model": {"n_blocks": 1}, "dataset": {"image_size": 8}}"#,
        )
        .unwrap();
        let config = CoverGanConfig::from_file(&path).unwrap();
        assert_eq!(config.model.n_blocks, 1);
        config.validate().unwrap();
    }
}
