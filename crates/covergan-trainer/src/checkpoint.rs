//! Training checkpoint save/load functionality.
//!
//! A checkpoint is a `step_<N>` directory holding the generator,
//! discriminator and both optimizer states as safetensors, the generator's
//! non-trainable buffers, and a `metadata.json` with the progressive schedule
//! position. Directories are assembled under a hidden `.tmp_step_<N>` name and
//! renamed into place, and the `latest` marker is replaced the same way, so an
//! interrupted save never hides the previous checkpoint. Re-saving an existing
//! step moves the old directory aside as `.old_step_<N>` and deletes it only
//! once the new one is in place; a checkpoint left aside by a crash is moved
//! back on the next save or lookup.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use covergan_core::TrainingPhase;
use mlx_rs::module::ModuleParameters;
use mlx_rs::optimizers::Adam;
use mlx_rs::Array;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::history::TrainingHistory;

const GENERATOR_FILE: &str = "generator.safetensors";
const DISCRIMINATOR_FILE: &str = "discriminator.safetensors";
const OPTIMIZER_G_FILE: &str = "optimizer_g.safetensors";
const OPTIMIZER_D_FILE: &str = "optimizer_d.safetensors";
const TRUNCATION_FILE: &str = "truncation.safetensors";
const METADATA_FILE: &str = "metadata.json";
const LATEST_MARKER: &str = "latest";
const TMP_PREFIX: &str = ".tmp_";
const OLD_PREFIX: &str = ".old_";

/// Training state metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Generator updates so far.
    pub step: usize,
    /// Real images consumed so far.
    pub images_shown: usize,
    /// Phase the checkpoint was taken in.
    pub phase: TrainingPhase,
    /// Active block.
    pub block: usize,
    /// Steps already consumed in `phase`; for a fade-in this is the position
    /// in the alpha schedule.
    pub step_in_phase: usize,
    /// Alpha at the time of the checkpoint.
    pub alpha: f32,
    /// Loss history up to `step`.
    pub history: TrainingHistory,
    /// Random seed used.
    pub seed: u64,
    /// Full configuration as JSON.
    pub config: Option<String>,
    /// Timestamp (RFC 3339).
    pub timestamp: String,
}

impl CheckpointMetadata {
    /// Create new metadata for the current training state.
    pub fn new(step: usize, phase: TrainingPhase, step_in_phase: usize) -> Self {
        Self {
            step,
            images_shown: 0,
            phase,
            block: phase.block(),
            step_in_phase,
            alpha: 1.0,
            history: TrainingHistory::new(),
            seed: 42,
            config: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Set the images-shown counter.
    pub fn with_images_shown(mut self, images_shown: usize) -> Self {
        self.images_shown = images_shown;
        self
    }

    /// Set the blend factor.
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the loss history.
    pub fn with_history(mut self, history: TrainingHistory) -> Self {
        self.history = history;
        self
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: &str) -> Self {
        self.config = Some(config.to_string());
        self
    }
}

/// Arrays stored in a checkpoint.
#[derive(Debug, Default, Clone)]
pub struct CheckpointState {
    /// Generator parameters.
    pub generator: HashMap<String, Array>,
    /// Discriminator parameters.
    pub discriminator: HashMap<String, Array>,
    /// Generator Adam moments.
    pub optimizer_g: HashMap<String, Array>,
    /// Discriminator Adam moments.
    pub optimizer_d: HashMap<String, Array>,
    /// Non-trainable generator state (StyleGAN average latent).
    pub buffers: HashMap<String, Array>,
}

/// Flatten every parameter of `module`, frozen ones included.
pub fn module_arrays<M: ModuleParameters>(module: &M) -> HashMap<String, Array> {
    module
        .parameters()
        .flatten()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Overwrite the parameters of `module` with `arrays`.
///
/// Every parameter must be present with a matching shape.
pub fn load_module_arrays<M: ModuleParameters>(
    module: &mut M,
    arrays: &HashMap<String, Array>,
) -> Result<()> {
    let mut params = module.parameters_mut().flatten();
    for (key, param) in params.iter_mut() {
        let value = arrays
            .get(key.as_ref())
            .ok_or_else(|| TrainError::Checkpoint(format!("missing parameter {}", key)))?;
        if value.shape() != param.shape() {
            return Err(TrainError::Checkpoint(format!(
                "parameter {} has shape {:?}, checkpoint holds {:?}",
                key,
                param.shape(),
                value.shape()
            )));
        }
        **param = value.clone();
    }
    Ok(())
}

/// Adam first and second moments keyed `<param>.m` / `<param>.v`.
pub fn adam_arrays(optimizer: &Adam) -> HashMap<String, Array> {
    let mut arrays = HashMap::new();
    for (key, (m, v)) in optimizer.state.iter() {
        arrays.insert(format!("{}.m", key), m.clone());
        arrays.insert(format!("{}.v", key), v.clone());
    }
    arrays
}

/// Restore moments produced by [`adam_arrays`].
pub fn load_adam_arrays(optimizer: &mut Adam, arrays: &HashMap<String, Array>) -> Result<()> {
    optimizer.state.clear();
    for (key, m) in arrays {
        let Some(param) = key.strip_suffix(".m") else {
            continue;
        };
        let v = arrays
            .get(&format!("{}.v", param))
            .ok_or_else(|| TrainError::Checkpoint(format!("missing second moment of {}", param)))?;
        optimizer
            .state
            .insert(param.into(), (m.clone(), v.clone()));
    }
    Ok(())
}

fn io_error(context: &str, e: std::io::Error) -> TrainError {
    TrainError::Io(std::io::Error::new(e.kind(), format!("{}: {}", context, e)))
}

fn save_arrays(arrays: &HashMap<String, Array>, path: &Path) -> Result<()> {
    if arrays.is_empty() {
        return Ok(());
    }
    Array::save_safetensors(arrays, None, path).map_err(|e| {
        TrainError::Checkpoint(format!("failed to save {:?}: {}", path, e))
    })
}

fn load_arrays(path: &Path) -> Result<HashMap<String, Array>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    Array::load_safetensors(path)
        .map_err(|e| TrainError::Checkpoint(format!("failed to load {:?}: {}", path, e)))
}

fn step_of(name: &str) -> Option<usize> {
    name.strip_prefix("step_")?.parse::<usize>().ok()
}

/// Checkpoint manager for saving and loading training state.
#[derive(Debug)]
pub struct CheckpointManager {
    /// Base directory for checkpoints.
    checkpoint_dir: PathBuf,
    /// Maximum number of checkpoints to keep (None = unlimited).
    max_checkpoints: Option<usize>,
}

impl CheckpointManager {
    /// Create a new checkpoint manager.
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir)
            .map_err(|e| io_error("failed to create checkpoint directory", e))?;

        Ok(Self {
            checkpoint_dir,
            max_checkpoints: Some(5),
        })
    }

    /// Set maximum number of checkpoints to keep, 0 for unlimited.
    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = (max > 0).then_some(max);
        self
    }

    /// Save a training checkpoint and point `latest` at it.
    pub fn save_checkpoint(
        &self,
        state: &CheckpointState,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf> {
        let name = format!("step_{}", metadata.step);
        let step_dir = self.checkpoint_dir.join(&name);
        let tmp_dir = self
            .checkpoint_dir
            .join(format!("{}{}", TMP_PREFIX, name));

        self.recover_displaced()?;
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)
                .map_err(|e| io_error("failed to clear stale checkpoint", e))?;
        }
        fs::create_dir_all(&tmp_dir)
            .map_err(|e| io_error("failed to create checkpoint directory", e))?;

        save_arrays(&state.generator, &tmp_dir.join(GENERATOR_FILE))?;
        save_arrays(&state.discriminator, &tmp_dir.join(DISCRIMINATOR_FILE))?;
        save_arrays(&state.optimizer_g, &tmp_dir.join(OPTIMIZER_G_FILE))?;
        save_arrays(&state.optimizer_d, &tmp_dir.join(OPTIMIZER_D_FILE))?;
        save_arrays(&state.buffers, &tmp_dir.join(TRUNCATION_FILE))?;

        let metadata_json = serde_json::to_string_pretty(metadata)?;
        let mut file = File::create(tmp_dir.join(METADATA_FILE))
            .map_err(|e| io_error("failed to create metadata file", e))?;
        file.write_all(metadata_json.as_bytes())
            .map_err(|e| io_error("failed to write metadata", e))?;
        file.sync_all()
            .map_err(|e| io_error("failed to sync metadata", e))?;

        let displaced = self.checkpoint_dir.join(format!("{}{}", OLD_PREFIX, name));
        let replacing = step_dir.exists();
        if replacing {
            fs::rename(&step_dir, &displaced)
                .map_err(|e| io_error("failed to move previous checkpoint aside", e))?;
        }
        fs::rename(&tmp_dir, &step_dir)
            .map_err(|e| io_error("failed to move checkpoint into place", e))?;
        if replacing {
            fs::remove_dir_all(&displaced)
                .map_err(|e| io_error("failed to remove replaced checkpoint", e))?;
        }

        self.update_latest_marker(&name)?;
        self.cleanup_old_checkpoints()?;

        tracing::info!(
            step = metadata.step,
            phase = %metadata.phase,
            path = ?step_dir,
            "Saved checkpoint"
        );

        Ok(step_dir)
    }

    /// Settle `.old_step_<N>` directories left by an interrupted replace.
    ///
    /// The displaced copy is dropped when `step_<N>` made it into place and
    /// moved back otherwise.
    fn recover_displaced(&self) -> Result<()> {
        let entries = fs::read_dir(&self.checkpoint_dir)
            .map_err(|e| io_error("failed to read checkpoint directory", e))?;
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(step_name) = name.strip_prefix(OLD_PREFIX) else {
                continue;
            };
            if step_of(step_name).is_none() {
                continue;
            }
            let step_dir = self.checkpoint_dir.join(step_name);
            if step_dir.join(METADATA_FILE).exists() {
                fs::remove_dir_all(entry.path())
                    .map_err(|e| io_error("failed to remove replaced checkpoint", e))?;
            } else {
                if step_dir.exists() {
                    fs::remove_dir_all(&step_dir)
                        .map_err(|e| io_error("failed to clear partial checkpoint", e))?;
                }
                fs::rename(entry.path(), &step_dir)
                    .map_err(|e| io_error("failed to restore displaced checkpoint", e))?;
                tracing::warn!(
                    checkpoint = step_name,
                    "Restored checkpoint displaced by an interrupted save"
                );
            }
        }
        Ok(())
    }

    /// Replace the "latest" marker.
    fn update_latest_marker(&self, step_name: &str) -> Result<()> {
        let latest_path = self.checkpoint_dir.join(LATEST_MARKER);
        let tmp_path = self
            .checkpoint_dir
            .join(format!("{}{}", TMP_PREFIX, LATEST_MARKER));

        let mut file = File::create(&tmp_path)
            .map_err(|e| io_error("failed to create latest marker", e))?;
        file.write_all(step_name.as_bytes())
            .map_err(|e| io_error("failed to write latest marker", e))?;
        file.sync_all()
            .map_err(|e| io_error("failed to sync latest marker", e))?;
        fs::rename(&tmp_path, &latest_path)
            .map_err(|e| io_error("failed to replace latest marker", e))?;
        Ok(())
    }

    /// Clean up old checkpoints, keeping only the most recent ones.
    fn cleanup_old_checkpoints(&self) -> Result<()> {
        let Some(max) = self.max_checkpoints else {
            return Ok(());
        };

        let mut step_dirs = self.list_checkpoints()?;
        while step_dirs.len() > max {
            let (step, path) = step_dirs.remove(0);
            if let Err(e) = fs::remove_dir_all(&path) {
                tracing::warn!("Failed to remove old checkpoint {}: {}", step, e);
            } else {
                tracing::debug!("Removed old checkpoint at step {}", step);
            }
        }

        Ok(())
    }

    /// Load a checkpoint from a directory.
    pub fn load_checkpoint<P: AsRef<Path>>(
        checkpoint_path: P,
    ) -> Result<(CheckpointState, CheckpointMetadata)> {
        let checkpoint_path = checkpoint_path.as_ref();

        let mut metadata_json = String::new();
        File::open(checkpoint_path.join(METADATA_FILE))
            .map_err(|e| io_error("failed to open metadata file", e))?
            .read_to_string(&mut metadata_json)
            .map_err(|e| io_error("failed to read metadata", e))?;
        let metadata: CheckpointMetadata = serde_json::from_str(&metadata_json)?;

        let state = CheckpointState {
            generator: load_arrays(&checkpoint_path.join(GENERATOR_FILE))?,
            discriminator: load_arrays(&checkpoint_path.join(DISCRIMINATOR_FILE))?,
            optimizer_g: load_arrays(&checkpoint_path.join(OPTIMIZER_G_FILE))?,
            optimizer_d: load_arrays(&checkpoint_path.join(OPTIMIZER_D_FILE))?,
            buffers: load_arrays(&checkpoint_path.join(TRUNCATION_FILE))?,
        };
        if state.generator.is_empty() {
            return Err(TrainError::Checkpoint(format!(
                "{:?} holds no generator weights",
                checkpoint_path
            )));
        }

        tracing::info!(
            step = metadata.step,
            phase = %metadata.phase,
            path = ?checkpoint_path,
            "Loaded checkpoint"
        );

        Ok((state, metadata))
    }

    /// Directory of the latest complete checkpoint.
    ///
    /// Follows the `latest` marker and falls back to the highest step
    /// directory when the marker is missing or stale.
    pub fn latest_path(&self) -> Result<Option<PathBuf>> {
        self.recover_displaced()?;
        let latest_path = self.checkpoint_dir.join(LATEST_MARKER);
        if latest_path.exists() {
            let mut step_name = String::new();
            File::open(&latest_path)
                .map_err(|e| io_error("failed to open latest marker", e))?
                .read_to_string(&mut step_name)
                .map_err(|e| io_error("failed to read latest marker", e))?;
            let path = self.checkpoint_dir.join(step_name.trim());
            if path.join(METADATA_FILE).exists() {
                return Ok(Some(path));
            }
            tracing::warn!(marker = step_name.trim(), "Latest marker points to a missing checkpoint");
        }
        Ok(self.list_checkpoints()?.pop().map(|(_, path)| path))
    }

    /// Load the latest checkpoint.
    pub fn load_latest(&self) -> Result<Option<(CheckpointState, CheckpointMetadata)>> {
        match self.latest_path()? {
            Some(path) => Self::load_checkpoint(path).map(Some),
            None => Ok(None),
        }
    }

    /// List all complete checkpoints, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut checkpoints: Vec<(usize, PathBuf)> = fs::read_dir(&self.checkpoint_dir)
            .map_err(|e| io_error("failed to read checkpoint directory", e))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let step = step_of(&name)?;
                entry.path().is_dir().then(|| (step, entry.path()))
            })
            .collect();

        checkpoints.sort_by_key(|(step, _)| *step);
        Ok(checkpoints)
    }

    /// Get the checkpoint directory.
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }
}
