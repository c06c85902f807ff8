//! Progressive growing state machine and the WGAN-GP training step.
//!
//! Training walks the phase sequence `BurnIn(0), FadeIn(1), BurnIn(1), …,
//! FadeIn(N), BurnIn(N)`. Entering a phase builds one [`StackPlan`] that both
//! networks interpret, so the generator and discriminator of a fade-in phase
//! read the same [`SharedAlpha`] cell. Every fade-in step pops the next value
//! of a linearly spaced [`AlphaSchedule`] into that cell before any forward
//! pass runs. Leaving a fade-in phase drops the plan and its residual path;
//! the following burn-in uses the straight stack at the same block.
//!
//! One step is `n_critic` critic updates on distinct real sub-batches followed
//! by one generator update with the critic frozen.

use std::path::PathBuf;

use covergan_core::{CoverGanConfig, StepMetrics, TrainingCallback, TrainingPhase};
use covergan_data::{CoverBatch, CoverLoader};
use covergan_models::layers::avg_pool;
use covergan_models::{
    AnyGenerator, ModelError, ProGanDiscriminator, ProgressiveGenerator, SharedAlpha, StackPlan,
    Topology,
};
use mlx_rs::error::Exception;
use mlx_rs::module::ModuleParameters;
use mlx_rs::nn;
use mlx_rs::ops::indexing::IndexOp;
use mlx_rs::optimizers::{Adam, AdamBuilder, Optimizer};
use mlx_rs::transforms::eval_params;
use mlx_rs::Array;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::checkpoint::{
    adam_arrays, load_adam_arrays, load_module_arrays, module_arrays, CheckpointManager,
    CheckpointMetadata, CheckpointState,
};
use crate::error::{Result, TrainError};
use crate::history::TrainingHistory;
use crate::loss::{
    gradient_penalty, interpolate, wasserstein_loss_for, DiscriminatorLossOutput, FAKE_LABEL,
    REAL_LABEL,
};
use crate::sink::ImageSink;

/// Linearly spaced blend factors from 0 to 1 inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaSchedule {
    values: Vec<f32>,
    position: usize,
}

impl AlphaSchedule {
    /// `steps` values from 0 to 1. A single step yields `[0.0]`.
    pub fn linspace(steps: usize) -> Self {
        let values = match steps {
            0 => Vec::new(),
            1 => vec![0.0],
            n => (0..n).map(|i| i as f32 / (n - 1) as f32).collect(),
        };
        Self {
            values,
            position: 0,
        }
    }

    /// Pop the next value.
    pub fn next_alpha(&mut self) -> Option<f32> {
        let value = self.values.get(self.position).copied();
        if value.is_some() {
            self.position += 1;
        }
        value
    }

    /// Values already popped.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Jump to `position`, e.g. when resuming.
    pub fn seek(&mut self, position: usize) {
        self.position = position.min(self.values.len());
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the schedule has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether every value has been popped.
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.values.len()
    }

    /// All values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Phase order up to a target block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSchedule {
    phases: Vec<TrainingPhase>,
}

impl PhaseSchedule {
    /// `BurnIn(0), FadeIn(1), BurnIn(1), …, FadeIn(target), BurnIn(target)`.
    pub fn new(target_block: usize) -> Self {
        Self {
            phases: TrainingPhase::sequence(target_block),
        }
    }

    /// Phases in order.
    pub fn phases(&self) -> &[TrainingPhase] {
        &self.phases
    }

    /// Phases from `phase` onwards, `phase` included.
    pub fn remaining(&self, phase: &TrainingPhase) -> &[TrainingPhase] {
        match self.phases.iter().position(|p| p == phase) {
            Some(i) => &self.phases[i..],
            None => &[],
        }
    }

    /// Number of phases.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Whether there are no phases.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// Position inside the current phase.
#[derive(Debug, Clone)]
pub struct PhaseState {
    /// Current phase.
    pub phase: TrainingPhase,
    /// Steps already taken in this phase.
    pub step_in_phase: usize,
    /// Stack interpreted by both networks.
    pub plan: StackPlan,
    /// Blend factor shared by both networks' weighted sums.
    pub alpha: SharedAlpha,
    /// Alpha ramp, present only while fading in.
    pub schedule: Option<AlphaSchedule>,
}

impl PhaseState {
    /// Fresh state at the start of `phase`.
    pub fn new(phase: TrainingPhase, topology: &Topology, fade_in_steps: usize) -> Result<Self> {
        let (alpha, plan, schedule) = match phase {
            TrainingPhase::BurnIn { block } => {
                let alpha = SharedAlpha::new(1.0);
                (alpha, StackPlan::straight(topology, block)?, None)
            }
            TrainingPhase::FadeIn { block } => {
                let alpha = SharedAlpha::new(0.0);
                let plan = StackPlan::fade_in(topology, block, alpha.clone())?;
                (alpha, plan, Some(AlphaSchedule::linspace(fade_in_steps)))
            }
        };
        Ok(Self {
            phase,
            step_in_phase: 0,
            plan,
            alpha,
            schedule,
        })
    }
}

fn to_exception(e: ModelError) -> Exception {
    Exception::custom(e.to_string())
}

/// Progressive WGAN-GP trainer.
pub struct ProgressiveTrainer<G: ProgressiveGenerator> {
    config: CoverGanConfig,
    generator: G,
    discriminator: ProGanDiscriminator,
    optimizer_g: Adam,
    optimizer_d: Adam,
    history: TrainingHistory,
    step: usize,
    images_shown: usize,
    rng: StdRng,
    state: PhaseState,
    checkpoints: Option<CheckpointManager>,
    image_sink: Option<ImageSink>,
}

impl ProgressiveTrainer<AnyGenerator> {
    /// Build both networks from `config` and wrap them in a trainer.
    pub fn from_config(config: CoverGanConfig) -> Result<Self> {
        config.validate()?;
        let generator = AnyGenerator::from_config(&config.model, config.training.seed)?;
        let discriminator = ProGanDiscriminator::new(&config.model)?;
        info!(
            architecture = ?generator.architecture(),
            generator_params = generator.num_parameters(),
            discriminator_params = discriminator.num_parameters(),
            "Built networks"
        );
        Self::new(config, generator, discriminator)
    }
}

impl<G: ProgressiveGenerator> ProgressiveTrainer<G> {
    /// Create a trainer positioned at the start of `BurnIn(0)`.
    pub fn new(config: CoverGanConfig, generator: G, discriminator: ProGanDiscriminator) -> Result<Self> {
        config.validate()?;
        if generator.topology() != discriminator.topology() {
            return Err(TrainError::Config(
                "generator and discriminator were built from different topologies".to_string(),
            ));
        }

        let training = &config.training;
        let optimizer_g = AdamBuilder::new(training.learning_rate)
            .betas((training.beta1, training.beta2))
            .build()
            .map_err(|_| TrainError::Config("failed to build generator optimizer".to_string()))?;
        let optimizer_d = AdamBuilder::new(training.learning_rate)
            .betas((training.beta1, training.beta2))
            .build()
            .map_err(|_| {
                TrainError::Config("failed to build discriminator optimizer".to_string())
            })?;

        let state = PhaseState::new(
            TrainingPhase::BurnIn { block: 0 },
            discriminator.topology(),
            training.fade_in_steps,
        )?;
        let rng = Self::step_rng(training.seed, 0);

        let mut trainer = Self {
            config,
            generator,
            discriminator,
            optimizer_g,
            optimizer_d,
            history: TrainingHistory::new(),
            step: 0,
            images_shown: 0,
            rng,
            state,
            checkpoints: None,
            image_sink: None,
        };
        trainer.generator.set_training(true);
        trainer.activate();
        Ok(trainer)
    }

    /// Save checkpoints through `manager`.
    pub fn with_checkpoints(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    /// Write image strips through `sink`.
    pub fn with_image_sink(mut self, sink: ImageSink) -> Self {
        self.image_sink = Some(sink);
        self
    }

    /// Configuration.
    pub fn config(&self) -> &CoverGanConfig {
        &self.config
    }

    /// Generator.
    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Mutable generator.
    pub fn generator_mut(&mut self) -> &mut G {
        &mut self.generator
    }

    /// Discriminator.
    pub fn discriminator(&self) -> &ProGanDiscriminator {
        &self.discriminator
    }

    /// Loss history.
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Generator updates so far.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Real images consumed so far.
    pub fn images_shown(&self) -> usize {
        self.images_shown
    }

    /// Current phase position.
    pub fn state(&self) -> &PhaseState {
        &self.state
    }

    /// Current phase.
    pub fn phase(&self) -> TrainingPhase {
        self.state.phase
    }

    /// Last block of the schedule.
    pub fn target_block(&self) -> usize {
        self.config.training.target_block(&self.config.model)
    }

    /// Configured number of steps in `phase`.
    pub fn phase_steps(&self, phase: &TrainingPhase) -> usize {
        match phase {
            TrainingPhase::BurnIn { .. } => self.config.training.burn_in_steps,
            TrainingPhase::FadeIn { .. } => self.config.training.fade_in_steps,
        }
    }

    /// Generator updates in the whole schedule.
    pub fn total_steps(&self) -> usize {
        PhaseSchedule::new(self.target_block())
            .phases()
            .iter()
            .map(|p| self.phase_steps(p))
            .sum()
    }

    /// Real images per critic update at `block`.
    pub fn batch_size(&self, block: usize) -> Result<usize> {
        let resolution = self.discriminator.topology().resolution(block)?;
        Ok(self.config.training.batch_size_for(resolution))
    }

    fn activate(&mut self) {
        self.generator.activate(&self.state.plan);
        self.discriminator.activate(&self.state.plan);
    }

    /// Switch to the start of `phase`.
    ///
    /// A fade-in phase gets a fresh alpha cell and schedule; the previous plan,
    /// including any fade-in residual path, is dropped.
    pub fn enter_phase(&mut self, phase: TrainingPhase) -> Result<()> {
        let state = PhaseState::new(
            phase,
            self.discriminator.topology(),
            self.config.training.fade_in_steps,
        )?;
        let resolution = self.discriminator.topology().resolution(phase.block())?;
        self.state = state;
        self.activate();
        info!(
            phase = %phase,
            resolution,
            trainable_g = self.generator.trainable_parameters().flatten().len(),
            trainable_d = self.discriminator.trainable_parameters().flatten().len(),
            "Entered phase"
        );
        Ok(())
    }

    /// Run every remaining phase of the schedule.
    pub fn run(
        &mut self,
        loader: &mut CoverLoader,
        callback: &mut dyn TrainingCallback,
    ) -> Result<()> {
        let target = self.target_block();
        self.discriminator.topology().check_block(target).map_err(TrainError::from)?;

        callback.on_train_start();
        info!(
            target_block = target,
            total_steps = self.total_steps(),
            start_step = self.step,
            "Starting progressive training"
        );

        loop {
            self.run_phase(loader, callback)?;
            match self.state.phase.next(target) {
                Some(next) => self.enter_phase(next)?,
                None => break,
            }
        }

        let checkpoint_every = self.config.training.checkpoint_every;
        let saved_last_step = checkpoint_every > 0 && self.step % checkpoint_every == 0;
        if !saved_last_step {
            if let Some(path) = self.save_checkpoint()? {
                callback.on_save(&path);
            }
        }
        callback.on_train_end();
        info!(
            steps = self.step,
            images_shown = self.images_shown,
            "Training complete"
        );
        Ok(())
    }

    /// Run the remaining steps of the current phase.
    pub fn run_phase(
        &mut self,
        loader: &mut CoverLoader,
        callback: &mut dyn TrainingCallback,
    ) -> Result<()> {
        let phase = self.state.phase;
        let total = self.phase_steps(&phase);
        let batch_size = self.batch_size(phase.block())?;
        loader.set_batch_size(batch_size * self.config.training.n_critic)?;

        callback.on_phase_start(&phase, total);
        while self.state.step_in_phase < total {
            callback.on_step_start(self.step + 1);
            let batch = loader.next_batch()?;
            let metrics = self.train_step(&batch)?;
            callback.on_step_end(&metrics);

            let image_every = self.config.training.image_every;
            if image_every > 0 && self.step % image_every == 0 {
                self.write_images()?;
            }
            let checkpoint_every = self.config.training.checkpoint_every;
            if checkpoint_every > 0 && self.step % checkpoint_every == 0 {
                if let Some(path) = self.save_checkpoint()? {
                    callback.on_save(&path);
                }
            }
        }
        callback.on_phase_end(&phase);
        Ok(())
    }

    /// Real images at the current block's resolution.
    fn downscale(&self, images: &Array) -> Result<Array> {
        let resolution = self.discriminator.topology().resolution(self.state.plan.block)?;
        let size = images.dim(2);
        if size < resolution || size % resolution != 0 {
            return Err(TrainError::Model(ModelError::ShapeMismatch {
                expected: vec![images.dim(0), images.dim(1), resolution, resolution],
                actual: images.shape().to_vec(),
            }));
        }
        Ok(avg_pool(images, size / resolution)?)
    }

    /// Per-step generator: every random draw of step `step` derives from
    /// `(seed, step)`, so a resumed run repeats the uninterrupted one.
    fn step_rng(seed: u64, step: usize) -> StdRng {
        StdRng::seed_from_u64(seed.wrapping_add(step as u64))
    }

    fn sample_latents(&mut self, n: i32) -> Result<Array> {
        let key = mlx_rs::random::key(self.rng.gen::<u64>())?;
        let noise_size = self.generator.noise_size();
        Ok(mlx_rs::random::normal::<f32>(&[n, noise_size], None, None, Some(&key))?)
    }

    /// One generator update preceded by `n_critic` critic updates.
    ///
    /// `batch` must hold `n_critic` sub-batches of real images at any
    /// resolution that is a multiple of the current one. During a fade-in the
    /// next alpha is written into the shared cell before anything runs.
    pub fn train_step(&mut self, batch: &CoverBatch) -> Result<StepMetrics> {
        self.rng = Self::step_rng(self.config.training.seed, self.step);
        let phase = self.state.phase;
        let alpha = match self.state.schedule.as_mut() {
            Some(schedule) => {
                let alpha = schedule.next_alpha().ok_or_else(|| {
                    TrainError::Training(format!(
                        "alpha schedule of {} exhausted after {} steps",
                        phase,
                        schedule.len()
                    ))
                })?;
                self.state.alpha.set(alpha);
                alpha
            }
            None => 1.0,
        };

        let n_critic = self.config.training.n_critic;
        let batch_size = batch.images.dim(0) / n_critic as i32;
        if batch_size == 0 {
            return Err(TrainError::Training(format!(
                "batch of {} images cannot feed {} critic updates",
                batch.images.dim(0),
                n_critic
            )));
        }
        let real = self.downscale(&batch.images)?;

        let mut sums = [0.0_f32; 4];
        for i in 0..n_critic as i32 {
            let range = i * batch_size..(i + 1) * batch_size;
            let real_chunk = real.index(range.clone());
            let conditioning = batch.conditioning.as_ref().map(|c| c.index(range));
            let values = self.discriminator_step(&real_chunk, conditioning.as_ref())?;
            self.history
                .push_discriminator(values[0], values[1], values[2], values[3]);
            for (sum, value) in sums.iter_mut().zip(values) {
                *sum += value;
            }
        }

        let conditioning = batch
            .conditioning
            .as_ref()
            .map(|c| c.index(0..batch_size));
        let g_loss = self.generator_step(batch_size, conditioning.as_ref())?;
        self.history.push_generator(g_loss);

        self.step += 1;
        self.state.step_in_phase += 1;
        self.images_shown += batch_size as usize;

        let n = n_critic as f32;
        let metrics = StepMetrics {
            step: self.step,
            images_shown: self.images_shown,
            phase: self.state.phase,
            alpha,
            d_loss: sums[0] / n,
            d_loss_positives: sums[1] / n,
            d_loss_negatives: sums[2] / n,
            d_loss_gradient_penalty: sums[3] / n,
            g_loss,
        };
        if metrics.has_non_finite() {
            warn!(
                step = metrics.step,
                phase = %metrics.phase,
                d_loss = metrics.d_loss,
                g_loss = metrics.g_loss,
                "Non-finite loss"
            );
        }
        Ok(metrics)
    }

    /// One critic update on `real` images at the current resolution.
    ///
    /// Returns `[total, positives, negatives, penalty]`.
    pub fn discriminator_step(&mut self, real: &Array, conditioning: Option<&Array>) -> Result<[f32; 4]> {
        let latents = self.sample_latents(real.dim(0))?;
        let noise_seed = self.rng.gen::<u64>();
        let fake = self
            .generator
            .forward_plan(&self.state.plan, &latents, conditioning, Some(noise_seed))?;
        let fake = mlx_rs::stop_gradient(&fake)?;
        let eps_key = mlx_rs::random::key(self.rng.gen::<u64>())?;
        let interpolated = interpolate(real, &fake, Some(&eps_key))?;

        let plan = &self.state.plan;
        let penalty_weight = self.config.training.gradient_penalty_weight;
        let mut output: Option<DiscriminatorLossOutput> = None;

        let (_, grads) = {
            let loss_fn = |d: &mut ProGanDiscriminator,
                           (real, fake, interpolated): (&Array, &Array, &Array)|
             -> std::result::Result<Array, Exception> {
                let d = &*d;
                let critic = |x: &Array| {
                    d.forward_plan(plan, x, conditioning).map_err(to_exception)
                };
                let positives = wasserstein_loss_for(REAL_LABEL, &critic(real)?)?;
                let negatives = wasserstein_loss_for(FAKE_LABEL, &critic(fake)?)?;
                let penalty = gradient_penalty(critic, interpolated, penalty_weight)?;
                let parts = DiscriminatorLossOutput::new(positives, negatives, penalty)?;
                let total = parts.total.clone();
                output = Some(parts);
                Ok(total)
            };
            let mut loss_and_grad_fn = nn::value_and_grad(loss_fn);
            loss_and_grad_fn(&mut self.discriminator, (real, &fake, &interpolated))?
        };

        self.optimizer_d.update(&mut self.discriminator, grads)?;
        eval_params(self.discriminator.parameters())?;

        let output = output
            .ok_or_else(|| TrainError::Training("critic loss was not evaluated".to_string()))?;
        Ok(output.scalars()?)
    }

    /// One generator update against the frozen critic; returns its loss.
    ///
    /// The critic's parameters are frozen for the duration of the update and
    /// its active stack is unfrozen again afterwards.
    pub fn generator_step(&mut self, batch_size: i32, conditioning: Option<&Array>) -> Result<f32> {
        let latents = self.sample_latents(batch_size)?;
        let noise_seed = self.rng.gen::<u64>();

        self.discriminator.freeze_parameters(true);
        let result = {
            let plan = &self.state.plan;
            let discriminator = &self.discriminator;
            let loss_fn = |g: &mut G, z: &Array| -> std::result::Result<Array, Exception> {
                let fake = g
                    .forward_plan(plan, z, conditioning, Some(noise_seed))
                    .map_err(to_exception)?;
                let scores = discriminator
                    .forward_plan(plan, &fake, conditioning)
                    .map_err(to_exception)?;
                wasserstein_loss_for(REAL_LABEL, &scores)
            };
            let mut loss_and_grad_fn = nn::value_and_grad(loss_fn);
            loss_and_grad_fn(&mut self.generator, &latents)
        };
        self.discriminator.activate(&self.state.plan);

        let (loss, grads) = result?;
        self.optimizer_g.update(&mut self.generator, grads)?;
        eval_params(self.generator.parameters())?;
        self.generator.after_step(&latents, conditioning)?;

        loss.eval()?;
        Ok(loss.item::<f32>())
    }

    fn write_images(&mut self) -> Result<()> {
        let Some(sink) = self.image_sink.as_ref() else {
            return Ok(());
        };
        let block = self.state.plan.block;
        let alpha = self.state.alpha.get();

        self.generator.set_training(false);
        let written = sink.write(&self.generator, self.step, block, alpha);
        self.generator.set_training(true);

        let path = written?;
        debug!(step = self.step, path = %path.display(), "Image strip written");
        Ok(())
    }

    /// Arrays describing the full training state.
    pub fn checkpoint_state(&self) -> CheckpointState {
        CheckpointState {
            generator: module_arrays(&self.generator),
            discriminator: module_arrays(&self.discriminator),
            optimizer_g: adam_arrays(&self.optimizer_g),
            optimizer_d: adam_arrays(&self.optimizer_d),
            buffers: self.generator.buffers(),
        }
    }

    /// Schedule position and history.
    pub fn checkpoint_metadata(&self) -> Result<CheckpointMetadata> {
        let config = serde_json::to_string(&self.config)?;
        Ok(
            CheckpointMetadata::new(self.step, self.state.phase, self.state.step_in_phase)
                .with_images_shown(self.images_shown)
                .with_alpha(self.state.alpha.get())
                .with_history(self.history.clone())
                .with_seed(self.config.training.seed)
                .with_config(&config),
        )
    }

    /// Save through the configured manager, if any.
    pub fn save_checkpoint(&self) -> Result<Option<PathBuf>> {
        let Some(manager) = &self.checkpoints else {
            return Ok(None);
        };
        let path = manager.save_checkpoint(&self.checkpoint_state(), &self.checkpoint_metadata()?)?;
        Ok(Some(path))
    }

    /// Restore weights, optimizer moments, history and schedule position.
    pub fn resume(&mut self, state: &CheckpointState, metadata: CheckpointMetadata) -> Result<()> {
        load_module_arrays(&mut self.generator, &state.generator)?;
        load_module_arrays(&mut self.discriminator, &state.discriminator)?;
        load_adam_arrays(&mut self.optimizer_g, &state.optimizer_g)?;
        load_adam_arrays(&mut self.optimizer_d, &state.optimizer_d)?;
        self.generator.load_buffers(&state.buffers)?;

        self.enter_phase(metadata.phase)?;
        self.state.step_in_phase = metadata.step_in_phase;
        if let Some(schedule) = self.state.schedule.as_mut() {
            schedule.seek(metadata.step_in_phase);
            self.state.alpha.set(metadata.alpha);
        }

        self.step = metadata.step;
        self.images_shown = metadata.images_shown;
        self.history = metadata.history;

        info!(
            step = self.step,
            phase = %self.state.phase,
            step_in_phase = self.state.step_in_phase,
            "Resumed training"
        );
        Ok(())
    }

    /// Resume from the latest checkpoint of the configured manager.
    ///
    /// Returns whether a checkpoint was found.
    pub fn resume_latest(&mut self) -> Result<bool> {
        let Some(manager) = &self.checkpoints else {
            return Ok(false);
        };
        match manager.load_latest()? {
            Some((state, metadata)) => {
                self.resume(&state, metadata)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_schedule_linspace() {
        let mut schedule = AlphaSchedule::linspace(5);
        let values: Vec<f32> = std::iter::from_fn(|| schedule.next_alpha()).collect();
        assert_eq!(values, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(schedule.is_exhausted());
        assert_eq!(schedule.next_alpha(), None);

        assert_eq!(AlphaSchedule::linspace(1).values(), &[0.0]);
        assert!(AlphaSchedule::linspace(0).is_empty());
    }

    #[test]
    fn test_alpha_schedule_seek() {
        let mut schedule = AlphaSchedule::linspace(3);
        schedule.seek(2);
        assert_eq!(schedule.next_alpha(), Some(1.0));
        schedule.seek(10);
        assert_eq!(schedule.position(), 3);
    }

    #[test]
    fn test_phase_schedule_remaining() {
        let schedule = PhaseSchedule::new(2);
        assert_eq!(schedule.len(), 5);
        let rest = schedule.remaining(&TrainingPhase::BurnIn { block: 1 });
        assert_eq!(
            rest,
            &[
                TrainingPhase::BurnIn { block: 1 },
                TrainingPhase::FadeIn { block: 2 },
                TrainingPhase::BurnIn { block: 2 },
            ]
        );
        assert!(schedule
            .remaining(&TrainingPhase::FadeIn { block: 3 })
            .is_empty());
    }
}
