//! Core trait definitions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::TrainingPhase;

/// Scalars produced by one generator update and its critic updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Global step (generator updates so far, starting at 1).
    pub step: usize,
    /// Real images consumed so far.
    pub images_shown: usize,
    /// Phase the step ran in.
    pub phase: TrainingPhase,
    /// Blend factor used for this step (1.0 outside fade-in).
    pub alpha: f32,
    /// Mean total discriminator loss over the critic updates.
    pub d_loss: f32,
    /// Mean discriminator loss on real images.
    pub d_loss_positives: f32,
    /// Mean discriminator loss on generated images.
    pub d_loss_negatives: f32,
    /// Mean gradient penalty term.
    pub d_loss_gradient_penalty: f32,
    /// Generator loss.
    pub g_loss: f32,
}

impl StepMetrics {
    /// Named scalars in a stable order.
    pub fn scalars(&self) -> [(&'static str, f64); 7] {
        [
            ("alpha", self.alpha as f64),
            ("images_shown", self.images_shown as f64),
            ("d_loss", self.d_loss as f64),
            ("d_loss_positives", self.d_loss_positives as f64),
            ("d_loss_negatives", self.d_loss_negatives as f64),
            ("d_loss_gradient_penalty", self.d_loss_gradient_penalty as f64),
            ("g_loss", self.g_loss as f64),
        ]
    }

    /// Whether any loss is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        [
            self.d_loss,
            self.d_loss_positives,
            self.d_loss_negatives,
            self.d_loss_gradient_penalty,
            self.g_loss,
        ]
        .iter()
        .any(|v| !v.is_finite())
    }
}

/// Append-only sink for named scalars keyed by training step.
pub trait MetricSink {
    /// Record one scalar.
    fn record(&mut self, step: usize, name: &str, value: f64);

    /// Flush buffered values.
    fn flush(&mut self) {}
}

/// Training callback trait.
pub trait TrainingCallback: Send {
    /// Called at the start of training.
    fn on_train_start(&mut self) {}

    /// Called at the end of training.
    fn on_train_end(&mut self) {}

    /// Called when a phase starts.
    fn on_phase_start(&mut self, _phase: &TrainingPhase, _steps: usize) {}

    /// Called when a phase ends.
    fn on_phase_end(&mut self, _phase: &TrainingPhase) {}

    /// Called at the start of each step.
    fn on_step_start(&mut self, _step: usize) {}

    /// Called at the end of each step.
    fn on_step_end(&mut self, _metrics: &StepMetrics) {}

    /// Called when a checkpoint is saved.
    fn on_save(&mut self, _path: &Path) {}
}
