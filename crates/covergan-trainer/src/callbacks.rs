//! Training callbacks for monitoring and logging.
//!
//! - [`ProgressCallback`] - Progress bar over the whole schedule
//! - [`LoggingCallback`] - Periodic `tracing` summaries
//! - [`JsonlMetricSink`] - JSONL metrics file, usable as callback or [`MetricSink`]
//! - [`SinkCallback`] - Forwards step scalars to any [`MetricSink`]
//! - [`CompositeCallback`] - Fans events out to several callbacks
//!
//! The output format of [`JsonlMetricSink`] is one JSON object per line:
//!
//! ```json
//! {"step": 1, "phase": "burn-in(0)", "alpha": 1.0, "d_loss": 2.5, "g_loss": -0.3, "timestamp": "2026-01-31T12:00:00Z"}
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use covergan_core::{MetricSink, StepMetrics, TrainingCallback, TrainingPhase};

/// Progress bar callback for training visualization.
pub struct ProgressCallback {
    progress: indicatif::ProgressBar,
}

impl ProgressCallback {
    /// Create a new progress callback over `total_steps` generator updates.
    pub fn new(total_steps: usize) -> Self {
        let progress = indicatif::ProgressBar::new(total_steps as u64);
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            progress.set_style(style.progress_chars("#>-"));
        }
        Self { progress }
    }
}

impl TrainingCallback for ProgressCallback {
    fn on_train_start(&mut self) {
        self.progress.reset();
    }

    fn on_train_end(&mut self) {
        self.progress.finish_with_message("Training complete!");
    }

    fn on_phase_start(&mut self, phase: &TrainingPhase, _steps: usize) {
        self.progress.set_prefix(phase.to_string());
    }

    fn on_step_end(&mut self, metrics: &StepMetrics) {
        self.progress.set_position(metrics.step as u64);
        self.progress.set_message(format!(
            "{} a={:.2} D={:.4} G={:.4}",
            metrics.phase, metrics.alpha, metrics.d_loss, metrics.g_loss
        ));
    }
}

/// Logging callback for training metrics.
pub struct LoggingCallback {
    log_every: usize,
}

impl LoggingCallback {
    /// Create a new logging callback.
    pub fn new(log_every: usize) -> Self {
        Self {
            log_every: log_every.max(1),
        }
    }
}

impl TrainingCallback for LoggingCallback {
    fn on_phase_start(&mut self, phase: &TrainingPhase, steps: usize) {
        tracing::info!(phase = %phase, steps, "Phase started");
    }

    fn on_phase_end(&mut self, phase: &TrainingPhase) {
        tracing::info!(phase = %phase, "Phase complete");
    }

    fn on_step_end(&mut self, metrics: &StepMetrics) {
        if metrics.step % self.log_every == 0 {
            tracing::info!(
                step = metrics.step,
                phase = %metrics.phase,
                alpha = metrics.alpha,
                images_shown = metrics.images_shown,
                d_loss = metrics.d_loss,
                gp = metrics.d_loss_gradient_penalty,
                g_loss = metrics.g_loss,
                "Training step"
            );
        }
    }

    fn on_save(&mut self, path: &Path) {
        tracing::debug!(path = %path.display(), "Checkpoint written");
    }
}

/// JSONL metrics writer.
///
/// As a [`TrainingCallback`] it writes one line per step plus lifecycle
/// events; as a [`MetricSink`] it writes one line per recorded scalar.
pub struct JsonlMetricSink {
    writer: BufWriter<File>,
    path: PathBuf,
    run_name: Option<String>,
    config: Option<serde_json::Value>,
}

impl JsonlMetricSink {
    /// Create a new JSONL metrics file, truncating an existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::open(path, false)
    }

    /// Open a metrics file for appending, e.g. when resuming a run.
    pub fn append(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::open(path, true)
    }

    fn open(path: impl AsRef<Path>, append: bool) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            run_name: None,
            config: None,
        })
    }

    /// Set an optional run name for identification.
    pub fn with_run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }

    /// Set training configuration to log at start.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Get the path to the metrics file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_entry(&mut self, entry: serde_json::Value) {
        if let Ok(line) = serde_json::to_string(&entry) {
            if let Err(e) = writeln!(self.writer, "{}", line) {
                tracing::warn!(path = %self.path.display(), "Failed to write metrics: {}", e);
            }
        }
    }

    fn write_event(&mut self, event: &str, extra: serde_json::Value) {
        let mut entry = serde_json::json!({
            "event": event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let (Some(obj), serde_json::Value::Object(fields)) = (entry.as_object_mut(), extra) {
            obj.extend(fields);
        }
        self.write_entry(entry);
        let _ = self.writer.flush();
    }
}

impl MetricSink for JsonlMetricSink {
    fn record(&mut self, step: usize, name: &str, value: f64) {
        self.write_entry(serde_json::json!({
            "step": step,
            "name": name,
            "value": value,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl TrainingCallback for JsonlMetricSink {
    fn on_train_start(&mut self) {
        let mut extra = serde_json::json!({});
        if let Some(ref name) = self.run_name {
            extra["run_name"] = serde_json::json!(name);
        }
        if let Some(ref config) = self.config {
            extra["config"] = config.clone();
        }
        self.write_event("train_start", extra);
    }

    fn on_train_end(&mut self) {
        self.write_event("train_end", serde_json::json!({}));
    }

    fn on_phase_start(&mut self, phase: &TrainingPhase, steps: usize) {
        self.write_event(
            "phase_start",
            serde_json::json!({ "phase": phase.to_string(), "steps": steps }),
        );
    }

    fn on_step_end(&mut self, metrics: &StepMetrics) {
        let mut entry = serde_json::json!({
            "step": metrics.step,
            "phase": metrics.phase.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        for (name, value) in metrics.scalars() {
            entry[name] = serde_json::json!(value);
        }
        self.write_entry(entry);

        if metrics.step % 10 == 0 {
            let _ = self.writer.flush();
        }
    }

    fn on_save(&mut self, path: &Path) {
        self.write_event(
            "checkpoint_saved",
            serde_json::json!({ "path": path.display().to_string() }),
        );
    }
}

/// Forwards every step scalar to a [`MetricSink`].
pub struct SinkCallback<S> {
    sink: S,
}

impl<S: MetricSink> SinkCallback<S> {
    /// Wrap `sink`.
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Wrapped sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Unwrap the sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: MetricSink + Send> TrainingCallback for SinkCallback<S> {
    fn on_train_end(&mut self) {
        self.sink.flush();
    }

    fn on_step_end(&mut self, metrics: &StepMetrics) {
        for (name, value) in metrics.scalars() {
            self.sink.record(metrics.step, name, value);
        }
    }
}

/// Composite callback that forwards events to multiple callbacks.
pub struct CompositeCallback {
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl CompositeCallback {
    /// Create a new empty composite callback.
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Add a callback to the composite.
    pub fn add(&mut self, callback: Box<dyn TrainingCallback>) {
        self.callbacks.push(callback);
    }

    /// Get the number of callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Check if there are no callbacks.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl Default for CompositeCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCallback for CompositeCallback {
    fn on_train_start(&mut self) {
        for cb in &mut self.callbacks {
            cb.on_train_start();
        }
    }

    fn on_train_end(&mut self) {
        for cb in &mut self.callbacks {
            cb.on_train_end();
        }
    }

    fn on_phase_start(&mut self, phase: &TrainingPhase, steps: usize) {
        for cb in &mut self.callbacks {
            cb.on_phase_start(phase, steps);
        }
    }

    fn on_phase_end(&mut self, phase: &TrainingPhase) {
        for cb in &mut self.callbacks {
            cb.on_phase_end(phase);
        }
    }

    fn on_step_start(&mut self, step: usize) {
        for cb in &mut self.callbacks {
            cb.on_step_start(step);
        }
    }

    fn on_step_end(&mut self, metrics: &StepMetrics) {
        for cb in &mut self.callbacks {
            cb.on_step_end(metrics);
        }
    }

    fn on_save(&mut self, path: &Path) {
        for cb in &mut self.callbacks {
            cb.on_save(path);
        }
    }
}
