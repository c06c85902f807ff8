//! Append-only loss history.

use std::collections::BTreeMap;

use covergan_core::MetricSink;
use serde::{Deserialize, Serialize};

/// Total critic loss, one entry per critic update.
pub const D_LOSS: &str = "D_loss";
/// Critic loss on real images.
pub const D_LOSS_POSITIVES: &str = "D_loss_positives";
/// Critic loss on generated images.
pub const D_LOSS_NEGATIVES: &str = "D_loss_negatives";
/// Gradient penalty term.
pub const D_LOSS_DUMMIES: &str = "D_loss_dummies";
/// Generator loss, one entry per generator update.
pub const G_LOSS: &str = "G_loss";

/// Every history channel.
pub const HISTORY_KEYS: [&str; 5] = [D_LOSS, D_LOSS_POSITIVES, D_LOSS_NEGATIVES, D_LOSS_DUMMIES, G_LOSS];

/// Loss values recorded over the whole run, keyed by channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    channels: BTreeMap<String, Vec<f32>>,
}

impl Default for TrainingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingHistory {
    /// Empty history with all channels present.
    pub fn new() -> Self {
        let channels = HISTORY_KEYS
            .iter()
            .map(|k| (k.to_string(), Vec::new()))
            .collect();
        Self { channels }
    }

    /// Append one critic update.
    pub fn push_discriminator(&mut self, total: f32, positives: f32, negatives: f32, penalty: f32) {
        self.push(D_LOSS, total);
        self.push(D_LOSS_POSITIVES, positives);
        self.push(D_LOSS_NEGATIVES, negatives);
        self.push(D_LOSS_DUMMIES, penalty);
    }

    /// Append one generator update.
    pub fn push_generator(&mut self, loss: f32) {
        self.push(G_LOSS, loss);
    }

    /// Append `value` to `key`, creating the channel if needed.
    pub fn push(&mut self, key: &str, value: f32) {
        self.channels.entry(key.to_string()).or_default().push(value);
    }

    /// Values of `key`.
    pub fn get(&self, key: &str) -> &[f32] {
        self.channels.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of values in `key`.
    pub fn len(&self, key: &str) -> usize {
        self.get(key).len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.channels.values().all(Vec::is_empty)
    }

    /// Mean of the last `n` values of `key`.
    pub fn recent_mean(&self, key: &str, n: usize) -> Option<f32> {
        let values = self.get(key);
        if values.is_empty() || n == 0 {
            return None;
        }
        let tail = &values[values.len().saturating_sub(n)..];
        Some(tail.iter().sum::<f32>() / tail.len() as f32)
    }

    /// Channel names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}

/// [`MetricSink`] that appends into a [`TrainingHistory`].
#[derive(Debug, Default)]
pub struct HistorySink {
    history: TrainingHistory,
}

impl HistorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded values.
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Take the recorded values.
    pub fn into_history(self) -> TrainingHistory {
        self.history
    }
}

impl MetricSink for HistorySink {
    fn record(&mut self, _step: usize, name: &str, value: f64) {
        self.history.push(name, value as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_channels() {
        let mut history = TrainingHistory::new();
        assert!(history.is_empty());
        assert_eq!(history.keys().count(), 5);

        history.push_discriminator(1.0, -0.5, 0.5, 1.0);
        history.push_discriminator(3.0, -0.5, 0.5, 3.0);
        history.push_generator(0.25);

        assert_eq!(history.len(D_LOSS), 2);
        assert_eq!(history.len(D_LOSS_DUMMIES), 2);
        assert_eq!(history.get(G_LOSS), &[0.25]);
        assert_eq!(history.recent_mean(D_LOSS, 10), Some(2.0));
        assert_eq!(history.recent_mean(D_LOSS, 1), Some(3.0));
        assert_eq!(history.recent_mean("missing", 1), None);
    }

    #[test]
    fn test_history_serde() {
        let mut history = TrainingHistory::new();
        history.push_generator(-1.5);
        let json = serde_json::to_string(&history).unwrap();
        let back: TrainingHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
    }

    #[test]
    fn test_history_sink() {
        let mut sink = HistorySink::new();
        sink.record(1, "g_loss", 0.5);
        sink.record(2, "g_loss", 0.25);
        assert_eq!(sink.history().get("g_loss"), &[0.5, 0.25]);
    }
}
