//! Training metrics tracking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Loss histories and summary scalars for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    pub train_loss_history: Vec<f64>,
    pub test_loss_history: Vec<f64>,
    pub custom_metrics: HashMap<String, Vec<f64>>,
    pub best_epoch: Option<usize>,
    pub best_test_loss: Option<f64>,
    pub total_training_time_secs: f64,
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self {
            epochs_completed: 0,
            train_loss_history: Vec::new(),
            test_loss_history: Vec::new(),
            custom_metrics: HashMap::new(),
            best_epoch: None,
            best_test_loss: None,
            total_training_time_secs: 0.0,
        }
    }
}

impl TrainingMetrics {
    /// Record one epoch; returns true when the test loss improved.
    pub fn record_epoch(&mut self, train_loss: f64, test_loss: f64) -> bool {
        self.train_loss_history.push(train_loss);
        self.test_loss_history.push(test_loss);
        self.epochs_completed += 1;

        let improved = self.best_test_loss.map_or(true, |best| test_loss < best);
        if improved {
            self.best_test_loss = Some(test_loss);
            self.best_epoch = Some(self.epochs_completed);
        }
        improved
    }

    pub fn add_custom_metric(&mut self, name: &str, value: f64) {
        self.custom_metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    /// Sweep metric: the minimum test loss seen.
    pub fn min_test_loss(&self) -> Option<f64> {
        self.best_test_loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_epoch_tracks_best() {
        let mut metrics = TrainingMetrics::default();
        assert!(metrics.record_epoch(0.5, 0.6));
        assert!(metrics.record_epoch(0.3, 0.4));
        assert!(!metrics.record_epoch(0.2, 0.7));
        assert_eq!(metrics.epochs_completed, 3);
        assert_eq!(metrics.best_epoch, Some(2));
        assert_eq!(metrics.best_test_loss, Some(0.4));
        assert_eq!(metrics.min_test_loss(), Some(0.4));
    }
}
