//! Training callbacks — early stopping and plateau learning-rate reduction.

use serde::{Deserialize, Serialize};

/// Action a callback can request at the end of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Early stopping on a stalled test loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    #[serde(skip)]
    counter: usize,
    #[serde(skip)]
    best_loss: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            counter: 0,
            best_loss: None,
        }
    }

    pub fn on_epoch_end(&mut self, loss: f64) -> CallbackAction {
        match self.best_loss {
            None => {
                self.best_loss = Some(loss);
                CallbackAction::Continue
            }
            Some(best) => {
                if loss < best - self.min_delta {
                    self.best_loss = Some(loss);
                    self.counter = 0;
                    CallbackAction::Continue
                } else {
                    self.counter += 1;
                    if self.counter >= self.patience {
                        CallbackAction::Stop
                    } else {
                        CallbackAction::Continue
                    }
                }
            }
        }
    }
}

/// Reduce-on-plateau learning rate schedule: halve the rate once the test loss
/// has stalled for `patience` epochs.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    lr: f64,
    counter: usize,
    best_loss: Option<f64>,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            factor,
            patience,
            min_lr: 1e-7,
            lr: initial_lr,
            counter: 0,
            best_loss: None,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Returns the new learning rate when a reduction fires.
    pub fn on_epoch_end(&mut self, loss: f64) -> Option<f64> {
        match self.best_loss {
            None => {
                self.best_loss = Some(loss);
                None
            }
            Some(best) if loss < best => {
                self.best_loss = Some(loss);
                self.counter = 0;
                None
            }
            Some(_) => {
                self.counter += 1;
                if self.counter >= self.patience && self.lr * self.factor >= self.min_lr {
                    self.counter = 0;
                    self.lr *= self.factor;
                    Some(self.lr)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_stopping_fires_after_patience_stalls() {
        let mut callback = EarlyStopping::new(2, 0.0);
        assert_eq!(callback.on_epoch_end(1.0), CallbackAction::Continue);
        assert_eq!(callback.on_epoch_end(1.0), CallbackAction::Continue);
        assert_eq!(callback.on_epoch_end(1.0), CallbackAction::Stop);
    }

    #[test]
    fn improvement_resets_early_stopping() {
        let mut callback = EarlyStopping::new(2, 0.0);
        callback.on_epoch_end(1.0);
        callback.on_epoch_end(1.0);
        assert_eq!(callback.on_epoch_end(0.5), CallbackAction::Continue);
        assert_eq!(callback.on_epoch_end(0.5), CallbackAction::Continue);
    }

    #[test]
    fn plateau_halves_learning_rate() {
        let mut scheduler = ReduceLrOnPlateau::new(1e-3, 0.5, 2);
        assert_eq!(scheduler.on_epoch_end(1.0), None);
        assert_eq!(scheduler.on_epoch_end(1.0), None);
        assert_eq!(scheduler.on_epoch_end(1.0), Some(5e-4));
        assert!((scheduler.lr() - 5e-4).abs() < 1e-12);
    }
}
