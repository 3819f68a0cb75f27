//! Epoch-end callbacks driven by the validation loss.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ReduceLrSection;

/// Stops training once `val_loss` has not improved for `patience` epochs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub best: f64,
    pub best_epoch: Option<usize>,
    /// Consecutive epochs without improvement
    pub wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    /// Record the monitored value of `epoch`. Returns true when it is a new best.
    pub fn update(&mut self, epoch: usize, val_loss: f64) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return true;
        }

        self.wait += 1;
        if self.wait >= self.patience && self.stopped_epoch.is_none() {
            self.stopped_epoch = Some(epoch);
            info!(
                "Early stopping at epoch {}: val_loss has not improved since epoch {}",
                epoch,
                self.best_epoch.map_or_else(|| "-".to_string(), |e| e.to_string())
            );
        }
        false
    }

    pub fn should_stop(&self) -> bool {
        self.stopped_epoch.is_some()
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

/// Multiplies the learning rate by `factor` after `patience` epochs without improvement
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best: f64,
    wait: usize,
    current_lr: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(settings: &ReduceLrSection, initial_lr: f64) -> Self {
        Self {
            factor: settings.factor,
            patience: settings.patience,
            min_lr: settings.min_lr,
            best: f64::INFINITY,
            wait: 0,
            current_lr: initial_lr,
        }
    }

    pub fn lr(&self) -> f64 {
        self.current_lr
    }

    /// Feed the epoch's `val_loss`, returns the learning rate for the next epoch
    pub fn step(&mut self, val_loss: f64) -> f64 {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return self.current_lr;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            let reduced = (self.current_lr * self.factor).max(self.min_lr);
            if reduced < self.current_lr {
                info!("Reducing learning rate: {:.2e} -> {:.2e}", self.current_lr, reduced);
                self.current_lr = reduced;
            }
            self.wait = 0;
        }
        self.current_lr
    }
}
