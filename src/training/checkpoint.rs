//! Best-only weight checkpointing.
//!
//! Weights go through burn's `CompactRecorder` to `<weights_path>.mpk`; a
//! small JSON sidecar at `<weights_path>.json` records which epoch they came
//! from and the monitored value.

use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{save_weights, LeveeNet};
use crate::utils::error::Result;

/// Quantity watched by the checkpoint and the early stopping callback
pub const MONITOR: &str = "val_loss";

/// Description of the weights currently on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub monitor: String,
    pub value: f64,
    pub timestamp: String,
}

impl CheckpointMeta {
    pub fn new(epoch: usize, value: f64) -> Self {
        Self {
            epoch,
            monitor: MONITOR.to_string(),
            value,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Saves weights whenever the monitored value reaches a new minimum
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    weights_path: PathBuf,
    best: f64,
    last_saved: Option<CheckpointMeta>,
}

impl ModelCheckpoint {
    pub fn new(weights_path: impl Into<PathBuf>) -> Self {
        Self {
            weights_path: weights_path.into(),
            best: f64::INFINITY,
            last_saved: None,
        }
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    /// Location of the JSON sidecar
    pub fn meta_path(&self) -> PathBuf {
        self.weights_path.with_extension("json")
    }

    pub fn last_saved(&self) -> Option<&CheckpointMeta> {
        self.last_saved.as_ref()
    }

    /// Write `model` if `value` improves on every earlier epoch. Returns whether it did.
    pub fn on_epoch_end<B: Backend>(
        &mut self,
        epoch: usize,
        value: f64,
        model: &LeveeNet<B>,
    ) -> Result<bool> {
        if value.is_nan() || value >= self.best {
            debug!(
                "Epoch {}: {} did not improve from {:.5}",
                epoch, MONITOR, self.best
            );
            return Ok(false);
        }

        info!(
            "Epoch {}: {} improved from {:.5} to {:.5}, saving weights to {}",
            epoch,
            MONITOR,
            self.best,
            value,
            self.weights_path.display()
        );
        self.best = value;

        save_weights(model, &self.weights_path)?;
        let meta = CheckpointMeta::new(epoch, value);
        meta.save(&self.meta_path())?;
        self.last_saved = Some(meta);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LeveeNetConfig;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_saves_only_on_improvement() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = LeveeNetConfig::new(1)
            .with_base_filters(2)
            .with_num_blocks(1)
            .init::<TestBackend>(&device);

        let mut checkpoint = ModelCheckpoint::new(dir.path().join("best"));
        assert!(checkpoint.on_epoch_end(1, 0.7, &model).unwrap());
        assert!(!checkpoint.on_epoch_end(2, 0.9, &model).unwrap());
        assert!(checkpoint.on_epoch_end(3, 0.4, &model).unwrap());

        assert!(dir.path().join("best.mpk").exists());
        let meta = CheckpointMeta::load(&checkpoint.meta_path()).unwrap();
        assert_eq!(meta.epoch, 3);
        assert_eq!(meta.monitor, MONITOR);
        assert_eq!(meta.value, 0.4);
        assert_eq!(checkpoint.last_saved(), Some(&meta));
    }

    #[test]
    fn test_nan_is_never_saved() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = LeveeNetConfig::new(1)
            .with_base_filters(2)
            .with_num_blocks(1)
            .init::<TestBackend>(&device);

        let mut checkpoint = ModelCheckpoint::new(dir.path().join("best"));
        assert!(!checkpoint.on_epoch_end(1, f64::NAN, &model).unwrap());
        assert!(!dir.path().join("best.mpk").exists());
    }
}
