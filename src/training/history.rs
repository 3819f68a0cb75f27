//! Per-epoch metric history and its on-disk log.
//!
//! `MetricLog` rewrites `metrics.csv` and `history.json` under the log
//! directory after every epoch, so a run that is interrupted still leaves a
//! complete record of the epochs it finished.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::Result;

pub const CSV_FILE: &str = "metrics.csv";
pub const JSON_FILE: &str = "history.json";

/// Metrics of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Epoch with the lowest validation loss
    pub fn best(&self) -> Option<&EpochRecord> {
        self.epochs
            .iter()
            .filter(|r| !r.val_loss.is_nan())
            .min_by(|a, b| a.val_loss.total_cmp(&b.val_loss))
    }

    pub fn to_csv(&self) -> String {
        let mut csv = String::from("epoch,loss,accuracy,val_loss,val_accuracy,learning_rate\n");
        for r in &self.epochs {
            csv.push_str(&format!(
                "{},{:.6},{:.6},{:.6},{:.6},{:.6e}\n",
                r.epoch, r.loss, r.accuracy, r.val_loss, r.val_accuracy, r.learning_rate
            ));
        }
        csv
    }
}

/// Metric files under the configured log directory
#[derive(Debug, Clone)]
pub struct MetricLog {
    dir: PathBuf,
}

impl MetricLog {
    /// Create the log directory
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join(CSV_FILE)
    }

    pub fn json_path(&self) -> PathBuf {
        self.dir.join(JSON_FILE)
    }

    pub fn write(&self, history: &History) -> Result<()> {
        fs::write(self.csv_path(), history.to_csv())?;
        fs::write(self.json_path(), serde_json::to_string_pretty(history)?)?;
        debug!("Wrote {} epochs to {}", history.len(), self.dir.display());
        Ok(())
    }

    pub fn read(&self) -> Result<History> {
        let json = fs::read_to_string(self.json_path())?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(epoch: usize, val_loss: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            loss: 0.5,
            accuracy: 0.75,
            val_loss,
            val_accuracy: 0.5,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_best_epoch() {
        let mut history = History::new();
        assert!(history.best().is_none());
        history.push(record(1, 0.9));
        history.push(record(2, 0.3));
        history.push(record(3, f64::NAN));
        history.push(record(4, 0.4));
        assert_eq!(history.best().unwrap().epoch, 2);
        assert_eq!(history.last().unwrap().epoch, 4);
    }

    #[test]
    fn test_csv_layout() {
        let mut history = History::new();
        history.push(record(1, 0.25));
        let csv = history.to_csv();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "epoch,loss,accuracy,val_loss,val_accuracy,learning_rate");
        assert!(lines[1].starts_with("1,0.500000,0.750000,0.250000,0.500000,"));
    }

    #[test]
    fn test_metric_log_writes_both_files() {
        let dir = TempDir::new().unwrap();
        let log = MetricLog::create(dir.path().join("logs")).unwrap();

        let mut history = History::new();
        history.push(record(1, 0.8));
        log.write(&history).unwrap();
        history.push(record(2, 0.6));
        log.write(&history).unwrap();

        assert!(log.csv_path().exists());
        assert_eq!(log.read().unwrap(), history);
        let csv = fs::read_to_string(log.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }
}
