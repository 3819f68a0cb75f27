//! Training configuration.
//!
//! The configuration is a TOML file with `[model]`, `[generator]`, `[train]`
//! and `[data]` sections. Every value is type checked on load and a wrong type
//! fails immediately with a message naming the key, the expected type and the
//! type that was found.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use toml::{Table, Value};
use tracing::info;

use crate::utils::error::{LeveeError, Result};

/// Default early stopping patience on `val_loss`
pub const DEFAULT_PATIENCE: usize = 5;
/// Default Adam learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 1e-3;
/// Default location of the best-only weight checkpoint
pub const DEFAULT_WEIGHTS_PATH: &str = "./model_weights";

/// Full driver configuration
#[derive(Debug, Clone, Serialize)]
pub struct LeveeConfig {
    pub model: ModelSection,
    pub generator: GeneratorSection,
    pub train: TrainSection,
    pub data: DataSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSection {
    /// Number of output classes
    pub n_classes: usize,
    /// Where the trained model is written
    pub model_outpath: PathBuf,
    /// Filters in the first convolutional block
    pub base_filters: usize,
    /// Dropout before the classifier
    pub dropout: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorSection {
    /// Spatial window `(height, width)` fed to the network
    pub image_size: (usize, usize),
    /// Crops are rounded down to a multiple of this factor
    pub max_pool: Option<usize>,
    /// Reshuffle sample order at the end of every epoch
    pub shuffle: bool,
    /// Random flips, rotations and crop offsets
    pub augment: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainSection {
    pub batch_size: usize,
    pub num_epochs: usize,
    /// Directory receiving the per-epoch metric log
    pub log_path: PathBuf,
    /// Fraction of samples used for training; the rest is the test split
    pub split: f64,
    pub learning_rate: f64,
    /// Epochs without `val_loss` improvement before stopping
    pub patience: usize,
    /// Best-only weight checkpoint
    pub weights_path: PathBuf,
    /// Seed for split, shuffling and augmentation. Random when absent.
    pub seed: Option<u64>,
    pub reduce_lr: Option<ReduceLrSection>,
}

/// Reduce-on-plateau settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ReduceLrSection {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
}

impl Default for ReduceLrSection {
    fn default() -> Self {
        Self {
            factor: 0.5,
            patience: 2,
            min_lr: 1e-7,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DataSection {
    /// `.npz` archive holding `features` and `labels`
    pub data_path: PathBuf,
}

impl LeveeConfig {
    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LeveeError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from TOML text. Does not validate ranges.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let root: Table = toml::from_str(content)
            .map_err(|e| LeveeError::Config(format!("Failed to parse config: {e}")))?;

        let model = section(&root, "model")?;
        let generator = section(&root, "generator")?;
        let train = section(&root, "train")?;
        let data = section(&root, "data")?;

        let reduce_lr = match train.get("reduce_lr") {
            None => None,
            Some(Value::Table(t)) => {
                let defaults = ReduceLrSection::default();
                Some(ReduceLrSection {
                    factor: opt_float(t, "factor")?.unwrap_or(defaults.factor),
                    patience: opt_int(t, "patience")?.unwrap_or(defaults.patience),
                    min_lr: opt_float(t, "min_lr")?.unwrap_or(defaults.min_lr),
                })
            }
            Some(other) => return Err(type_error("reduce_lr", "table", other)),
        };

        Ok(Self {
            model: ModelSection {
                n_classes: req_int(model, "n_classes")?,
                model_outpath: req_path(model, "model_outpath")?,
                base_filters: opt_int(model, "base_filters")?.unwrap_or(16),
                dropout: opt_float(model, "dropout")?.unwrap_or(0.3),
            },
            generator: GeneratorSection {
                image_size: req_pair(generator, "image_size")?,
                max_pool: opt_int(generator, "max_pool")?,
                shuffle: req_bool(generator, "shuffle")?,
                augment: req_bool(generator, "augment")?,
            },
            train: TrainSection {
                batch_size: req_int(train, "batch_size")?,
                num_epochs: req_int(train, "num_epochs")?,
                log_path: req_path(train, "log_path")?,
                split: req_float(train, "split")?,
                learning_rate: opt_float(train, "learning_rate")?
                    .unwrap_or(DEFAULT_LEARNING_RATE),
                patience: opt_int(train, "patience")?.unwrap_or(DEFAULT_PATIENCE),
                weights_path: opt_path(train, "weights_path")?
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_WEIGHTS_PATH)),
                seed: opt_int::<u64>(train, "seed")?,
                reduce_lr,
            },
            data: DataSection {
                data_path: req_path(data, "data_path")?,
            },
        })
    }

    /// Check value ranges that the type system cannot express
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(LeveeError::Config(msg));

        if self.model.n_classes == 0 {
            return bad("n_classes must be greater than 0".into());
        }
        if self.model.base_filters == 0 {
            return bad("base_filters must be greater than 0".into());
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return bad(format!("dropout must be in [0, 1), got {}", self.model.dropout));
        }

        let (height, width) = self.generator.image_size;
        if height == 0 || width == 0 {
            return bad(format!("image_size must be positive, got ({height}, {width})"));
        }
        if let Some(pool) = self.generator.max_pool {
            if pool == 0 {
                return bad("max_pool must be None or a positive int, got 0".into());
            }
            if height < pool || width < pool {
                return bad(format!(
                    "image_size ({height}, {width}) is smaller than max_pool {pool}"
                ));
            }
        }

        if self.train.batch_size == 0 {
            return bad("batch_size must be greater than 0".into());
        }
        if self.train.num_epochs == 0 {
            return bad("num_epochs must be greater than 0".into());
        }
        if !(self.train.split > 0.0 && self.train.split < 1.0) {
            return bad(format!("split must be in (0, 1), got {}", self.train.split));
        }
        // written so NaN fails too
        if !(self.train.learning_rate > 0.0) {
            return bad(format!(
                "learning_rate must be positive, got {}",
                self.train.learning_rate
            ));
        }
        if let Some(reduce) = &self.train.reduce_lr {
            if !(reduce.factor > 0.0 && reduce.factor < 1.0) {
                return bad(format!("reduce_lr.factor must be in (0, 1), got {}", reduce.factor));
            }
            if !(reduce.min_lr >= 0.0) {
                return bad(format!("reduce_lr.min_lr must be >= 0, got {}", reduce.min_lr));
            }
            if reduce.patience == 0 {
                return bad("reduce_lr.patience must be greater than 0".into());
            }
        }

        Ok(())
    }

    /// Write the effective configuration as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn log_summary(&self) {
        info!("Configuration Summary:");
        info!("  Classes:        {}", self.model.n_classes);
        info!("  Model out:      {}", self.model.model_outpath.display());
        info!("  Image size:     {:?}", self.generator.image_size);
        info!("  Max pool:       {:?}", self.generator.max_pool);
        info!("  Shuffle:        {}", self.generator.shuffle);
        info!("  Augment:        {}", self.generator.augment);
        info!("  Batch size:     {}", self.train.batch_size);
        info!("  Epochs:         {}", self.train.num_epochs);
        info!("  Split:          {}", self.train.split);
        info!("  Learning rate:  {}", self.train.learning_rate);
        info!("  Patience:       {}", self.train.patience);
        info!("  Log path:       {}", self.train.log_path.display());
        info!("  Weights path:   {}", self.train.weights_path.display());
        info!("  Data path:      {}", self.data.data_path.display());
    }
}

fn section<'a>(root: &'a Table, name: &str) -> Result<&'a Table> {
    match root.get(name) {
        Some(Value::Table(t)) => Ok(t),
        Some(other) => Err(type_error(name, "table", other)),
        None => Err(LeveeError::Config(format!("missing section [{name}]"))),
    }
}

fn type_error(key: &str, expected: &str, found: &Value) -> LeveeError {
    LeveeError::Config(format!(
        "{key} must be {expected}, but got {}",
        found.type_str()
    ))
}

fn missing(key: &str) -> LeveeError {
    LeveeError::Config(format!("missing required key `{key}`"))
}

fn opt_int<T: TryFrom<i64>>(table: &Table, key: &str) -> Result<Option<T>> {
    match table.get(key) {
        None => Ok(None),
        Some(Value::Integer(i)) => T::try_from(*i).map(Some).map_err(|_| {
            LeveeError::Config(format!("{key} must be a non-negative int, got {i}"))
        }),
        Some(other) => Err(type_error(key, "int", other)),
    }
}

fn req_int<T: TryFrom<i64>>(table: &Table, key: &str) -> Result<T> {
    opt_int(table, key)?.ok_or_else(|| missing(key))
}

fn opt_float(table: &Table, key: &str) -> Result<Option<f64>> {
    match table.get(key) {
        None => Ok(None),
        Some(Value::Float(f)) => Ok(Some(*f)),
        Some(Value::Integer(i)) => Ok(Some(*i as f64)),
        Some(other) => Err(type_error(key, "float", other)),
    }
}

fn req_float(table: &Table, key: &str) -> Result<f64> {
    opt_float(table, key)?.ok_or_else(|| missing(key))
}

fn req_bool(table: &Table, key: &str) -> Result<bool> {
    match table.get(key) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(other) => Err(type_error(key, "bool", other)),
        None => Err(missing(key)),
    }
}

fn opt_path(table: &Table, key: &str) -> Result<Option<PathBuf>> {
    match table.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(PathBuf::from(s))),
        Some(other) => Err(type_error(key, "a path string", other)),
    }
}

fn req_path(table: &Table, key: &str) -> Result<PathBuf> {
    opt_path(table, key)?.ok_or_else(|| missing(key))
}

fn req_pair(table: &Table, key: &str) -> Result<(usize, usize)> {
    let value = table.get(key).ok_or_else(|| missing(key))?;
    let Value::Array(items) = value else {
        return Err(type_error(key, "tuple", value));
    };
    let dims: Vec<usize> = items
        .iter()
        .map(|v| match v {
            Value::Integer(i) if *i >= 0 => Ok(*i as usize),
            other => Err(type_error(key, "tuple of ints", other)),
        })
        .collect::<Result<_>>()?;

    match dims.as_slice() {
        [h, w] => Ok((*h, *w)),
        _ => Err(LeveeError::Config(format!(
            "{key} must be tuple of (height, width), but got {} values",
            dims.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [model]
        n_classes = 2
        model_outpath = "out/levee_net"

        [generator]
        image_size = [32, 32]
        max_pool = 8
        shuffle = true
        augment = false

        [train]
        batch_size = 4
        num_epochs = 10
        log_path = "logs"
        split = 0.8

        [data]
        data_path = "data/levees.npz"
    "#;

    #[test]
    fn test_parse_sample_with_defaults() {
        let config = LeveeConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.model.n_classes, 2);
        assert_eq!(config.generator.image_size, (32, 32));
        assert_eq!(config.generator.max_pool, Some(8));
        assert_eq!(config.train.patience, DEFAULT_PATIENCE);
        assert_eq!(config.train.learning_rate, DEFAULT_LEARNING_RATE);
        assert_eq!(config.train.weights_path, PathBuf::from(DEFAULT_WEIGHTS_PATH));
        assert!(config.train.seed.is_none());
        assert!(config.train.reduce_lr.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wrong_type_is_reported_by_key() {
        let text = SAMPLE.replace("n_classes = 2", "n_classes = \"two\"");
        let err = LeveeConfig::from_toml_str(&text).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: n_classes must be int, but got string"
        );
    }

    #[test]
    fn test_image_size_must_be_pair() {
        let text = SAMPLE.replace("image_size = [32, 32]", "image_size = 32");
        let err = LeveeConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("image_size must be tuple"));

        let text = SAMPLE.replace("image_size = [32, 32]", "image_size = [32, 32, 3]");
        assert!(LeveeConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_max_pool_absent_means_none() {
        let text = SAMPLE.replace("max_pool = 8", "");
        let config = LeveeConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.generator.max_pool, None);

        let text = SAMPLE.replace("max_pool = 8", "max_pool = 2.5");
        let err = LeveeConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("max_pool must be int, but got float"));
    }

    #[test]
    fn test_validation_ranges() {
        let mut config = LeveeConfig::from_toml_str(SAMPLE).unwrap();
        config.train.split = 1.0;
        assert!(config.validate().is_err());

        let mut config = LeveeConfig::from_toml_str(SAMPLE).unwrap();
        config.generator.max_pool = Some(64);
        assert!(config.validate().is_err());

        let mut config = LeveeConfig::from_toml_str(SAMPLE).unwrap();
        config.train.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rates_reject_nan_and_negative() {
        let mut config = LeveeConfig::from_toml_str(SAMPLE).unwrap();
        config.train.learning_rate = f64::NAN;
        assert!(config.validate().is_err());
        config.train.learning_rate = -1e-3;
        assert!(config.validate().is_err());

        let with_reduce = |reduce: ReduceLrSection| {
            let mut config = LeveeConfig::from_toml_str(SAMPLE).unwrap();
            config.train.reduce_lr = Some(reduce);
            config.validate()
        };
        assert!(with_reduce(ReduceLrSection::default()).is_ok());
        assert!(with_reduce(ReduceLrSection { min_lr: 0.0, ..Default::default() }).is_ok());
        assert!(with_reduce(ReduceLrSection { min_lr: -1e-6, ..Default::default() }).is_err());
        assert!(with_reduce(ReduceLrSection { min_lr: f64::NAN, ..Default::default() }).is_err());
        assert!(with_reduce(ReduceLrSection { factor: f64::NAN, ..Default::default() }).is_err());
        assert!(with_reduce(ReduceLrSection { patience: 0, ..Default::default() }).is_err());
    }

    #[test]
    fn test_reduce_lr_table() {
        let text = format!("{SAMPLE}\n[train.reduce_lr]\nfactor = 0.2\n");
        let config = LeveeConfig::from_toml_str(&text).unwrap();
        let reduce = config.train.reduce_lr.unwrap();
        assert_eq!(reduce.factor, 0.2);
        assert_eq!(reduce.patience, ReduceLrSection::default().patience);
    }

    #[test]
    fn test_missing_section() {
        let err = LeveeConfig::from_toml_str("[model]\nn_classes = 1\n").unwrap_err();
        assert!(err.to_string().contains("model_outpath") || err.to_string().contains("section"));
    }
}
