//! # levee_net
//!
//! Training driver for a convolutional levee detector on geospatial raster
//! samples, built on the Burn framework.
//!
//! ## Modules
//!
//! - `config`: TOML run configuration with typed validation
//! - `dataset`: `.npz` raster archives, train/test split and the batch generator
//! - `model`: LeveeNet CNN and weight persistence
//! - `training`: fit loop, early stopping, checkpointing, metric log and evaluation
//! - `backend`: compile-time backend selection
//! - `utils`: logging and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use levee_net::{backend, run_training, LeveeConfig};
//!
//! let config = LeveeConfig::load("configs/levee.toml".as_ref())?;
//! let report = run_training::<backend::TrainingBackend>(&config, &backend::default_device())?;
//! println!("Test accuracy: {}", report.test_score.accuracy);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

pub use config::LeveeConfig;
pub use dataset::{DataGenerator, DatasetSplit, GeneratorConfig, RasterDataset, RasterItem};
pub use model::{LeveeNet, LeveeNetConfig};
pub use training::{preflight, run_training, Preflight, RunReport, Score};
pub use utils::error::{LeveeError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
