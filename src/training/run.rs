//! End-to-end training driver
//!
//! Load dataset, split, build generators and model, fit, save, evaluate.

use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::history::History;
use super::trainer::{evaluate, Score, Trainer, TrainerConfig};
use crate::config::LeveeConfig;
use crate::dataset::split::train_count;
use crate::dataset::{train_test_split, DataGenerator, GeneratorConfig, RasterDataset};
use crate::model::{cnn::DEFAULT_BLOCKS, save_weights, LeveeNetConfig};
use crate::utils::error::{LeveeError, Result};

/// What a dry run found out about the configured dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preflight {
    pub samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub spatial_dims: (usize, usize),
    pub channels: usize,
    /// Window after `max_pool` rounding
    pub output_size: (usize, usize),
    pub train_batches: usize,
    pub test_batches: usize,
}

/// Summary of a finished training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub seed: u64,
    pub train_samples: usize,
    pub test_samples: usize,
    pub history: History,
    pub best_epoch: Option<usize>,
    pub stopped_epoch: Option<usize>,
    pub test_score: Score,
    /// Weights file of the saved model
    pub model_path: PathBuf,
}

/// Location of the saved model weights
pub fn model_weights_file(model_outpath: &Path) -> PathBuf {
    model_outpath.with_extension("mpk")
}

/// Location of the architecture JSON saved next to the model
pub fn model_config_file(model_outpath: &Path) -> PathBuf {
    model_outpath.with_extension("model.json")
}

/// Location of the run configuration saved next to the model
pub fn run_config_file(model_outpath: &Path) -> PathBuf {
    model_outpath.with_extension("config.json")
}

fn generator_config(config: &LeveeConfig) -> GeneratorConfig {
    GeneratorConfig {
        n_classes: config.model.n_classes,
        batch_size: config.train.batch_size,
        image_size: config.generator.image_size,
        max_pool: config.generator.max_pool,
        shuffle: config.generator.shuffle,
        augment: config.generator.augment,
    }
}

/// Check the dataset against the configuration without training
fn inspect(dataset: &RasterDataset, config: &LeveeConfig) -> Result<Preflight> {
    if dataset.num_classes() != config.model.n_classes {
        return Err(LeveeError::Shape(format!(
            "labels have {} classes but n_classes is {}",
            dataset.num_classes(),
            config.model.n_classes
        )));
    }

    let output_size = generator_config(config).output_size();
    let (height, width) = dataset.spatial_dims();
    if output_size.0 > height || output_size.1 > width {
        return Err(LeveeError::Shape(format!(
            "window {:?} does not fit in {}x{} samples",
            output_size, height, width
        )));
    }

    let samples = dataset.num_samples();
    let train_samples = train_count(samples, config.train.split);
    let test_samples = samples - train_samples;
    let batch_size = config.train.batch_size;

    let preflight = Preflight {
        samples,
        train_samples,
        test_samples,
        spatial_dims: (height, width),
        channels: dataset.num_channels(),
        output_size,
        train_batches: train_samples / batch_size,
        test_batches: test_samples / batch_size,
    };

    if preflight.train_batches == 0 || preflight.test_batches == 0 {
        return Err(LeveeError::Dataset(format!(
            "{} train / {} test samples are too few for batch size {}",
            train_samples, test_samples, batch_size
        )));
    }
    Ok(preflight)
}

/// Load the dataset and validate it against `config`
pub fn preflight(config: &LeveeConfig) -> Result<Preflight> {
    let dataset = RasterDataset::open(&config.data.data_path)?;
    inspect(&dataset, config)
}

/// Architecture for the configured window and dataset bands
fn model_config(config: &LeveeConfig, preflight: &Preflight) -> LeveeNetConfig {
    let (height, width) = preflight.output_size;
    let blocks = LeveeNetConfig::blocks_for_input(height, width);
    if blocks < DEFAULT_BLOCKS {
        warn!(
            "Window {}x{} only allows {} pooling blocks",
            height, width, blocks
        );
    }

    let model_config = LeveeNetConfig::new(config.model.n_classes)
        .with_in_channels(preflight.channels)
        .with_base_filters(config.model.base_filters)
        .with_dropout(config.model.dropout)
        .with_num_blocks(blocks);

    let factor = model_config.pool_factor();
    if height % factor != 0 || width % factor != 0 {
        info!(
            "Window {}x{} is not a multiple of the pool factor {}; set max_pool = {} to avoid edge loss",
            height, width, factor, factor
        );
    }
    model_config
}

/// Train a model as described by `config` and evaluate it on the held-out split
pub fn run_training<B: AutodiffBackend>(config: &LeveeConfig, device: &B::Device) -> Result<RunReport> {
    let dataset = RasterDataset::open(&config.data.data_path)?;
    let preflight = inspect(&dataset, config)?;
    info!("Positive labels per class: {:?}", dataset.class_counts());

    let seed = config
        .train
        .seed
        .unwrap_or_else(|| rand::thread_rng().gen());
    info!("Random seed: {}", seed);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let split = train_test_split(dataset.num_samples(), config.train.split, &mut rng);
    info!(
        "Split {} samples: {} train, {} test",
        split.total(),
        split.train.len(),
        split.test.len()
    );

    let gen_config = generator_config(config);
    let mut train_gen = DataGenerator::new(
        dataset.select(&split.train)?,
        gen_config.clone(),
        seed.wrapping_add(1),
    )?;
    let mut test_gen = DataGenerator::new(
        dataset.select(&split.test)?,
        gen_config,
        seed.wrapping_add(2),
    )?;

    let model_config = model_config(config, &preflight);
    let model = model_config.init::<B>(device);

    let trainer = Trainer::new(TrainerConfig::from(config));
    let outcome = trainer.fit(model, &mut train_gen, &mut test_gen, device)?;

    let outpath = &config.model.model_outpath;
    save_weights(&outcome.model, outpath)?;
    model_config
        .save(model_config_file(outpath))
        .map_err(|e| LeveeError::Model(format!("Failed to save model config: {e}")))?;
    config.save(&run_config_file(outpath))?;
    info!("Model saved to {}", model_weights_file(outpath).display());

    let test_score = evaluate(&outcome.model.valid(), &test_gen, device)?;
    info!("Test score: {}", test_score.loss);
    info!("Test accuracy: {}", test_score.accuracy);

    Ok(RunReport {
        seed,
        train_samples: split.train.len(),
        test_samples: split.test.len(),
        history: outcome.history,
        best_epoch: outcome.best_epoch,
        stopped_epoch: outcome.stopped_epoch,
        test_score,
        model_path: model_weights_file(outpath),
    })
}
