//! Training loop
//!
//! A custom burn loop rather than `LearnerBuilder`: every epoch runs
//! `train_gen.len()` Adam steps on binary cross-entropy, then scores the
//! validation generator and hands `val_loss` to the callbacks (metric log,
//! best-only checkpoint, early stopping, optional plateau schedule).

use std::path::PathBuf;
use std::time::Instant;

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::callbacks::{EarlyStopping, ReduceLrOnPlateau};
use super::checkpoint::ModelCheckpoint;
use super::history::{EpochRecord, History, MetricLog};
use crate::config::{LeveeConfig, ReduceLrSection};
use crate::dataset::{DataGenerator, RasterBatch, RasterBatcher, RasterItem};
use crate::model::LeveeNet;
use crate::utils::error::{LeveeError, Result};
use crate::utils::format_duration;

/// Loss and binary accuracy over a set of samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Mean binary cross-entropy per sample
    pub loss: f64,
    /// Fraction of label entries predicted correctly at threshold 0.5
    pub accuracy: f64,
    pub samples: usize,
}

/// Running sums behind a [`Score`]
#[derive(Debug, Default)]
struct ScoreMeter {
    loss_sum: f64,
    samples: usize,
    correct: usize,
    entries: usize,
}

impl ScoreMeter {
    fn add(&mut self, batch_loss: f64, samples: usize, correct: usize, entries: usize) {
        self.loss_sum += batch_loss * samples as f64;
        self.samples += samples;
        self.correct += correct;
        self.entries += entries;
    }

    fn loss(&self) -> f64 {
        self.loss_sum / self.samples.max(1) as f64
    }

    fn score(&self) -> Option<Score> {
        (self.samples > 0).then(|| Score {
            loss: self.loss(),
            accuracy: self.correct as f64 / self.entries.max(1) as f64,
            samples: self.samples,
        })
    }
}

/// Element-wise matches between thresholded predictions and targets
pub fn correct_predictions<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2, Int>) -> usize {
    let predicted = sigmoid(logits).greater_elem(0.5).int();
    let correct: i64 = predicted.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Score `model` on the given batches without updating it
pub fn score_batches<B, I>(model: &LeveeNet<B>, batches: I, device: &B::Device) -> Result<Score>
where
    B: Backend,
    I: IntoIterator<Item = Result<Vec<RasterItem>>>,
{
    let loss_fn = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(device);
    let batcher = RasterBatcher::new();
    let mut meter = ScoreMeter::default();

    for items in batches {
        let items = items?;
        if items.is_empty() {
            continue;
        }
        let samples = items.len();
        let batch: RasterBatch<B> = batcher.batch(items, device);
        let entries = batch.targets.dims().iter().product();

        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        let correct = correct_predictions(logits, batch.targets);
        meter.add(loss.into_scalar().elem(), samples, correct, entries);
    }

    meter
        .score()
        .ok_or_else(|| LeveeError::Training("no samples to evaluate".into()))
}

/// Every sample of `generator` once, center-cropped, including the last partial batch
pub fn evaluate<B: Backend>(
    model: &LeveeNet<B>,
    generator: &DataGenerator,
    device: &B::Device,
) -> Result<Score> {
    score_batches(model, generator.sequential_batches().map(Ok), device)
}

/// Settings of a fit run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub num_epochs: usize,
    pub learning_rate: f64,
    /// Early stopping patience on `val_loss`
    pub patience: usize,
    pub weights_path: PathBuf,
    pub log_path: PathBuf,
    pub reduce_lr: Option<ReduceLrSection>,
    /// Return the best epoch's weights instead of the last ones when early
    /// stopping fires. A run that uses up `num_epochs` keeps its last weights.
    pub restore_best_weights: bool,
}

impl From<&LeveeConfig> for TrainerConfig {
    fn from(config: &LeveeConfig) -> Self {
        Self {
            num_epochs: config.train.num_epochs,
            learning_rate: config.train.learning_rate,
            patience: config.train.patience,
            weights_path: config.train.weights_path.clone(),
            log_path: config.train.log_path.clone(),
            reduce_lr: config.train.reduce_lr,
            restore_best_weights: true,
        }
    }
}

/// Result of [`Trainer::fit`]
pub struct FitOutcome<B: AutodiffBackend> {
    /// Best-epoch weights if early stopping fired and restoring is enabled,
    /// otherwise the last epoch's
    pub model: LeveeNet<B>,
    pub history: History,
    pub best_epoch: Option<usize>,
    pub stopped_epoch: Option<usize>,
}

pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn fit<B: AutodiffBackend>(
        &self,
        mut model: LeveeNet<B>,
        train_gen: &mut DataGenerator,
        val_gen: &mut DataGenerator,
        device: &B::Device,
    ) -> Result<FitOutcome<B>> {
        if train_gen.is_empty() {
            return Err(LeveeError::Training(format!(
                "training generator yields no batches ({} samples, batch size {})",
                train_gen.num_samples(),
                train_gen.config().batch_size
            )));
        }
        if val_gen.is_empty() {
            return Err(LeveeError::Training(format!(
                "validation generator yields no batches ({} samples, batch size {})",
                val_gen.num_samples(),
                val_gen.config().batch_size
            )));
        }

        let mut optimizer = AdamConfig::new().init();
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(device);
        let batcher = RasterBatcher::new();

        let metric_log = MetricLog::create(&self.config.log_path)?;
        let mut checkpoint = ModelCheckpoint::new(&self.config.weights_path);
        let mut stopper = EarlyStopping::new(self.config.patience);
        let mut plateau = self
            .config
            .reduce_lr
            .as_ref()
            .map(|settings| ReduceLrOnPlateau::new(settings, self.config.learning_rate));

        let mut lr = self.config.learning_rate;
        let mut history = History::new();
        let mut best_model: Option<LeveeNet<B>> = None;
        let steps = train_gen.len();

        info!(
            "Training for up to {} epochs: {} train batches, {} validation batches",
            self.config.num_epochs,
            steps,
            val_gen.len()
        );

        for epoch in 1..=self.config.num_epochs {
            let started = Instant::now();
            let progress = epoch_progress(epoch, self.config.num_epochs, steps);
            let mut meter = ScoreMeter::default();

            for index in 0..steps {
                let items = train_gen.batch(index)?;
                let samples = items.len();
                let batch: RasterBatch<B> = batcher.batch(items, device);
                let entries = batch.targets.dims().iter().product();

                let logits = model.forward(batch.images);
                let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
                let loss_value: f64 = loss.clone().into_scalar().elem();
                let correct = correct_predictions(logits, batch.targets);
                meter.add(loss_value, samples, correct, entries);

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(lr, model, grads);

                progress.set_message(format!("loss {:.4}", meter.loss()));
                progress.inc(1);
            }
            progress.finish_and_clear();
            train_gen.on_epoch_end();

            let train_score = meter
                .score()
                .ok_or_else(|| LeveeError::Training("epoch produced no samples".into()))?;

            let valid_model = model.valid();
            let val_steps = val_gen.len();
            let val_score = score_batches(
                &valid_model,
                (0..val_steps).map(|i| val_gen.batch(i)),
                device,
            )?;
            val_gen.on_epoch_end();

            info!(
                "Epoch {}/{} ({}) - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                epoch,
                self.config.num_epochs,
                format_duration(started.elapsed().as_secs_f64()),
                train_score.loss,
                train_score.accuracy,
                val_score.loss,
                val_score.accuracy
            );

            history.push(EpochRecord {
                epoch,
                loss: train_score.loss,
                accuracy: train_score.accuracy,
                val_loss: val_score.loss,
                val_accuracy: val_score.accuracy,
                learning_rate: lr,
            });
            metric_log.write(&history)?;

            checkpoint.on_epoch_end(epoch, val_score.loss, &model)?;
            if stopper.update(epoch, val_score.loss) && self.config.restore_best_weights {
                best_model = Some(model.clone());
            }
            if let Some(schedule) = plateau.as_mut() {
                lr = schedule.step(val_score.loss);
            }

            if stopper.should_stop() {
                break;
            }
        }

        let restore = self.config.restore_best_weights && stopper.should_stop();
        if restore && best_model.is_some() {
            info!(
                "Restoring weights from epoch {}",
                stopper.best_epoch.unwrap_or_default()
            );
        }
        let model = final_weights(model, best_model, restore);

        Ok(FitOutcome {
            model,
            history,
            best_epoch: stopper.best_epoch,
            stopped_epoch: stopper.stopped_epoch(),
        })
    }
}

/// Weights handed back by fit: the best ones only when `restore` is set
fn final_weights<M>(last: M, best: Option<M>, restore: bool) -> M {
    match best {
        Some(best) if restore => best,
        _ => last,
    }
}

fn epoch_progress(epoch: usize, epochs: usize, steps: usize) -> ProgressBar {
    let progress = ProgressBar::new(steps as u64);
    let style = ProgressStyle::default_bar()
        .template("  {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress.set_prefix(format!("Epoch {epoch}/{epochs}"));
    progress
}
