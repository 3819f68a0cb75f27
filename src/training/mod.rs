//! Training module: fit loop, callbacks, metric log and the run driver

pub mod callbacks;
pub mod checkpoint;
pub mod history;
pub mod run;
pub mod trainer;

pub use callbacks::{EarlyStopping, ReduceLrOnPlateau};
pub use checkpoint::{CheckpointMeta, ModelCheckpoint};
pub use history::{EpochRecord, History, MetricLog};
pub use run::{preflight, run_training, Preflight, RunReport};
pub use trainer::{evaluate, FitOutcome, Score, Trainer, TrainerConfig};
