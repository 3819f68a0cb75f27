//! Dataset module: raster archives, splitting, batch generation
//!
//! - `raster`: `.npz` archive loading and sample subsets
//! - `split`: random train/test split over the sample axis
//! - `generator`: per-epoch batch generator with cropping and shuffling
//! - `augmentation`: geometric augmentation of raster windows
//! - `batcher`: conversion of items into Burn tensors

pub mod augmentation;
pub mod batcher;
pub mod generator;
pub mod raster;
pub mod split;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use batcher::{RasterBatch, RasterBatcher};
pub use generator::{pooled_size, DataGenerator, GeneratorConfig};
pub use raster::{RasterDataset, RasterItem, RasterSubset};
pub use split::{train_test_split, DatasetSplit};
