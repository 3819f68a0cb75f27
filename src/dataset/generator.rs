//! On-the-fly batch generator.
//!
//! `DataGenerator` follows the sequence contract of the training loop:
//! `len()` batches per epoch, `batch(index)` for each of them and
//! `on_epoch_end()` between epochs. Each sample is cropped to the output
//! window when it is fetched. With `max_pool` set, the window is rounded down
//! so both sides are divisible by the pooling factor.

use burn::data::dataset::Dataset;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::augmentation::{AugmentationConfig, Augmenter};
use super::raster::{RasterItem, RasterSubset};
use crate::utils::error::{LeveeError, Result};

/// Parameters shared by the training and validation generators
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub n_classes: usize,
    pub batch_size: usize,
    /// Requested `(height, width)` window
    pub image_size: (usize, usize),
    pub max_pool: Option<usize>,
    pub shuffle: bool,
    pub augment: bool,
}

impl GeneratorConfig {
    /// Window actually emitted, after rounding to the pooling factor
    pub fn output_size(&self) -> (usize, usize) {
        pooled_size(self.image_size, self.max_pool)
    }
}

/// Round each side down to a multiple of `max_pool`
pub fn pooled_size(image_size: (usize, usize), max_pool: Option<usize>) -> (usize, usize) {
    match max_pool {
        Some(pool) if pool > 0 => (
            image_size.0 - image_size.0 % pool,
            image_size.1 - image_size.1 % pool,
        ),
        _ => image_size,
    }
}

pub struct DataGenerator {
    subset: RasterSubset,
    config: GeneratorConfig,
    output_size: (usize, usize),
    augmenter: Option<Augmenter>,
    /// Positions into `subset`, in the order batches are drawn
    order: Vec<usize>,
    rng: ChaCha8Rng,
}

impl std::fmt::Debug for DataGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataGenerator")
            .field("samples", &self.subset.len())
            .field("config", &self.config)
            .field("output_size", &self.output_size)
            .finish()
    }
}

impl DataGenerator {
    pub fn new(subset: RasterSubset, config: GeneratorConfig, seed: u64) -> Result<Self> {
        Self::with_augmentation(subset, config, AugmentationConfig::default(), seed)
    }

    pub fn with_augmentation(
        subset: RasterSubset,
        config: GeneratorConfig,
        augmentation: AugmentationConfig,
        seed: u64,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(LeveeError::Config("batch_size must be greater than 0".into()));
        }
        if subset.num_classes() != config.n_classes {
            return Err(LeveeError::Shape(format!(
                "labels have {} classes but n_classes is {}",
                subset.num_classes(),
                config.n_classes
            )));
        }

        let output_size = config.output_size();
        let (height, width) = subset.spatial_dims();
        if output_size.0 == 0 || output_size.1 == 0 {
            return Err(LeveeError::Shape(format!(
                "image_size {:?} with max_pool {:?} leaves an empty window",
                config.image_size, config.max_pool
            )));
        }
        if output_size.0 > height || output_size.1 > width {
            return Err(LeveeError::Shape(format!(
                "window {:?} does not fit in {}x{} samples",
                output_size, height, width
            )));
        }

        let augmenter =
            (config.augment && !augmentation.is_identity()).then(|| Augmenter::new(augmentation));
        let order = (0..subset.len()).collect();

        let mut generator = Self {
            subset,
            config,
            output_size,
            augmenter,
            order,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        if generator.config.shuffle {
            generator.order.shuffle(&mut generator.rng);
        }

        debug!("{:?}", generator);
        Ok(generator)
    }

    /// Batches per epoch. A trailing partial batch is dropped.
    pub fn len(&self) -> usize {
        self.subset.len() / self.config.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_samples(&self) -> usize {
        self.subset.len()
    }

    pub fn output_size(&self) -> (usize, usize) {
        self.output_size
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn num_channels(&self) -> usize {
        self.subset.num_channels()
    }

    /// Items of batch `index`, cropped and (if enabled) augmented
    pub fn batch(&mut self, index: usize) -> Result<Vec<RasterItem>> {
        if index >= self.len() {
            return Err(LeveeError::Dataset(format!(
                "batch {index} out of range for {} batches",
                self.len()
            )));
        }

        let start = index * self.config.batch_size;
        let positions = self.order[start..start + self.config.batch_size].to_vec();

        let mut items = Vec::with_capacity(positions.len());
        for position in positions {
            let item = self.subset.get(position).ok_or_else(|| {
                LeveeError::Dataset(format!(
                    "position {position} has no sample in a subset of {}",
                    self.subset.len()
                ))
            })?;
            let item = if self.config.augment {
                self.random_crop(&item)
            } else {
                self.center_crop(&item)
            };
            let item = match &self.augmenter {
                Some(augmenter) => augmenter.augment(item, &mut self.rng),
                None => item,
            };
            items.push(item);
        }

        Ok(items)
    }

    /// Reshuffle the sample order when shuffling is enabled
    pub fn on_epoch_end(&mut self) {
        if self.config.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// Every sample once in dataset order, center-cropped and never augmented.
    /// The last batch may be smaller than `batch_size`.
    pub fn sequential_batches(&self) -> impl Iterator<Item = Vec<RasterItem>> + '_ {
        (0..self.subset.len())
            .step_by(self.config.batch_size)
            .map(move |start| {
                let end = (start + self.config.batch_size).min(self.subset.len());
                (start..end)
                    .filter_map(|i| self.subset.get(i))
                    .map(|item| self.center_crop(&item))
                    .collect()
            })
    }

    fn center_crop(&self, item: &RasterItem) -> RasterItem {
        let (h, w) = self.output_size;
        item.crop((item.height - h) / 2, (item.width - w) / 2, h, w)
    }

    fn random_crop(&mut self, item: &RasterItem) -> RasterItem {
        let (h, w) = self.output_size;
        let top = self.rng.gen_range(0..=item.height - h);
        let left = self.rng.gen_range(0..=item.width - w);
        item.crop(top, left, h, w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::raster::tests::synthetic;
    use std::collections::HashSet;

    fn config(batch_size: usize, shuffle: bool, augment: bool) -> GeneratorConfig {
        GeneratorConfig {
            n_classes: 2,
            batch_size,
            image_size: (6, 6),
            max_pool: None,
            shuffle,
            augment,
        }
    }

    fn subset(samples: usize) -> RasterSubset {
        let dataset = synthetic(samples, 8, 8, 2);
        dataset.select(&(0..samples).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_len_drops_partial_batch() {
        let generator = DataGenerator::new(subset(10), config(3, false, false), 0).unwrap();
        assert_eq!(generator.len(), 3);

        let generator = DataGenerator::new(subset(2), config(3, false, false), 0).unwrap();
        assert!(generator.is_empty());
    }

    #[test]
    fn test_pooled_size() {
        assert_eq!(pooled_size((33, 20), Some(8)), (32, 16));
        assert_eq!(pooled_size((32, 32), Some(8)), (32, 32));
        assert_eq!(pooled_size((33, 20), None), (33, 20));
    }

    #[test]
    fn test_batches_are_center_cropped_without_augment() {
        let mut generator = DataGenerator::new(subset(4), config(2, false, false), 0).unwrap();
        let batch = generator.batch(0).unwrap();
        assert_eq!(batch.len(), 2);

        let item = &batch[0];
        assert_eq!((item.height, item.width), (6, 6));
        // 8 -> 6 leaves a one pixel margin on each side
        assert_eq!(item.value(0, 0, 0), 110.0);
        assert_eq!(item.sample, 0);
        assert!(matches!(generator.batch(2), Err(LeveeError::Dataset(_))));
    }

    #[test]
    fn test_max_pool_rounds_window() {
        let mut cfg = config(1, false, false);
        cfg.image_size = (7, 5);
        cfg.max_pool = Some(4);
        let mut generator = DataGenerator::new(subset(2), cfg, 0).unwrap();
        assert_eq!(generator.output_size(), (4, 4));
        let item = &generator.batch(0).unwrap()[0];
        assert_eq!((item.height, item.width), (4, 4));
    }

    #[test]
    fn test_window_larger_than_sample_fails() {
        let mut cfg = config(1, false, false);
        cfg.image_size = (9, 8);
        assert!(DataGenerator::new(subset(2), cfg, 0).is_err());
    }

    #[test]
    fn test_class_count_must_match() {
        let mut cfg = config(1, false, false);
        cfg.n_classes = 3;
        assert!(matches!(
            DataGenerator::new(subset(2), cfg, 0),
            Err(LeveeError::Shape(_))
        ));
    }

    #[test]
    fn test_epoch_covers_each_sample_once() {
        let mut generator = DataGenerator::new(subset(12), config(4, true, false), 9).unwrap();
        for _ in 0..3 {
            let mut seen = HashSet::new();
            for index in 0..generator.len() {
                for item in generator.batch(index).unwrap() {
                    assert!(seen.insert(item.sample));
                }
            }
            assert_eq!(seen.len(), 12);
            generator.on_epoch_end();
        }
    }

    #[test]
    fn test_shuffle_changes_order_between_epochs() {
        let mut generator = DataGenerator::new(subset(32), config(32, true, false), 1).unwrap();
        let first: Vec<_> = generator.batch(0).unwrap().iter().map(|i| i.sample).collect();
        generator.on_epoch_end();
        let second: Vec<_> = generator.batch(0).unwrap().iter().map(|i| i.sample).collect();
        assert_ne!(first, second);

        let mut fixed = DataGenerator::new(subset(32), config(32, false, false), 1).unwrap();
        let a: Vec<_> = fixed.batch(0).unwrap().iter().map(|i| i.sample).collect();
        fixed.on_epoch_end();
        let b: Vec<_> = fixed.batch(0).unwrap().iter().map(|i| i.sample).collect();
        assert_eq!(a, b);
        assert_eq!(a, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_augmented_batches_keep_window_and_labels() {
        let mut generator = DataGenerator::new(subset(6), config(3, true, true), 5).unwrap();
        for index in 0..generator.len() {
            for item in generator.batch(index).unwrap() {
                assert_eq!((item.height, item.width), (6, 6));
                let expected = if item.sample % 2 == 0 { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
                assert_eq!(item.label, expected);
            }
        }
    }

    #[test]
    fn test_sequential_batches_cover_partial_tail() {
        let generator = DataGenerator::new(subset(7), config(3, true, true), 0).unwrap();
        let sizes: Vec<_> = generator.sequential_batches().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let samples: Vec<_> = generator
            .sequential_batches()
            .flatten()
            .map(|item| item.sample)
            .collect();
        assert_eq!(samples, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_identity_augmentation_still_random_crops() {
        let mut generator = DataGenerator::with_augmentation(
            subset(1),
            config(1, false, true),
            AugmentationConfig::none(),
            3,
        )
        .unwrap();

        let mut offsets = HashSet::new();
        for _ in 0..32 {
            let item = &generator.batch(0).unwrap()[0];
            // top-left value encodes the crop offset
            offsets.insert(item.value(0, 0, 0) as usize);
        }
        assert!(offsets.len() > 1);
        assert!(offsets.iter().all(|v| [0, 10, 20, 100, 110, 120, 200, 210, 220].contains(v)));
    }
}
