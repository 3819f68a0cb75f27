//! Random train/test split over the sample axis.
//!
//! The sample indices are permuted once; the first `floor(n * split)`
//! indices form the training subset and the remainder the test subset.
//! The split is reproducible for a fixed seed.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Two disjoint index sets covering `0..num_samples`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl DatasetSplit {
    pub fn total(&self) -> usize {
        self.train.len() + self.test.len()
    }
}

/// Number of training samples for `num_samples` and a train fraction
pub fn train_count(num_samples: usize, split: f64) -> usize {
    ((num_samples as f64 * split) as usize).min(num_samples)
}

/// Shuffle `0..num_samples` and cut it at `floor(num_samples * split)`
pub fn train_test_split<R: Rng + ?Sized>(num_samples: usize, split: f64, rng: &mut R) -> DatasetSplit {
    let mut indices: Vec<usize> = (0..num_samples).collect();
    indices.shuffle(rng);

    let test = indices.split_off(train_count(num_samples, split));
    DatasetSplit {
        train: indices,
        test,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    #[test]
    fn test_sizes_sum_to_total() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for &(n, split) in &[(100, 0.8), (7, 0.5), (1, 0.9), (0, 0.5), (33, 0.333)] {
            let result = train_test_split(n, split, &mut rng);
            assert_eq!(result.total(), n);
            assert_eq!(result.train.len(), (n as f64 * split).floor() as usize);
        }
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let result = train_test_split(50, 0.7, &mut rng);

        let train: HashSet<_> = result.train.iter().copied().collect();
        let test: HashSet<_> = result.test.iter().copied().collect();
        assert!(train.is_disjoint(&test));

        let mut all: Vec<_> = train.union(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = train_test_split(40, 0.75, &mut ChaCha8Rng::seed_from_u64(3));
        let b = train_test_split(40, 0.75, &mut ChaCha8Rng::seed_from_u64(3));
        let c = train_test_split(40, 0.75, &mut ChaCha8Rng::seed_from_u64(4));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_train_count_rounds_down() {
        assert_eq!(train_count(10, 0.85), 8);
        assert_eq!(train_count(3, 0.5), 1);
        assert_eq!(train_count(5, 1.0), 5);
    }
}
