//! Data Augmentation for raster samples
//!
//! Augmentations operate directly on HWC value buffers, so they apply to any
//! number of bands (elevation, backscatter, multispectral...). Only geometric
//! transforms are used: levees have no preferred orientation, while band
//! values carry physical meaning and are left untouched.
//!
//! - **Training**: random flips and quarter turns
//! - **Evaluation**: no augmentation

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::raster::RasterItem;

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Probability of mirroring left-right
    pub horizontal_flip_prob: f32,
    /// Probability of mirroring top-bottom
    pub vertical_flip_prob: f32,
    /// Probability of a quarter turn (square windows only)
    pub rotate90_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
            rotate90_prob: 0.5,
        }
    }
}

impl AugmentationConfig {
    /// Less aggressive preset: left-right flips and occasional quarter turns
    pub fn light() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.0,
            rotate90_prob: 0.25,
        }
    }

    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            rotate90_prob: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.horizontal_flip_prob <= 0.0 && self.vertical_flip_prob <= 0.0 && self.rotate90_prob <= 0.0
    }
}

/// Applies random geometric transforms to raster items
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Apply all configured augmentations randomly to a sample
    pub fn augment(&self, item: RasterItem, rng: &mut ChaCha8Rng) -> RasterItem {
        let mut result = item;

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            result = flip_horizontal(&result);
        }

        if rng.gen::<f32>() < self.config.vertical_flip_prob {
            result = flip_vertical(&result);
        }

        if result.height == result.width && rng.gen::<f32>() < self.config.rotate90_prob {
            let turns = rng.gen_range(1..=3);
            for _ in 0..turns {
                result = rotate90(&result);
            }
        }

        result
    }
}

/// Mirror columns
pub fn flip_horizontal(item: &RasterItem) -> RasterItem {
    remap(item, item.height, item.width, |row, col| (row, item.width - 1 - col))
}

/// Mirror rows
pub fn flip_vertical(item: &RasterItem) -> RasterItem {
    remap(item, item.height, item.width, |row, col| (item.height - 1 - row, col))
}

/// Quarter turn clockwise. Output is `width x height`.
pub fn rotate90(item: &RasterItem) -> RasterItem {
    remap(item, item.width, item.height, |row, col| (item.height - 1 - col, row))
}

/// Build an `out_h x out_w` raster whose `(row, col)` reads the source at `source(row, col)`
fn remap<F>(item: &RasterItem, out_h: usize, out_w: usize, source: F) -> RasterItem
where
    F: Fn(usize, usize) -> (usize, usize),
{
    let c = item.channels;
    let mut pixels = Vec::with_capacity(out_h * out_w * c);
    for row in 0..out_h {
        for col in 0..out_w {
            let (src_row, src_col) = source(row, col);
            let start = (src_row * item.width + src_col) * c;
            pixels.extend_from_slice(&item.pixels[start..start + c]);
        }
    }

    RasterItem {
        pixels,
        height: out_h,
        width: out_w,
        channels: c,
        label: item.label.clone(),
        sample: item.sample,
    }
}
