//! Burn Batcher for raster samples
//!
//! Converts generator items (HWC pixel buffers) into NCHW image tensors and
//! integer target tensors ready for binary cross-entropy.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use super::raster::RasterItem;

/// A batch of raster windows for training or evaluation
#[derive(Clone, Debug)]
pub struct RasterBatch<B: Backend> {
    /// Images with shape [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,
    /// 0/1 class indicators with shape [batch_size, n_classes]
    pub targets: Tensor<B, 2, Int>,
}

/// Stateless batcher usable with any backend
#[derive(Clone, Debug, Default)]
pub struct RasterBatcher;

impl RasterBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, RasterItem, RasterBatch<B>> for RasterBatcher {
    fn batch(&self, items: Vec<RasterItem>, device: &B::Device) -> RasterBatch<B> {
        let batch_size = items.len();
        let (height, width, channels) = items
            .first()
            .map(|item| (item.height, item.width, item.channels))
            .unwrap_or((0, 0, 0));
        let n_classes = items.first().map(|item| item.label.len()).unwrap_or(0);

        // HWC -> CHW per sample
        let plane = height * width;
        let mut images_data = vec![0.0f32; batch_size * channels * plane];
        for (b, item) in items.iter().enumerate() {
            let base = b * channels * plane;
            for (pixel, values) in item.pixels.chunks_exact(channels.max(1)).enumerate() {
                for (c, value) in values.iter().enumerate() {
                    images_data[base + c * plane + pixel] = *value;
                }
            }
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );

        let targets_data: Vec<i64> = items
            .iter()
            .flat_map(|item| item.label.iter().map(|&v| i64::from(v >= 0.5)))
            .collect();
        let targets = Tensor::<B, 2, Int>::from_data(
            TensorData::new(targets_data, [batch_size, n_classes]),
            device,
        );

        RasterBatch { images, targets }
    }
}
