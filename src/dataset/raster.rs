//! Labeled raster archive.
//!
//! A dataset is a NumPy `.npz` archive holding two arrays that share the
//! leading `sample` axis:
//!
//! - `features`: `[samples, height, width, channels]`
//! - `labels`: `[samples, classes]`, one-hot or multi-hot
//!
//! Floating point and integer archives are accepted; everything is stored as
//! `f32` once loaded.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use burn::data::dataset::Dataset;
use ndarray::{Array2, Array4, ArrayD, Axis, Ix2, Ix4, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};
use tracing::{debug, info};

use crate::utils::error::{LeveeError, Result};

/// Archive entry holding the feature rasters
pub const FEATURES_KEY: &str = "features";
/// Archive entry holding the label vectors
pub const LABELS_KEY: &str = "labels";

/// One labeled raster sample, pixels in HWC order
#[derive(Clone, Debug, PartialEq)]
pub struct RasterItem {
    /// Row-major `[height, width, channels]` values
    pub pixels: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    /// Class indicator vector of length `n_classes`
    pub label: Vec<f32>,
    /// Index of the sample in the full dataset
    pub sample: usize,
}

impl RasterItem {
    /// Value at `(row, col, channel)`
    pub fn value(&self, row: usize, col: usize, channel: usize) -> f32 {
        self.pixels[(row * self.width + col) * self.channels + channel]
    }

    /// Copy the window starting at `(top, left)` of size `height x width`
    pub fn crop(&self, top: usize, left: usize, height: usize, width: usize) -> RasterItem {
        if top == 0 && left == 0 && height == self.height && width == self.width {
            return self.clone();
        }

        let c = self.channels;
        let mut pixels = Vec::with_capacity(height * width * c);
        for row in top..top + height {
            let start = (row * self.width + left) * c;
            pixels.extend_from_slice(&self.pixels[start..start + width * c]);
        }

        RasterItem {
            pixels,
            height,
            width,
            channels: c,
            label: self.label.clone(),
            sample: self.sample,
        }
    }
}

/// The full labeled dataset
#[derive(Clone, Debug)]
pub struct RasterDataset {
    features: Arc<Array4<f32>>,
    labels: Arc<Array2<f32>>,
}

impl RasterDataset {
    /// Wrap in-memory arrays, checking that the sample axes agree
    pub fn new(features: Array4<f32>, labels: Array2<f32>) -> Result<Self> {
        if features.len_of(Axis(0)) != labels.len_of(Axis(0)) {
            return Err(LeveeError::Shape(format!(
                "features have {} samples but labels have {}",
                features.len_of(Axis(0)),
                labels.len_of(Axis(0))
            )));
        }

        Ok(Self {
            features: Arc::new(features),
            labels: Arc::new(labels),
        })
    }

    /// Load a dataset from an `.npz` archive
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LeveeError::PathNotFound(path.to_path_buf()));
        }

        let mut npz = NpzReader::new(File::open(path)?)?;
        let names = npz.names()?;
        debug!("Archive {} contains {:?}", path.display(), names);

        let features = read_f32(&mut npz, &names, FEATURES_KEY)?
            .into_dimensionality::<Ix4>()
            .map_err(|e| {
                LeveeError::Shape(format!(
                    "`{FEATURES_KEY}` must be [sample, height, width, channel]: {e}"
                ))
            })?;
        let labels = read_f32(&mut npz, &names, LABELS_KEY)?
            .into_dimensionality::<Ix2>()
            .map_err(|e| LeveeError::Shape(format!("`{LABELS_KEY}` must be [sample, class]: {e}")))?;

        let dataset = Self::new(features, labels)?;
        let (height, width) = dataset.spatial_dims();
        info!(
            "Loaded {} samples ({}x{}x{}, {} classes) from {}",
            dataset.num_samples(),
            height,
            width,
            dataset.num_channels(),
            dataset.num_classes(),
            path.display()
        );
        Ok(dataset)
    }

    /// Write the dataset as an `.npz` archive
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array(FEATURES_KEY, &*self.features)
            .map_err(|e| LeveeError::Dataset(e.to_string()))?;
        npz.add_array(LABELS_KEY, &*self.labels)
            .map_err(|e| LeveeError::Dataset(e.to_string()))?;
        npz.finish().map_err(|e| LeveeError::Dataset(e.to_string()))?;
        Ok(())
    }

    pub fn num_samples(&self) -> usize {
        self.features.len_of(Axis(0))
    }

    /// `(height, width)` of every sample
    pub fn spatial_dims(&self) -> (usize, usize) {
        (self.features.len_of(Axis(1)), self.features.len_of(Axis(2)))
    }

    pub fn num_channels(&self) -> usize {
        self.features.len_of(Axis(3))
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len_of(Axis(1))
    }

    /// Per-class count of positive labels
    pub fn class_counts(&self) -> Vec<usize> {
        self.labels
            .axis_iter(Axis(1))
            .map(|column| column.iter().filter(|&&v| v >= 0.5).count())
            .collect()
    }

    /// Materialize one sample
    pub fn item(&self, sample: usize) -> Option<RasterItem> {
        if sample >= self.num_samples() {
            return None;
        }

        let raster = self.features.index_axis(Axis(0), sample);
        let label = self.labels.index_axis(Axis(0), sample);
        let (height, width) = self.spatial_dims();

        Some(RasterItem {
            pixels: raster.iter().copied().collect(),
            height,
            width,
            channels: self.num_channels(),
            label: label.iter().copied().collect(),
            sample,
        })
    }

    /// View of the samples at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Result<RasterSubset> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.num_samples()) {
            return Err(LeveeError::Dataset(format!(
                "sample index {bad} out of range for {} samples",
                self.num_samples()
            )));
        }

        Ok(RasterSubset {
            source: self.clone(),
            indices: indices.to_vec(),
        })
    }
}

/// A dataset restricted to a list of sample indices
#[derive(Clone, Debug)]
pub struct RasterSubset {
    source: RasterDataset,
    indices: Vec<usize>,
}

impl RasterSubset {
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn spatial_dims(&self) -> (usize, usize) {
        self.source.spatial_dims()
    }

    pub fn num_channels(&self) -> usize {
        self.source.num_channels()
    }

    pub fn num_classes(&self) -> usize {
        self.source.num_classes()
    }
}

impl Dataset<RasterItem> for RasterSubset {
    fn get(&self, index: usize) -> Option<RasterItem> {
        self.indices
            .get(index)
            .and_then(|&sample| self.source.item(sample))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

fn resolve_entry<'a>(names: &'a [String], key: &str) -> Result<&'a str> {
    let with_suffix = format!("{key}.npy");
    names
        .iter()
        .find(|n| n.as_str() == key || n.as_str() == with_suffix)
        .map(String::as_str)
        .ok_or_else(|| LeveeError::Dataset(format!("archive has no `{key}` array (found {names:?})")))
}

/// Read an entry as `f32`, widening or narrowing from the stored dtype
fn read_f32(npz: &mut NpzReader<File>, names: &[String], key: &str) -> Result<ArrayD<f32>> {
    let entry = resolve_entry(names, key)?;

    let first_err = match npz.by_name::<OwnedRepr<f32>, IxDyn>(entry) {
        Ok(array) => return Ok(array),
        Err(e) => e,
    };
    if let Ok(array) = npz.by_name::<OwnedRepr<f64>, IxDyn>(entry) {
        return Ok(array.mapv(|v| v as f32));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i64>, IxDyn>(entry) {
        return Ok(array.mapv(|v| v as f32));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i32>, IxDyn>(entry) {
        return Ok(array.mapv(|v| v as f32));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<u8>, IxDyn>(entry) {
        return Ok(array.mapv(f32::from));
    }

    Err(LeveeError::Dataset(format!(
        "cannot read `{key}` as a numeric array: {first_err}"
    )))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::Array;
    use tempfile::TempDir;

    /// Small dataset whose pixel values encode `(sample, row, col, channel)`
    pub(crate) fn synthetic(samples: usize, height: usize, width: usize, classes: usize) -> RasterDataset {
        let features = Array::from_shape_fn((samples, height, width, 2), |(s, r, c, ch)| {
            (s * 1000 + r * 100 + c * 10 + ch) as f32
        });
        let labels = Array::from_shape_fn((samples, classes), |(s, k)| {
            if s % classes == k { 1.0 } else { 0.0 }
        });
        RasterDataset::new(features, labels).unwrap()
    }

    #[test]
    fn test_shapes() {
        let dataset = synthetic(6, 4, 5, 2);
        assert_eq!(dataset.num_samples(), 6);
        assert_eq!(dataset.spatial_dims(), (4, 5));
        assert_eq!(dataset.num_channels(), 2);
        assert_eq!(dataset.num_classes(), 2);
        assert_eq!(dataset.class_counts(), vec![3, 3]);
    }

    #[test]
    fn test_mismatched_sample_axes() {
        let features = Array4::<f32>::zeros((3, 2, 2, 1));
        let labels = Array2::<f32>::zeros((4, 2));
        assert!(matches!(
            RasterDataset::new(features, labels),
            Err(LeveeError::Shape(_))
        ));
    }

    #[test]
    fn test_item_is_hwc() {
        let dataset = synthetic(2, 3, 3, 2);
        let item = dataset.item(1).unwrap();
        assert_eq!(item.pixels.len(), 3 * 3 * 2);
        assert_eq!(item.value(2, 1, 1), 1211.0);
        assert_eq!(item.label, vec![0.0, 1.0]);
        assert!(dataset.item(2).is_none());
    }

    #[test]
    fn test_crop_window() {
        let dataset = synthetic(1, 4, 4, 1);
        let item = dataset.item(0).unwrap();
        let window = item.crop(1, 2, 2, 2);
        assert_eq!((window.height, window.width), (2, 2));
        assert_eq!(window.value(0, 0, 0), item.value(1, 2, 0));
        assert_eq!(window.value(1, 1, 1), item.value(2, 3, 1));
    }

    #[test]
    fn test_select_preserves_order() {
        let dataset = synthetic(5, 2, 2, 1);
        let subset = dataset.select(&[4, 0, 2]).unwrap();
        assert_eq!(subset.len(), 3);
        assert_eq!(subset.get(0).unwrap().sample, 4);
        assert_eq!(subset.get(2).unwrap().sample, 2);
        assert!(subset.get(3).is_none());
        assert!(dataset.select(&[5]).is_err());
    }

    #[test]
    fn test_npz_save_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("levees.npz");
        let dataset = synthetic(3, 2, 2, 2);
        dataset.save(&path).unwrap();

        let loaded = RasterDataset::open(&path).unwrap();
        assert_eq!(loaded.num_samples(), 3);
        assert_eq!(loaded.item(2), dataset.item(2));
    }

    #[test]
    fn test_open_reads_f64_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f64.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        npz.add_array(FEATURES_KEY, &Array4::<f64>::from_elem((2, 3, 3, 1), 0.5))
            .unwrap();
        npz.add_array(LABELS_KEY, &Array2::<i64>::ones((2, 1))).unwrap();
        npz.finish().unwrap();

        let loaded = RasterDataset::open(&path).unwrap();
        assert_eq!(loaded.item(0).unwrap().value(1, 1, 0), 0.5);
        assert_eq!(loaded.class_counts(), vec![2]);
    }

    #[test]
    fn test_open_missing_file() {
        let err = RasterDataset::open(Path::new("/nonexistent/levees.npz")).unwrap_err();
        assert!(matches!(err, LeveeError::PathNotFound(_)));
    }
}
