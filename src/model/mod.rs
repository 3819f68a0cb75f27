//! Model module: LeveeNet CNN and weight persistence

pub mod cnn;

use std::path::Path;

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;

pub use cnn::{ConvBlock, LeveeNet, LeveeNetConfig};

use crate::utils::error::{LeveeError, Result};

/// Write model weights with burn's `CompactRecorder` (adds the `.mpk` extension)
pub fn save_weights<B: Backend>(model: &LeveeNet<B>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    model.clone().save_file(path, &CompactRecorder::new())?;
    Ok(())
}

/// Build a model from `config` and load weights written by [`save_weights`]
pub fn load_weights<B: Backend>(
    config: &LeveeNetConfig,
    path: &Path,
    device: &B::Device,
) -> Result<LeveeNet<B>> {
    let file = path.with_extension("mpk");
    if !file.exists() {
        return Err(LeveeError::PathNotFound(file));
    }
    let model = config
        .init::<B>(device)
        .load_file(path, &CompactRecorder::new(), device)?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_weights_roundtrip_keeps_predictions() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights");

        let config = LeveeNetConfig::new(2).with_base_filters(4).with_num_blocks(1);
        let model = config.init::<TestBackend>(&device);
        save_weights(&model, &path).unwrap();
        assert!(path.with_extension("mpk").exists());

        let loaded = load_weights::<TestBackend>(&config, &path, &device).unwrap();
        let input = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        for (x, y) in a.iter().zip(&b) {
            // half precision on disk
            assert!((x - y).abs() < 1e-2);
        }
    }

    #[test]
    fn test_load_missing_weights() {
        let device = Default::default();
        let config = LeveeNetConfig::new(1);
        let err = load_weights::<TestBackend>(&config, Path::new("/nonexistent/w"), &device)
            .unwrap_err();
        assert!(matches!(err, LeveeError::PathNotFound(_)));
    }
}
