//! Compile-time backend selection.
//!
//! The `cuda` feature trains on the GPU through `burn-cuda`; otherwise the
//! CPU `NdArray` backend is used. Training always runs under `Autodiff`.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// Backend used by the training loop
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device of the default backend
pub type DefaultDevice = <DefaultBackend as Backend>::Device;

pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}

/// Human-readable name of the compiled backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}

/// One-line description of backend and device, logged when training starts
pub fn describe(device: &DefaultDevice) -> String {
    format!("{} on {:?}", backend_name(), device)
}
