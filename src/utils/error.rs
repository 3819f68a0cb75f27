//! Error Handling Module
//!
//! Defines the error type shared by the levee training library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for levee training operations
#[derive(Error, Debug)]
pub enum LeveeError {
    /// Configuration value missing, of the wrong type, or out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reading or interpreting the raster archive
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Array dimensions do not line up
    #[error("Shape error: {0}")]
    Shape(String),

    /// Error with model construction or (de)serialization
    #[error("Model error: {0}")]
    Model(String),

    /// Error during the training loop
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for LeveeError {
    fn from(err: serde_json::Error) -> Self {
        LeveeError::Serialization(err.to_string())
    }
}

impl From<ndarray_npy::ReadNpzError> for LeveeError {
    fn from(err: ndarray_npy::ReadNpzError) -> Self {
        LeveeError::Dataset(err.to_string())
    }
}

impl From<burn::record::RecorderError> for LeveeError {
    fn from(err: burn::record::RecorderError) -> Self {
        LeveeError::Model(format!("{:?}", err))
    }
}

/// Convenience Result type for levee training operations
pub type Result<T> = std::result::Result<T, LeveeError>;
