use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors raised while building the compute context or registering kernels.
///
/// Contract violations (mismatched devices, undersized buffers, unknown pipelines) are
/// programming errors and panic instead of surfacing here.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Could not find any GPU device")]
    NoDevice,

    #[error("Did not find device: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device '{name}': {message}")]
    DeviceRequest { name: String, message: String },

    #[error("Cannot build library '{library}' on device {device_id}: {message}")]
    LibraryBuild {
        library: String,
        device_id: usize,
        message: String,
    },

    #[error("Impossible to build kernel '{name}' on device {device_id}: {message}")]
    KernelBuild {
        name: String,
        device_id: usize,
        message: String,
    },

    #[error("Cannot read kernel library {path:?}: {source}")]
    KernelSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Time is not being tracked")]
    TimeNotTracked,

    #[error("No time transaction is running")]
    TimeTransaction,
}

pub type Result<T> = std::result::Result<T, ComputeError>;
