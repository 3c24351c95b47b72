//! GPU compute-resource layer.
//!
//! - [`ComputeContext`]: device registry, one queue and one pipeline cache per device.
//! - [`Buffer`]: typed arrays in shared (host-visible) or private (device-only) memory.
//! - [`Command`]: one pipeline, its bindings and a single dispatch.
//! - [`reduce_sum`] / [`reduce_max`]: per-lane tree reductions built on the above.
//!
//! ```no_run
//! use grai_accelerate::{reduce_sum, Buffer, ComputeContext, ComputeOptions};
//!
//! let ctx = ComputeContext::new(ComputeOptions::from_env())?;
//! let mut input = Buffer::<f32>::new(257 * 3, 0, true);
//! input.upload_from(&ctx, &vec![1.0; 257 * 3]);
//! let mut output = Buffer::<f32>::new(3, 0, true);
//! reduce_sum(&ctx, input.device_handle(&ctx), output.device_handle(&ctx), 257, 3, 0);
//! assert_eq!(output.download(&ctx), &[257.0, 257.0, 257.0]);
//! # Ok::<(), grai_accelerate::ComputeError>(())
//! ```

pub mod backend;
pub mod buffer;
pub mod command;
pub mod config;
pub mod error;
pub mod float_buffer;
pub mod registry;
pub mod timing;

pub use backend::wgpu::device::ComputeDevice;
pub use backend::wgpu::dispatch::convert::{
    convert_float_to_half, convert_half_to_float, reset_buffer,
};
pub use backend::wgpu::dispatch::reduction::{reduce, reduce_max, reduce_sum, ReduceOp};
pub use backend::wgpu::geometry::{DispatchGeometry, Size3};
pub use backend::wgpu::metrics::MetricsSnapshot;
pub use buffer::{Buffer, Element, PrivateBuffer, SharedBuffer, StorageKind};
pub use command::{Command, DeviceBuffer};
pub use config::{ComputeOptions, PowerPreferenceOption, Precision};
pub use error::{ComputeError, Result};
pub use float_buffer::FloatBuffer;
pub use registry::{ensure_same_device, ComputeContext};
pub use timing::TimeTracker;
