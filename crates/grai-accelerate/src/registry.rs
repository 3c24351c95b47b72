//! The device registry.
//!
//! [`ComputeContext`] is built once from [`ComputeOptions`] and passed to every buffer and
//! command. It opens the selected adapters, owns one queue and one pipeline cache per
//! device, and compiles the built-in kernels on each of them.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use pollster::block_on;
use tracing::info_span;

use crate::backend::wgpu::device::ComputeDevice;
use crate::backend::wgpu::metrics::MetricsSnapshot;
use crate::buffer::{Buffer, Element, PrivateBuffer, SharedBuffer, StorageKind};
use crate::command::Command;
use crate::config::ComputeOptions;
use crate::error::{ComputeError, Result};
use crate::timing::TimeTracker;

pub struct ComputeContext {
    options: ComputeOptions,
    devices: Vec<ComputeDevice>,
    timer: Mutex<TimeTracker>,
}

impl ComputeContext {
    /// Selects and opens devices, then builds the built-in kernels on each.
    pub fn new(options: ComputeOptions) -> Result<Self> {
        let _span = info_span!("gpu.context.init").entered();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapters = select_adapters(&instance, &options)?;

        let devices = adapters
            .into_iter()
            .enumerate()
            .map(|(id, adapter)| ComputeDevice::open(id, adapter, &options))
            .collect::<Result<Vec<_>>>()?;
        for device in &devices {
            device.build_manifest()?;
        }
        info!(
            "Compute context ready with {} device(s): {}",
            devices.len(),
            devices
                .iter()
                .map(ComputeDevice::name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            timer: Mutex::new(TimeTracker::new(options.track_timing)),
            options,
            devices,
        })
    }

    /// Context configured from defaults and `GRAI_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ComputeOptions::from_env())
    }

    pub fn options(&self) -> &ComputeOptions {
        &self.options
    }

    pub fn devices(&self) -> &[ComputeDevice] {
        &self.devices
    }

    pub fn nb_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, id: usize) -> &ComputeDevice {
        self.devices.get(id).unwrap_or_else(|| {
            panic!(
                "device {} out of range ({} device(s) available)",
                id,
                self.devices.len()
            )
        })
    }

    pub fn queue(&self, id: usize) -> &wgpu::Queue {
        self.device(id).queue()
    }

    pub fn metrics(&self, device_id: usize) -> MetricsSnapshot {
        self.device(device_id).metrics().snapshot()
    }

    /// A command for the cached pipeline `kernel`. Unknown kernels are fatal.
    pub fn create_command(&self, kernel: &str, device_id: usize) -> Command<'_> {
        self.device(device_id).create_command(kernel, self.options.track_timing)
    }

    pub fn create_buffer(
        &self,
        byte_length: u64,
        kind: StorageKind,
        device_id: usize,
    ) -> wgpu::Buffer {
        self.device(device_id).allocate(byte_length, kind)
    }

    /// Compiles `source` on every device and caches one pipeline per name in `names`.
    pub fn build_kernels(
        &self,
        source: &str,
        names: &[&str],
        optimal_group_size: bool,
    ) -> Result<()> {
        let library = names.join("+");
        self.build_library(&library, source, names, optimal_group_size)
    }

    pub fn build_kernels_from_file(
        &self,
        path: &Path,
        names: &[&str],
        optimal_group_size: bool,
    ) -> Result<()> {
        let source = fs::read_to_string(path).map_err(|source| ComputeError::KernelSource {
            path: path.to_path_buf(),
            source,
        })?;
        let library = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("library");
        debug!("Loaded kernel library {}", path.display());
        self.build_library(library, &source, names, optimal_group_size)
    }

    fn build_library(
        &self,
        library: &str,
        source: &str,
        names: &[&str],
        optimal_group_size: bool,
    ) -> Result<()> {
        for device in &self.devices {
            device.build_library(library, source, names, optimal_group_size)?;
        }
        Ok(())
    }

    /// Device to host for every buffer, blocking on the last submitted copy.
    pub fn download<T: Element>(&self, buffers: &mut [&mut Buffer<T>]) {
        let device = self.batch_device(buffers);
        let (mut shared, mut private) = partition(buffers);
        device.download_batch(&mut shared, &mut private);
    }

    /// Host to device for every buffer. Blocks only when private buffers are involved.
    pub fn upload<T: Element>(&self, buffers: &mut [&mut Buffer<T>]) {
        let device = self.batch_device(buffers);
        let (shared, mut private) = partition(buffers);
        device.upload_shared(&shared);
        device.upload_private(&mut private);
    }

    fn batch_device<T: Element>(&self, buffers: &[&mut Buffer<T>]) -> &ComputeDevice {
        let device_id = ensure_same_device(buffers.iter().map(|buffer| buffer.device_id()));
        self.device(device_id)
    }

    pub fn start_time(&self) {
        self.timer().start();
    }

    pub fn stop_time(&self, id: &str, description: &str) -> Result<()> {
        self.timer().stop(id, description)
    }

    pub fn dump_times(&self) -> Result<BTreeMap<String, Duration>> {
        self.timer().dump_stacked()
    }

    fn timer(&self) -> MutexGuard<'_, TimeTracker> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The single device shared by a non-empty batch; anything else is fatal.
pub fn ensure_same_device(device_ids: impl IntoIterator<Item = usize>) -> usize {
    let mut device_ids = device_ids.into_iter();
    let first = device_ids
        .next()
        .unwrap_or_else(|| panic!("buffer batch is empty"));
    for other in device_ids {
        assert_eq!(
            first, other,
            "all buffers of a batch must share one device (found devices {} and {})",
            first, other
        );
    }
    first
}

fn partition<'b, T: Element>(
    buffers: &'b mut [&mut Buffer<T>],
) -> (Vec<&'b mut SharedBuffer<T>>, Vec<&'b mut PrivateBuffer<T>>) {
    let mut shared = Vec::new();
    let mut private = Vec::new();
    for buffer in buffers.iter_mut() {
        match &mut **buffer {
            Buffer::Shared(buffer) => shared.push(buffer),
            Buffer::Private(buffer) => private.push(buffer),
        }
    }
    (shared, private)
}

/// Same physical device, whatever backend exposes it.
fn same_adapter(a: &wgpu::AdapterInfo, b: &wgpu::AdapterInfo) -> bool {
    a.name == b.name && a.vendor == b.vendor && a.device == b.device
}

/// Named devices in the given order; otherwise discrete GPUs followed by the platform
/// default for the configured power preference.
fn select_adapters(
    instance: &wgpu::Instance,
    options: &ComputeOptions,
) -> Result<Vec<wgpu::Adapter>> {
    let mut available = instance.enumerate_adapters(wgpu::Backends::all());
    for adapter in &available {
        let info = adapter.get_info();
        debug!(
            "Found adapter '{}' ({:?}, {:?})",
            info.name, info.backend, info.device_type
        );
    }

    if !options.preferred_devices.is_empty() {
        let mut selected = Vec::with_capacity(options.preferred_devices.len());
        for name in &options.preferred_devices {
            let position = available
                .iter()
                .position(|adapter| adapter.get_info().name == *name)
                .ok_or_else(|| ComputeError::DeviceNotFound(name.clone()))?;
            selected.push(available.remove(position));
        }
        return Ok(selected);
    }

    let mut selected: Vec<wgpu::Adapter> = Vec::new();
    for adapter in available {
        let info = adapter.get_info();
        let known = selected
            .iter()
            .any(|chosen| same_adapter(&chosen.get_info(), &info));
        if info.device_type == wgpu::DeviceType::DiscreteGpu && !known {
            selected.push(adapter);
        }
    }

    let default = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: options.power_preference.into(),
        force_fallback_adapter: options.force_fallback_adapter,
        compatible_surface: None,
    }));
    if let Some(adapter) = default {
        let info = adapter.get_info();
        if !selected
            .iter()
            .any(|chosen| same_adapter(&chosen.get_info(), &info))
        {
            selected.push(adapter);
        }
    }

    if selected.is_empty() {
        return Err(ComputeError::NoDevice);
    }
    Ok(selected)
}
