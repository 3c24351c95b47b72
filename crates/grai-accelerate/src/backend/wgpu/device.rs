//! One opened adapter: device, queue, pipeline cache and batched transfers.

use std::sync::Arc;

use log::{debug, error, info, warn};
use pollster::block_on;
use tracing::info_span;

use crate::backend::wgpu::cache::registry::PipelineRegistry;
use crate::backend::wgpu::geometry::Size3;
use crate::backend::wgpu::metrics::WgpuMetrics;
use crate::backend::wgpu::pipelines::{KernelLibrary, Pipeline};
use crate::backend::wgpu::shaders::KERNEL_MANIFEST;
use crate::backend::wgpu::transfer::{copy_size, map_readbacks, staging_buffer, PendingReadback};
use crate::buffer::{Element, PrivateBuffer, SharedBuffer, StorageKind, DEVICE_USAGE};
use crate::command::Command;
use crate::config::ComputeOptions;
use crate::error::{ComputeError, Result};

pub struct ComputeDevice {
    id: usize,
    info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
    execution_width: u32,
    pipelines: PipelineRegistry,
    metrics: WgpuMetrics,
}

impl ComputeDevice {
    /// Opens `adapter` as device `id`.
    pub(crate) fn open(
        id: usize,
        adapter: wgpu::Adapter,
        options: &ComputeOptions,
    ) -> Result<Self> {
        let info = adapter.get_info();
        let limits = adapter.limits();
        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("grai device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
            },
            None,
        ))
        .map_err(|err| ComputeError::DeviceRequest {
            name: info.name.clone(),
            message: err.to_string(),
        })?;
        install_device_error_handlers(&device);

        let limits = device.limits();
        let execution_width = clamp_execution_width(options.execution_width, &limits);
        if execution_width != options.execution_width {
            warn!(
                "Execution width {} exceeds the limits of '{}'; using {}",
                options.execution_width, info.name, execution_width
            );
        }
        info!(
            "WGPU adapter '{}' ready as device {}: backend={:?} type={:?} execution_width={} max_threads_per_group={}",
            info.name,
            id,
            info.backend,
            info.device_type,
            execution_width,
            limits.max_compute_invocations_per_workgroup
        );

        Ok(Self {
            id,
            info,
            device,
            queue,
            limits,
            execution_width,
            pipelines: PipelineRegistry::new(),
            metrics: WgpuMetrics::new(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    pub fn execution_width(&self) -> u32 {
        self.execution_width
    }

    pub fn max_threads_per_group(&self) -> u32 {
        self.limits.max_compute_invocations_per_workgroup
    }

    pub fn metrics(&self) -> &WgpuMetrics {
        &self.metrics
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.get(name)
    }

    pub(crate) fn build_manifest(&self) -> Result<()> {
        for entry in KERNEL_MANIFEST {
            self.build_library(
                entry.library,
                entry.source,
                entry.kernels,
                entry.optimal_group_size,
            )?;
        }
        Ok(())
    }

    /// Compiles `source` once, then registers one pipeline per entry point in `names`.
    /// A name already registered is replaced.
    pub fn build_library(
        &self,
        library: &str,
        source: &str,
        names: &[&str],
        optimal_group_size: bool,
    ) -> Result<()> {
        let library = Arc::new(KernelLibrary::new(library, source));
        let default_group = Size3::new(self.execution_width, 1, 1);
        library
            .module(&self.device, default_group)
            .map_err(|message| ComputeError::LibraryBuild {
                library: library.name().to_string(),
                device_id: self.id,
                message,
            })?;

        for name in names {
            let pipeline = Pipeline::build(
                &self.device,
                library.clone(),
                name,
                optimal_group_size,
                default_group,
            )
            .map_err(|message| ComputeError::KernelBuild {
                name: name.to_string(),
                device_id: self.id,
                message,
            })?;
            if self.pipelines.insert(pipeline).is_some() {
                debug!("Replaced pipeline '{}' on device {}", name, self.id);
            }
        }
        debug!(
            "Built library '{}' on device {}: {}",
            library.name(),
            self.id,
            names.join(", ")
        );
        Ok(())
    }

    pub(crate) fn create_command(&self, name: &str, track_timing: bool) -> Command<'_> {
        let pipeline = self.pipeline(name).unwrap_or_else(|| {
            panic!(
                "unknown pipeline '{}' on device {} ({})",
                name, self.id, self.info.name
            )
        });
        Command::new(self, pipeline, track_timing)
    }

    /// Raw device memory; uninitialized contents read as zero.
    pub fn allocate(&self, byte_length: u64, kind: StorageKind) -> wgpu::Buffer {
        let label = match kind {
            StorageKind::Shared => "grai-shared-memory",
            StorageKind::Private => "grai-private-memory",
        };
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: byte_length.max(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: DEVICE_USAGE,
            mapped_at_creation: false,
        })
    }

    pub fn submit(&self, encoder: wgpu::CommandEncoder) -> wgpu::SubmissionIndex {
        self.queue.submit(Some(encoder.finish()))
    }

    /// Blocks until `index` (and everything submitted before it) completed.
    pub fn wait_for(&self, index: wgpu::SubmissionIndex) {
        self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub(crate) fn blit(
        &self,
        source: &wgpu::Buffer,
        destination: &wgpu::Buffer,
        size: u64,
    ) -> wgpu::SubmissionIndex {
        let mut encoder = self.encoder("grai-blit");
        encoder.copy_buffer_to_buffer(source, 0, destination, 0, size);
        self.submit(encoder)
    }

    /// Device to host for shared buffers. Buffers never handed to the device are
    /// already current on the host and are skipped.
    pub(crate) fn download_shared<T: Element>(&self, buffers: &mut [&mut SharedBuffer<T>]) {
        let _span = info_span!("gpu.download", device = self.id, buffers = buffers.len()).entered();
        let mut pending = Vec::with_capacity(buffers.len());
        let mut last = None;
        for (slot, buffer) in buffers.iter().enumerate() {
            let Some(source) = buffer.existing_handle() else {
                continue;
            };
            let size = copy_size(buffer.byte_len());
            let staging = staging_buffer(&self.device, size);
            let mut encoder = self.encoder("grai-download");
            encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
            last = Some(self.submit(encoder));
            pending.push(PendingReadback { slot, staging, size });
        }
        let Some(last) = last else {
            return;
        };
        map_readbacks(&self.device, pending, last, |slot, data| {
            buffers[slot].host_bytes_mut()[..data.len()].copy_from_slice(data);
            self.metrics.add_download_bytes(data.len() as u64);
        });
    }

    /// Host to device for shared buffers. Queued, does not block.
    pub(crate) fn upload_shared<T: Element>(&self, buffers: &[&mut SharedBuffer<T>]) {
        for buffer in buffers {
            buffer.publish(self);
        }
    }

    /// Blits every private buffer into its mirror, then downloads the mirrors.
    pub(crate) fn download_private<T: Element>(&self, buffers: &mut [&mut PrivateBuffer<T>]) {
        self.download_batch(&mut [], buffers);
    }

    /// One readback pass over shared buffers and private mirrors. The mirror blits are
    /// queued first, so waiting on the last readback copy covers the whole batch.
    pub(crate) fn download_batch<T: Element>(
        &self,
        shared: &mut [&mut SharedBuffer<T>],
        private: &mut [&mut PrivateBuffer<T>],
    ) {
        for buffer in private.iter_mut() {
            let size = copy_size(buffer.byte_len());
            buffer.mirror_mut();
            let source = buffer.handle_on(self);
            if let Some(mirror) = buffer.mirror_ref() {
                self.blit(source, mirror.handle_on(self), size);
            }
        }
        let mut targets: Vec<&mut SharedBuffer<T>> = shared
            .iter_mut()
            .map(|buffer| &mut **buffer)
            .chain(private.iter_mut().filter_map(|buffer| buffer.mirror_slot()))
            .collect();
        self.download_shared(&mut targets);
    }

    /// Uploads each mirror, blits it into device memory, waits for the last blit and
    /// drops the mirrors. Buffers without a mirror have nothing to publish.
    pub(crate) fn upload_private<T: Element>(&self, buffers: &mut [&mut PrivateBuffer<T>]) {
        let _span = info_span!("gpu.upload", device = self.id, buffers = buffers.len()).entered();
        let mut last = None;
        for buffer in buffers.iter() {
            let Some(mirror) = buffer.mirror_ref() else {
                debug!(
                    "Private buffer of {} elements has no host contents to upload",
                    buffer.nb_elems()
                );
                continue;
            };
            mirror.publish(self);
            let size = copy_size(buffer.byte_len());
            last = Some(self.blit(mirror.handle_on(self), buffer.handle_on(self), size));
        }
        if let Some(last) = last {
            self.wait_for(last);
        }
        for buffer in buffers.iter_mut() {
            buffer.take_mirror();
        }
    }
}

/// The configured width, bounded by what one group may hold on this device.
pub fn clamp_execution_width(requested: u32, limits: &wgpu::Limits) -> u32 {
    requested
        .min(limits.max_compute_workgroup_size_x)
        .min(limits.max_compute_invocations_per_workgroup)
        .max(1)
}

fn install_device_error_handlers(device: &wgpu::Device) {
    device.on_uncaptured_error(Box::new(|error| {
        error!("WGPU uncaptured error: {:?}", error);
    }));
    device.set_device_lost_callback(|reason, message| {
        error!("WGPU device lost: reason={:?}, message={}", reason, message);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_width_respects_device_limits() {
        let limits = wgpu::Limits::default();
        assert_eq!(clamp_execution_width(32, &limits), 32);
        assert_eq!(clamp_execution_width(0, &limits), 1);

        let tiny = wgpu::Limits {
            max_compute_workgroup_size_x: 16,
            ..wgpu::Limits::downlevel_defaults()
        };
        assert_eq!(clamp_execution_width(32, &tiny), 16);
    }
}
