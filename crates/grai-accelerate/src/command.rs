//! Single-use kernel dispatch.
//!
//! A [`Command`] binds one pipeline to one command encoder. Parameters are bound by slot
//! (the WGSL `@binding` of `@group(0)`), exactly one dispatch is recorded, and
//! [`Command::enqueue`] consumes the command and submits it.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::warn;
use wgpu::util::DeviceExt;

use crate::backend::wgpu::device::ComputeDevice;
use crate::backend::wgpu::geometry::{self, DispatchGeometry, Size3};
use crate::backend::wgpu::pipelines::{with_validation, Pipeline};
use crate::buffer::{Buffer, Element, PrivateBuffer, SharedBuffer};

/// Inline parameters are padded to this many bytes.
const INLINE_ALIGNMENT: usize = 16;

enum Binding<'a> {
    Buffer(&'a wgpu::Buffer),
    Texture(&'a wgpu::TextureView),
    Bytes(wgpu::Buffer),
}

impl Binding<'_> {
    fn resource(&self) -> wgpu::BindingResource<'_> {
        match self {
            Binding::Buffer(buffer) => buffer.as_entire_binding(),
            Binding::Texture(view) => wgpu::BindingResource::TextureView(view),
            Binding::Bytes(buffer) => buffer.as_entire_binding(),
        }
    }
}

/// Anything that resolves to device memory on the command's device.
pub trait DeviceBuffer<'a> {
    fn resolve(self, device: &ComputeDevice) -> &'a wgpu::Buffer;
}

impl<'a> DeviceBuffer<'a> for &'a wgpu::Buffer {
    fn resolve(self, _device: &ComputeDevice) -> &'a wgpu::Buffer {
        self
    }
}

impl<'a, T: Element> DeviceBuffer<'a> for &'a Buffer<T> {
    fn resolve(self, device: &ComputeDevice) -> &'a wgpu::Buffer {
        self.handle_on(device)
    }
}

impl<'a, T: Element> DeviceBuffer<'a> for &'a SharedBuffer<T> {
    fn resolve(self, device: &ComputeDevice) -> &'a wgpu::Buffer {
        self.handle_on(device)
    }
}

impl<'a, T: Element> DeviceBuffer<'a> for &'a PrivateBuffer<T> {
    fn resolve(self, device: &ComputeDevice) -> &'a wgpu::Buffer {
        self.handle_on(device)
    }
}

pub struct Command<'a> {
    device: &'a ComputeDevice,
    pipeline: Arc<Pipeline>,
    encoder: wgpu::CommandEncoder,
    bindings: BTreeMap<u32, Binding<'a>>,
    geometry: Option<DispatchGeometry>,
    track_timing: bool,
}

impl<'a> Command<'a> {
    pub(crate) fn new(
        device: &'a ComputeDevice,
        pipeline: Arc<Pipeline>,
        track_timing: bool,
    ) -> Self {
        let label = format!("grai-{}-encoder", pipeline.name());
        let encoder = device
            .wgpu_device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&label),
            });
        Self {
            device,
            pipeline,
            encoder,
            bindings: BTreeMap::new(),
            geometry: None,
            track_timing,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn device_id(&self) -> usize {
        self.device.id()
    }

    /// Copies `values` into a small constant buffer bound at `index`.
    pub fn set_bytes<T: bytemuck::Pod>(&mut self, values: &[T], index: u32) -> &mut Self {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let padded_len = pad_len(bytes.len());
        let mut contents = vec![0u8; padded_len];
        contents[..bytes.len()].copy_from_slice(bytes);
        let buffer = self
            .device
            .wgpu_device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("grai-inline-params"),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::STORAGE,
            });
        self.bindings.insert(index, Binding::Bytes(buffer));
        self
    }

    /// Binds a raw handle or a [`Buffer`] at `index`.
    pub fn set_buffer(&mut self, buffer: impl DeviceBuffer<'a>, index: u32) -> &mut Self {
        let handle = buffer.resolve(self.device);
        self.bindings.insert(index, Binding::Buffer(handle));
        self
    }

    pub fn set_texture(&mut self, view: &'a wgpu::TextureView, index: u32) -> &mut Self {
        self.bindings.insert(index, Binding::Texture(view));
        self
    }

    /// `nb_threads` threads in groups one execution width wide.
    ///
    /// Past the per-dimension group limit the groups wrap into y and z; kernels meant for
    /// such sizes derive their index from `num_workgroups` (see
    /// [`DispatchGeometry::workgroups_within`]).
    pub fn dispatch_threads(&mut self, nb_threads: u32) {
        let geometry = geometry::linear(nb_threads, self.device.execution_width());
        self.record(geometry);
    }

    pub fn dispatch_threads_2d(&mut self, width: u32, height: u32) {
        let geometry = geometry::planar(
            width,
            height,
            self.device.execution_width(),
            self.device.max_threads_per_group(),
        );
        self.record(geometry);
    }

    pub fn dispatch_threads_grid(&mut self, grid: Size3, group: Size3) {
        self.record(DispatchGeometry::new(grid, group));
    }

    pub fn geometry(&self) -> Option<DispatchGeometry> {
        self.geometry
    }

    fn record(&mut self, geometry: DispatchGeometry) {
        assert!(
            self.geometry.is_none(),
            "kernel '{}' already has a dispatch recorded",
            self.pipeline.name()
        );
        let max_threads = self.device.max_threads_per_group();
        assert!(
            geometry.group.volume() <= max_threads as u64,
            "thread group {:?} of kernel '{}' exceeds {} threads",
            geometry.group,
            self.pipeline.name(),
            max_threads
        );
        let width = self.device.execution_width() as u64;
        if self.pipeline.optimal_group_size() && geometry.group.volume() % width != 0 {
            warn!(
                "Kernel '{}' dispatched with {} threads per group, not a multiple of the execution width {}",
                self.pipeline.name(),
                geometry.group.volume(),
                width
            );
        }
        self.geometry = Some(geometry);
    }

    /// Submits the command. Blocks until it completed when timing is tracked.
    pub fn enqueue(self) -> wgpu::SubmissionIndex {
        let Command {
            device,
            pipeline,
            mut encoder,
            bindings,
            geometry,
            track_timing,
        } = self;
        let geometry = geometry.unwrap_or_else(|| {
            panic!("kernel '{}' enqueued without a dispatch", pipeline.name())
        });
        let max_groups = device.limits().max_compute_workgroups_per_dimension;
        let workgroups = geometry.workgroups_within(max_groups).unwrap_or_else(|| {
            panic!(
                "kernel '{}' needs {:?} thread groups, the device allows {} per dimension",
                pipeline.name(),
                geometry.workgroups(),
                max_groups
            )
        });

        let compute = pipeline.variant(device.wgpu_device(), geometry.group, device.metrics());
        let (index, error) = with_validation(device.wgpu_device(), || {
            let bind_group = (!bindings.is_empty()).then(|| {
                let layout = compute.get_bind_group_layout(0);
                let entries: Vec<wgpu::BindGroupEntry> = bindings
                    .iter()
                    .map(|(slot, binding)| wgpu::BindGroupEntry {
                        binding: *slot,
                        resource: binding.resource(),
                    })
                    .collect();
                device
                    .wgpu_device()
                    .create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("grai-command-bind-group"),
                        layout: &layout,
                        entries: &entries,
                    })
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("grai-command-pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&compute);
                if let Some(bind_group) = bind_group.as_ref() {
                    pass.set_bind_group(0, bind_group, &[]);
                }
                pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
            }
            device.submit(encoder)
        });
        if let Some(message) = error {
            panic!("kernel '{}' rejected by the device: {}", pipeline.name(), message);
        }
        if track_timing {
            device.wait_for(index.clone());
        }
        index
    }
}

fn pad_len(len: usize) -> usize {
    let padded = (len + INLINE_ALIGNMENT - 1) / INLINE_ALIGNMENT * INLINE_ALIGNMENT;
    padded.max(INLINE_ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::pad_len;

    #[test]
    fn inline_params_are_padded_to_sixteen() {
        assert_eq!(pad_len(0), 16);
        assert_eq!(pad_len(4), 16);
        assert_eq!(pad_len(16), 16);
        assert_eq!(pad_len(20), 32);
    }
}
