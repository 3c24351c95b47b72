use half::f16;

use crate::backend::wgpu::dispatch::convert::{convert_float_to_half, convert_half_to_float};
use crate::buffer::Buffer;
use crate::config::Precision;
use crate::registry::ComputeContext;

/// A float array stored as `f32` or `f16` depending on the precision.
///
/// The device buffer is created on first use. Half storage is filled and read back
/// through the conversion kernels, so callers always see `f32` values.
#[derive(Debug)]
pub struct FloatBuffer {
    nb_elems: usize,
    device_id: usize,
    shared: bool,
    precision: Precision,
    float32: Option<Buffer<f32>>,
    float16: Option<Buffer<f16>>,
}

impl FloatBuffer {
    pub fn new(nb_elems: usize, device_id: usize, shared: bool, precision: Precision) -> Self {
        Self {
            nb_elems,
            device_id,
            shared,
            precision,
            float32: None,
            float16: None,
        }
    }

    /// Uses the precision configured on `ctx`.
    pub fn with_context(
        ctx: &ComputeContext,
        nb_elems: usize,
        device_id: usize,
        shared: bool,
    ) -> Self {
        Self::new(nb_elems, device_id, shared, ctx.options().precision)
    }

    pub fn nb_elems(&self) -> usize {
        self.nb_elems
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    fn float32(&mut self) -> &mut Buffer<f32> {
        let (nb_elems, device_id, shared) = (self.nb_elems, self.device_id, self.shared);
        self.float32.get_or_insert_with(|| Buffer::new(nb_elems, device_id, shared))
    }

    fn float16(&mut self) -> &mut Buffer<f16> {
        let (nb_elems, device_id, shared) = (self.nb_elems, self.device_id, self.shared);
        self.float16.get_or_insert_with(|| Buffer::new(nb_elems, device_id, shared))
    }

    /// Device memory holding the values in the current precision.
    pub fn device_handle(&mut self, ctx: &ComputeContext) -> &wgpu::Buffer {
        match self.precision {
            Precision::Float32 => self.float32().device_handle(ctx),
            Precision::Float16 => self.float16().device_handle(ctx),
        }
    }

    /// Uploads the current host contents (zeros for a fresh buffer).
    pub fn initialize(&mut self, ctx: &ComputeContext) {
        match self.precision {
            Precision::Float32 => {
                let buffer = self.float32();
                buffer.host_mut();
                buffer.upload(ctx);
            }
            Precision::Float16 => {
                let buffer = self.float16();
                buffer.host_mut();
                buffer.upload(ctx);
            }
        }
    }

    /// Uploads `values[start..start + nb_elems]`.
    pub fn initialize_from(&mut self, ctx: &ComputeContext, values: &[f32], start: usize) {
        let end = start + self.nb_elems;
        assert!(
            end <= values.len(),
            "initialization reads values[{start}..{end}] from {} values",
            values.len()
        );
        let values = &values[start..end];
        match self.precision {
            Precision::Float32 => self.float32().upload_from(ctx, values),
            Precision::Float16 => {
                let (nb_elems, device_id) = (self.nb_elems, self.device_id);
                let mut staging = Buffer::<f32>::new(nb_elems, device_id, true);
                staging.upload_from(ctx, values);
                let halves = self.float16().device_handle(ctx);
                convert_float_to_half(ctx, staging.device_handle(ctx), halves, nb_elems, device_id);
            }
        }
    }

    /// Current values as floats. Blocks until the device copy completed.
    pub fn download(&mut self, ctx: &ComputeContext) -> Vec<f32> {
        match self.precision {
            Precision::Float32 => self.float32().download(ctx).to_vec(),
            Precision::Float16 => {
                let (nb_elems, device_id) = (self.nb_elems, self.device_id);
                let mut staging = Buffer::<f32>::new(nb_elems, device_id, true);
                let halves = self.float16().device_handle(ctx);
                convert_half_to_float(ctx, halves, staging.device_handle(ctx), nb_elems, device_id);
                staging.download(ctx).to_vec()
            }
        }
    }

    /// Releases the device buffers; the next access starts from zeros.
    pub fn reset(&mut self) {
        self.float32 = None;
        self.float16 = None;
    }
}
