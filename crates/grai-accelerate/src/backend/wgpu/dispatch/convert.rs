//! Buffer-wide helpers built on the reset and conversion kernels.

use crate::backend::wgpu::dispatch::common::{ensure_float_capacity, to_u32};
use crate::backend::wgpu::geometry::div_ceil;
use crate::registry::ComputeContext;

/// Zero-fills the first `byte_len` bytes of `buffer`, rounded up to whole words.
pub fn reset_buffer(
    ctx: &ComputeContext,
    buffer: &wgpu::Buffer,
    byte_len: usize,
    device_id: usize,
) {
    let nb_words = div_ceil(to_u32(byte_len, "byte_len"), 4);
    assert!(
        buffer.size() >= nb_words as u64 * 4,
        "reset of {} bytes on a buffer of {} bytes",
        byte_len,
        buffer.size()
    );
    let mut command = ctx.create_command("reset", device_id);
    command.set_bytes(&[nb_words], 0).set_buffer(buffer, 1);
    command.dispatch_threads(nb_words);
    command.enqueue();
}

/// Packs `nb_elems` floats into halves, two per 32-bit word.
pub fn convert_float_to_half(
    ctx: &ComputeContext,
    floats: &wgpu::Buffer,
    halves: &wgpu::Buffer,
    nb_elems: usize,
    device_id: usize,
) {
    let nb_pairs = div_ceil(to_u32(nb_elems, "nb_elems"), 2);
    ensure_float_capacity(floats, nb_elems, "float");
    ensure_float_capacity(halves, nb_pairs as usize, "half");
    let mut command = ctx.create_command("convertFloat2Half", device_id);
    command
        .set_buffer(floats, 0)
        .set_bytes(&[to_u32(nb_elems, "nb_elems")], 1)
        .set_buffer(halves, 2);
    command.dispatch_threads(nb_pairs);
    command.enqueue();
}

/// Unpacks `nb_elems` halves into floats.
pub fn convert_half_to_float(
    ctx: &ComputeContext,
    halves: &wgpu::Buffer,
    floats: &wgpu::Buffer,
    nb_elems: usize,
    device_id: usize,
) {
    let nb_threads = to_u32(nb_elems, "nb_elems");
    ensure_float_capacity(halves, div_ceil(nb_threads, 2) as usize, "half");
    ensure_float_capacity(floats, nb_elems, "float");
    let mut command = ctx.create_command("convertHalf2Float", device_id);
    command
        .set_buffer(halves, 0)
        .set_bytes(&[nb_threads], 1)
        .set_buffer(floats, 2);
    command.dispatch_threads(nb_threads);
    command.enqueue();
}
