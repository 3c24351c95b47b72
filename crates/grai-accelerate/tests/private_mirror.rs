mod common;

use grai_accelerate::{reset_buffer, Buffer};

#[test]
fn private_download_matches_upload_twice() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    let values = common::ramp(5000);
    let mut buffer = Buffer::<f32>::new(values.len(), 0, false);
    buffer.upload_from(ctx, &values);
    assert!(buffer.host().is_empty(), "mirror is dropped after upload");

    assert_eq!(buffer.download(ctx), values.as_slice());
    // A second download goes back to device memory.
    buffer.host_mut().fill(0.0);
    assert_eq!(buffer.download(ctx), values.as_slice());
}

#[test]
fn private_buffer_starts_zeroed() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    let mut buffer = Buffer::<u32>::new(33, 0, false);
    assert!(buffer.download(ctx).iter().all(|v| *v == 0));
}

#[test]
fn reset_kernel_zeroes_device_memory() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    let mut buffer = Buffer::<f32>::new(300, 0, false);
    buffer.upload_from(ctx, &vec![3.0; 300]);
    reset_buffer(ctx, buffer.device_handle(ctx), buffer.byte_len(), 0);
    assert!(buffer.download(ctx).iter().all(|v| *v == 0.0));
}

#[test]
fn reset_covers_buffers_past_the_group_limit() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    let n = 3_000_000;
    let mut buffer = Buffer::<f32>::new(n, 0, false);
    buffer.upload_from(ctx, &vec![3.0; n]);
    reset_buffer(ctx, buffer.device_handle(ctx), buffer.byte_len(), 0);
    let downloaded = buffer.download(ctx);
    assert_eq!(downloaded.len(), n);
    assert!(downloaded.iter().all(|v| *v == 0.0));
}
