mod common;

use grai_accelerate::{Buffer, FloatBuffer, Precision};
use half::f16;

const SIZES: [usize; 4] = [1, 4095, 4096, 4097];

#[test]
fn shared_f32_roundtrip_across_page_boundaries() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    for n in SIZES {
        let values = common::ramp(n);
        let mut buffer = Buffer::<f32>::new(n, 0, true);
        buffer.upload_from(ctx, &values);
        // Hand the buffer to the device so download really reads it back.
        buffer.device_handle(ctx);
        buffer.host_mut().fill(0.0);
        assert_eq!(buffer.download(ctx), values.as_slice(), "n = {n}");
    }
}

#[test]
fn shared_f16_roundtrip_across_page_boundaries() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    for n in SIZES {
        let values: Vec<f16> = common::ramp(n).into_iter().map(f16::from_f32).collect();
        let mut buffer = Buffer::<f16>::new(n, 0, true);
        buffer.device_handle(ctx);
        buffer.upload_from(ctx, &values);
        buffer.host_mut().fill(f16::ZERO);
        assert_eq!(buffer.download(ctx), values.as_slice(), "n = {n}");
    }
}

#[test]
fn batch_download_covers_every_buffer() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    let mut a = Buffer::<f32>::new(10, 0, true);
    let mut b = Buffer::<f32>::new(20, 0, false);
    a.upload_from(ctx, &[1.0; 10]);
    b.upload_from(ctx, &[2.0; 20]);
    a.device_handle(ctx);
    a.host_mut().fill(0.0);

    ctx.download(&mut [&mut a, &mut b]);
    assert!(a.host().iter().all(|v| *v == 1.0));
    assert!(b.host().iter().all(|v| *v == 2.0));
}

#[test]
fn float_buffer_roundtrip_in_both_precisions() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    let values: Vec<f32> = (0..1030).map(|i| i as f32 * 0.25).collect();
    for precision in [Precision::Float32, Precision::Float16] {
        for shared in [true, false] {
            let mut buffer = FloatBuffer::new(1000, 0, shared, precision);
            buffer.initialize_from(ctx, &values, 30);
            let downloaded = buffer.download(ctx);
            assert_eq!(downloaded.len(), 1000);
            // Quarter steps below 512 are exact in half precision.
            assert_eq!(
                downloaded.as_slice(),
                &values[30..1030],
                "{precision:?} shared={shared}"
            );

            buffer.reset();
            buffer.initialize(ctx);
            assert!(buffer.download(ctx).iter().all(|v| *v == 0.0));
        }
    }
}

#[test]
fn half_buffer_beyond_one_row_of_groups() {
    let Some((_guard, ctx)) = common::gpu() else {
        return;
    };
    // 3M threads need more groups than one dispatch axis holds.
    let n = 3_000_000;
    let values = common::ramp(n);
    let mut buffer = FloatBuffer::new(n, 0, true, Precision::Float16);
    buffer.initialize_from(ctx, &values, 0);
    let downloaded = buffer.download(ctx);
    assert_eq!(downloaded.len(), n);
    assert!(downloaded == values, "half round-trip of {n} elements");
}
