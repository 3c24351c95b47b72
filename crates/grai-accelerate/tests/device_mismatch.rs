mod common;

use grai_accelerate::{ensure_same_device, Buffer};

#[test]
#[should_panic(expected = "share one device")]
fn batch_spanning_devices_is_fatal() {
    let Some((_guard, ctx)) = common::gpu() else {
        // Same check the context runs before touching any device.
        ensure_same_device([0, 1]);
        return;
    };
    let mut a = Buffer::<f32>::new(4, 0, true);
    let mut b = Buffer::<f32>::new(4, 1, true);
    ctx.download(&mut [&mut a, &mut b]);
}

#[test]
#[should_panic(expected = "batch is empty")]
fn empty_batch_is_fatal() {
    let Some((_guard, ctx)) = common::gpu() else {
        ensure_same_device(Vec::new());
        return;
    };
    ctx.upload::<f32>(&mut []);
}
