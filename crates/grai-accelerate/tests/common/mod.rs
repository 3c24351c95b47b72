#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use grai_accelerate::{ComputeContext, ComputeOptions};
use once_cell::sync::Lazy;

static GPU_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

static CONTEXT: Lazy<Option<ComputeContext>> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
    match ComputeContext::new(ComputeOptions::default()) {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
});

/// Held by every test that talks to an adapter.
pub fn serial() -> MutexGuard<'static, ()> {
    GPU_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes GPU tests on the shared context; `None` when no adapter is available.
pub fn gpu() -> Option<(MutexGuard<'static, ()>, &'static ComputeContext)> {
    let guard = serial();
    CONTEXT.as_ref().map(|ctx| (guard, ctx))
}

pub fn ramp(n: usize) -> Vec<f32> {
    (0..n).map(|i| (i % 1000) as f32 * 0.5 - 17.0).collect()
}
