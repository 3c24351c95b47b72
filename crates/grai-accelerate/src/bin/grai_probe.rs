use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use grai_accelerate::{
    reduce_max, reduce_sum, Buffer, ComputeContext, ComputeOptions, MetricsSnapshot,
};
use log::info;
use serde::Serialize;

const VALUE_TOLERANCE: f32 = 1e-3;

#[derive(Serialize)]
struct DeviceReport {
    id: usize,
    name: String,
    backend: String,
    device_type: String,
    execution_width: u32,
    max_threads_per_group: u32,
    pipelines: Vec<String>,
    smoke: SmokeReport,
    metrics: MetricsSnapshot,
}

#[derive(Serialize)]
struct SmokeReport {
    dim1: usize,
    dim2: usize,
    sum_ok: bool,
    max_ok: bool,
    elapsed_ms: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut output_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut dim1 = 257usize;
    let mut dim2 = 3usize;
    if let Some(pos) = args.iter().position(|a| a == "--output") {
        if pos + 1 < args.len() {
            output_path = Some(PathBuf::from(&args[pos + 1]));
        }
    }
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if pos + 1 < args.len() {
            config_path = Some(PathBuf::from(&args[pos + 1]));
        }
    }
    if let Some(pos) = args.iter().position(|a| a == "--dim1") {
        if pos + 1 < args.len() {
            dim1 = args[pos + 1].parse().context("--dim1 expects an integer")?;
        }
    }
    if let Some(pos) = args.iter().position(|a| a == "--dim2") {
        if pos + 1 < args.len() {
            dim2 = args[pos + 1].parse().context("--dim2 expects an integer")?;
        }
    }
    if dim1 == 0 || dim2 == 0 {
        bail!("--dim1 and --dim2 must be positive");
    }

    let options = match config_path {
        Some(path) => ComputeOptions::load(&path)?,
        None => ComputeOptions::from_env(),
    };
    let ctx = ComputeContext::new(options).context("failed to create compute context")?;

    let mut reports = Vec::with_capacity(ctx.nb_devices());
    for device in ctx.devices() {
        let smoke = run_smoke_test(&ctx, device.id(), dim1, dim2);
        info!(
            "device {} '{}': sum_ok={} max_ok={} ({:.3} ms)",
            device.id(),
            device.name(),
            smoke.sum_ok,
            smoke.max_ok,
            smoke.elapsed_ms
        );
        reports.push(DeviceReport {
            id: device.id(),
            name: device.name().to_string(),
            backend: format!("{:?}", device.info().backend),
            device_type: format!("{:?}", device.info().device_type),
            execution_width: device.execution_width(),
            max_threads_per_group: device.max_threads_per_group(),
            pipelines: device.pipelines().names(),
            smoke,
            metrics: ctx.metrics(device.id()),
        });
    }

    let json = serde_json::to_string_pretty(&reports)?;
    match output_path {
        Some(path) => {
            let mut file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            file.write_all(json.as_bytes())?;
            info!("Wrote probe report to {}", path.display());
        }
        None => println!("{json}"),
    }

    if reports.iter().any(|r| !r.smoke.sum_ok || !r.smoke.max_ok) {
        bail!("reduction smoke test failed");
    }
    Ok(())
}

/// Lane `l` holds `0, 1, ..., dim1 - 1` shifted by `l`.
fn run_smoke_test(ctx: &ComputeContext, device_id: usize, dim1: usize, dim2: usize) -> SmokeReport {
    let values: Vec<f32> = (0..dim2)
        .flat_map(|lane| (0..dim1).map(move |elem| (elem + lane) as f32))
        .collect();
    let mut input = Buffer::<f32>::new(dim1 * dim2, device_id, false);
    input.upload_from(ctx, &values);
    // Partials of the first pass may land in the output.
    let mut sums = Buffer::<f32>::new(dim1.max(1) * dim2, device_id, true);
    let mut maxima = Buffer::<f32>::new(dim1.max(1) * dim2, device_id, true);

    let started = Instant::now();
    reduce_sum(ctx, input.device_handle(ctx), sums.device_handle(ctx), dim1, dim2, device_id);
    reduce_max(ctx, input.device_handle(ctx), maxima.device_handle(ctx), dim1, dim2, device_id);
    let sums = sums.download(ctx)[..dim2].to_vec();
    let maxima = maxima.download(ctx)[..dim2].to_vec();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let base_sum = (dim1 * (dim1 - 1) / 2) as f32;
    let sum_ok = sums.iter().enumerate().all(|(lane, got)| {
        let expected = base_sum + (lane * dim1) as f32;
        (got - expected).abs() <= VALUE_TOLERANCE * expected.max(1.0)
    });
    let max_ok = maxima
        .iter()
        .enumerate()
        .all(|(lane, got)| *got == (dim1 - 1 + lane) as f32);

    SmokeReport {
        dim1,
        dim2,
        sum_ok,
        max_ok,
        elapsed_ms,
    }
}
