use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-device counters.
pub struct WgpuMetrics {
    pipeline_hits: AtomicU64,
    pipeline_misses: AtomicU64,
    variants_built: AtomicU64,
    upload_bytes: AtomicU64,
    download_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub pipeline_hits: u64,
    pub pipeline_misses: u64,
    pub variants_built: u64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

impl Default for WgpuMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WgpuMetrics {
    pub fn new() -> Self {
        Self {
            pipeline_hits: AtomicU64::new(0),
            pipeline_misses: AtomicU64::new(0),
            variants_built: AtomicU64::new(0),
            upload_bytes: AtomicU64::new(0),
            download_bytes: AtomicU64::new(0),
        }
    }

    pub fn inc_hit(&self) {
        self.pipeline_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_miss(&self) {
        self.pipeline_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_variant(&self) {
        self.variants_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_upload_bytes(&self, bytes: u64) {
        self.upload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_download_bytes(&self, bytes: u64) {
        self.download_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pipeline_hits: self.pipeline_hits.load(Ordering::Relaxed),
            pipeline_misses: self.pipeline_misses.load(Ordering::Relaxed),
            variants_built: self.variants_built.load(Ordering::Relaxed),
            upload_bytes: self.upload_bytes.load(Ordering::Relaxed),
            download_bytes: self.download_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.pipeline_hits.store(0, Ordering::Relaxed);
        self.pipeline_misses.store(0, Ordering::Relaxed);
        self.variants_built.store(0, Ordering::Relaxed);
        self.upload_bytes.store(0, Ordering::Relaxed);
        self.download_bytes.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let metrics = WgpuMetrics::new();
        metrics.inc_hit();
        metrics.inc_hit();
        metrics.inc_miss();
        metrics.add_download_bytes(4096);
        let snap = metrics.snapshot();
        assert_eq!(snap.pipeline_hits, 2);
        assert_eq!(snap.pipeline_misses, 1);
        assert_eq!(snap.download_bytes, 4096);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
