//! Wall-clock time transactions.
//!
//! A transaction runs from `start` to `stop`. Starting again while one is running does not
//! open a nested transaction; the first `stop` closes it. Each stop adds the elapsed time to
//! a per-id total that [`TimeTracker::dump_stacked`] reports and clears.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::info;

use crate::error::{ComputeError, Result};

#[derive(Debug, Default)]
pub struct TimeTracker {
    enabled: bool,
    nb_running: usize,
    started: Option<Instant>,
    stacked: BTreeMap<String, Duration>,
}

impl TimeTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_running(&self) -> bool {
        self.nb_running > 0
    }

    pub fn start(&mut self) {
        if self.enabled && !self.is_running() {
            self.nb_running += 1;
            self.started = Some(Instant::now());
        }
    }

    /// Closes the running transaction and charges its time to `id`.
    pub fn stop(&mut self, id: &str, description: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if !self.is_running() {
            return Err(ComputeError::TimeTransaction);
        }
        self.nb_running -= 1;
        if !self.is_running() {
            let elapsed = self
                .started
                .take()
                .map(|started| started.elapsed())
                .unwrap_or_default();
            info!("{} {}: {}", id, description, format_elapsed(elapsed));
            *self.stacked.entry(id.to_string()).or_default() += elapsed;
        }
        Ok(())
    }

    /// Accumulated time per id, without clearing it.
    pub fn stacked(&self) -> &BTreeMap<String, Duration> {
        &self.stacked
    }

    /// Logs and returns the accumulated time per id, then clears it.
    pub fn dump_stacked(&mut self) -> Result<BTreeMap<String, Duration>> {
        if !self.enabled {
            return Err(ComputeError::TimeNotTracked);
        }
        for (id, elapsed) in &self.stacked {
            info!("{}: {}", id, format_elapsed(*elapsed));
        }
        Ok(std::mem::take(&mut self.stacked))
    }
}

/// `"1.5s"`, or `"1.5min90s"` from one minute on (fractional minutes, then total seconds).
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    let minutes = seconds / 60.0;
    if minutes >= 1.0 {
        format!("{}min{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracker_ignores_transactions() {
        let mut tracker = TimeTracker::new(false);
        tracker.start();
        assert!(!tracker.is_running());
        assert!(tracker.stop("forward", "layer").is_ok());
        assert!(matches!(
            tracker.dump_stacked(),
            Err(ComputeError::TimeNotTracked)
        ));
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let mut tracker = TimeTracker::new(true);
        assert!(matches!(
            tracker.stop("forward", "layer"),
            Err(ComputeError::TimeTransaction)
        ));
    }

    #[test]
    fn repeated_start_keeps_one_transaction() {
        let mut tracker = TimeTracker::new(true);
        tracker.start();
        tracker.start();
        tracker.stop("backward", "conv").unwrap();
        assert!(!tracker.is_running());
        assert!(tracker.stop("backward", "conv").is_err());
    }

    #[test]
    fn times_stack_per_id_until_dumped() {
        let mut tracker = TimeTracker::new(true);
        for _ in 0..2 {
            tracker.start();
            tracker.stop("reduce", "sum").unwrap();
        }
        tracker.start();
        tracker.stop("upload", "batch").unwrap();
        assert_eq!(tracker.stacked().len(), 2);

        let dumped = tracker.dump_stacked().unwrap();
        assert!(dumped.contains_key("reduce"));
        assert!(dumped.contains_key("upload"));
        assert!(tracker.stacked().is_empty());
    }

    #[test]
    fn elapsed_switches_to_minutes() {
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_elapsed(Duration::from_secs(90)), "1.5min90s");
        assert_eq!(format_elapsed(Duration::from_secs(60)), "1min60s");
        assert_eq!(format_elapsed(Duration::from_millis(59_500)), "59.5s");
    }
}
