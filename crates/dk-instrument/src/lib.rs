//! Instrumentation (component L): a small atomic counter that logs its
//! own progress every `trigger` increments, plus elapsed-time tracking.
//!
//! Grounded on the `CounterLogger` usage visible in
//! `original_source/examples/example_counter_logger.py` and threaded
//! through `dkit/multi_processing.py` (`counter_in`/`counter_out`) and
//! `dkit/etl/verifier.py` (`self.stats`). The original wraps a logger
//! instance directly; here progress is emitted via `tracing` at the
//! `info` level, consistent with the rest of this workspace's ambient
//! logging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

pub const DEFAULT_TRIGGER: u64 = 10_000;

/// Atomic, thread-safe progress counter. Cheap to clone-share via `Arc`.
pub struct CounterLogger {
    name: String,
    trigger: u64,
    value: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    stopped_at: Mutex<Option<Instant>>,
}

impl CounterLogger {
    pub fn new(name: impl Into<String>) -> Self {
        CounterLogger::with_trigger(name, DEFAULT_TRIGGER)
    }

    pub fn with_trigger(name: impl Into<String>, trigger: u64) -> Self {
        CounterLogger {
            name: name.into(),
            trigger: trigger.max(1),
            value: AtomicU64::new(0),
            started_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
        }
    }

    /// Mark the counter as started, returning `self` so construction can
    /// chain (`CounterLogger::new("x").start()`), matching the original's
    /// `.start()` builder style.
    pub fn start(self) -> Self {
        *self.started_at.lock().unwrap() = Some(Instant::now());
        self
    }

    pub fn stop(&self) {
        *self.stopped_at.lock().unwrap() = Some(Instant::now());
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Add `n` to the counter, logging a progress line whenever the new
    /// total crosses a multiple of `trigger`. Returns the new total.
    pub fn increment(&self, n: u64) -> u64 {
        let new_value = self.value.fetch_add(n, Ordering::Relaxed) + n;
        if new_value % self.trigger == 0 {
            tracing::info!(counter = %self.name, value = new_value, "progress");
        }
        new_value
    }

    pub fn seconds_elapsed(&self) -> f64 {
        let started = self.started_at.lock().unwrap();
        let Some(started) = *started else {
            return 0.0;
        };
        let stopped = self.stopped_at.lock().unwrap();
        let end = stopped.unwrap_or_else(Instant::now);
        end.duration_since(started).as_secs_f64()
    }
}

impl std::fmt::Display for CounterLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_and_reports_the_running_total() {
        let counter = CounterLogger::new("test").start();
        counter.increment(3);
        counter.increment(4);
        assert_eq!(counter.value(), 7);
    }

    #[test]
    fn logs_on_trigger_boundaries_without_panicking() {
        let counter = CounterLogger::with_trigger("test", 2).start();
        for _ in 0..5 {
            counter.increment(1);
        }
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn tracks_elapsed_time_once_stopped() {
        let counter = CounterLogger::new("test").start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        counter.stop();
        assert!(counter.seconds_elapsed() > 0.0);
    }
}
