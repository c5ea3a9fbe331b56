//! GC Timer - Timing Utilities
//!
//! `GcTimer` measures a whole collection; `PhaseTimers` records how long each
//! named phase of one collection took, in the order the phases ran.

use indexmap::IndexMap;
use std::time::{Duration, Instant};

/// GcTimer - timer for measuring GC operations
pub struct GcTimer {
    start: Instant,
}

impl GcTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed().as_nanos() as u64
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for GcTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-phase durations of one collection
///
/// A phase that runs twice (an incremental collection followed by a complete one)
/// accumulates.
#[derive(Debug, Default, Clone)]
pub struct PhaseTimers {
    phases: IndexMap<&'static str, Duration>,
}

impl PhaseTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` and charge its duration to `phase`
    pub fn time<R>(&mut self, phase: &'static str, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.record(phase, start.elapsed());
        result
    }

    pub fn record(&mut self, phase: &'static str, duration: Duration) {
        *self.phases.entry(phase).or_default() += duration;
    }

    pub fn get(&self, phase: &str) -> Option<Duration> {
        self.phases.get(phase).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ {
        self.phases.iter().map(|(k, v)| (*k, *v))
    }

    pub fn total(&self) -> Duration {
        self.phases.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}
