//! GC Logging and Tracing
//!
//! Every collection reports through a [`GcLogger`] owned by its heap. Events are
//! kept in a bounded history for inspection and, when the heap is verbose, printed
//! to the console in human form or as JSON.
//!
//! Log Levels:
//! - ERROR: allocation failures that surface as out-of-memory
//! - INFO: collection start and end, heap statistics
//! - DEBUG: phase timings
//! - TRACE: promotion and compaction counters
//!
//! Independently of the console output, events are forwarded to the `log` facade
//! at their level, so an application logger sees the same stream.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// GC event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// Collection started
    CycleStart {
        epoch: u64,
        kind: String,
        cause: String,
    },

    /// Collection phase completed
    PhaseEnd {
        epoch: u64,
        phase: String,
        duration_ms: f64,
    },

    /// Collection completed
    CycleEnd {
        epoch: u64,
        kind: String,
        duration_ms: f64,
        collected_bytes: usize,
    },

    /// Heap occupancy after a collection
    HeapStats {
        young_bytes: usize,
        old_bytes: usize,
        committed_bytes: usize,
        free_list_bytes: usize,
    },

    /// Allocation that failed even after a collection
    AllocationFailure { size: usize, committed_bytes: usize },

    /// Scavenge counters
    PromotionStats {
        copied_objects: u64,
        copied_bytes: usize,
        promoted_chunks: u64,
        tenured_bytes: usize,
    },

    /// Mark-compact counters
    CompactionStats {
        marked_objects: u64,
        moved_bytes: usize,
        swept_chunks: u64,
        released_chunks: u64,
    },

    /// Weak reference processing
    ReferenceStats { cleared: u64, kept: u64 },

    /// Heap verification found problems
    VerificationFailure { when: String, failures: usize },
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Print events to stdout
    pub console: bool,

    /// Print JSON instead of human-readable lines
    pub json: bool,

    /// Prefix console lines with a wall-clock timestamp
    pub timestamps: bool,

    /// Events kept in the history; the oldest are dropped first
    pub history: usize,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
            history: 1024,
        }
    }
}

/// GC Logger - per-heap record of collection events
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<VecDeque<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    /// Create new GC logger
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.history.min(1024))),
            config,
            enabled: AtomicBool::new(true),
        }
    }

    /// Logger printing to the console, as configured by `HeapConfig::verbose`
    pub fn verbose() -> Self {
        Self::new(GcLoggerConfig {
            level: LogLevel::Debug,
            console: true,
            ..Default::default()
        })
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a GC event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = Self::event_level(&event);
        log::log!(level.to_log(), "{}", Self::format_human(&event));

        if level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() == self.config.history {
            events.pop_front();
        }
        if self.config.history > 0 {
            events.push_back((Instant::now(), event));
        }
    }

    fn event_level(event: &GcEvent) -> LogLevel {
        match event {
            GcEvent::AllocationFailure { .. } => LogLevel::Error,
            GcEvent::VerificationFailure { .. } => LogLevel::Warn,
            GcEvent::CycleStart { .. } | GcEvent::CycleEnd { .. } | GcEvent::HeapStats { .. } => {
                LogLevel::Info
            }
            GcEvent::PhaseEnd { .. } => LogLevel::Debug,
            GcEvent::PromotionStats { .. }
            | GcEvent::CompactionStats { .. }
            | GcEvent::ReferenceStats { .. } => LogLevel::Trace,
        }
    }

    fn output_console(&self, event: &GcEvent) {
        let line = if self.config.json {
            match serde_json::to_string(event) {
                Ok(json) => json,
                Err(_) => return,
            }
        } else {
            Self::format_human(event)
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);
        } else {
            println!("{}", line);
        }
    }

    /// Render an event the way it appears on the console
    pub fn format_human(event: &GcEvent) -> String {
        match event {
            GcEvent::CycleStart { epoch, kind, cause } => {
                format!("[GC] Collection {} started ({}, cause: {})", epoch, kind, cause)
            }
            GcEvent::PhaseEnd {
                epoch,
                phase,
                duration_ms,
            } => format!(
                "[GC] Collection {}: {} completed ({:.3}ms)",
                epoch, phase, duration_ms
            ),
            GcEvent::CycleEnd {
                epoch,
                kind,
                duration_ms,
                collected_bytes,
            } => format!(
                "[GC] Collection {} completed ({}, {:.3}ms, collected {} bytes)",
                epoch, kind, duration_ms, collected_bytes
            ),
            GcEvent::HeapStats {
                young_bytes,
                old_bytes,
                committed_bytes,
                free_list_bytes,
            } => format!(
                "[GC] Heap: young {} bytes, old {} bytes, committed {} bytes ({} on free list)",
                young_bytes, old_bytes, committed_bytes, free_list_bytes
            ),
            GcEvent::AllocationFailure {
                size,
                committed_bytes,
            } => format!(
                "[GC] Allocation failure: {} bytes (committed: {})",
                size, committed_bytes
            ),
            GcEvent::PromotionStats {
                copied_objects,
                copied_bytes,
                promoted_chunks,
                tenured_bytes,
            } => format!(
                "[GC] Copied {} objects ({} bytes), promoted {} chunks, tenured {} bytes",
                copied_objects, copied_bytes, promoted_chunks, tenured_bytes
            ),
            GcEvent::CompactionStats {
                marked_objects,
                moved_bytes,
                swept_chunks,
                released_chunks,
            } => format!(
                "[GC] Marked {} objects, moved {} bytes, swept {} chunks, released {} chunks",
                marked_objects, moved_bytes, swept_chunks, released_chunks
            ),
            GcEvent::ReferenceStats { cleared, kept } => {
                format!("[GC] References: {} cleared, {} kept", cleared, kept)
            }
            GcEvent::VerificationFailure { when, failures } => {
                format!("[GC] Verification {} found {} problem(s)", when, failures)
            }
        }
    }

    /// Snapshot of the event history, oldest first
    pub fn events(&self) -> Vec<GcEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// History as JSON lines
    pub fn events_json(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| serde_json::to_string(e).ok())
            .collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(epoch: u64) -> GcEvent {
        GcEvent::CycleStart {
            epoch,
            kind: "incremental".to_string(),
            cause: "explicit".to_string(),
        }
    }

    #[test]
    fn test_gc_logger_basic() {
        let logger = GcLogger::default();
        logger.log(start(1));
        assert_eq!(logger.event_count(), 1);
        assert_eq!(logger.events(), vec![start(1)]);
    }

    #[test]
    fn test_gc_logger_disable() {
        let logger = GcLogger::default();
        logger.disable();
        logger.log(start(1));
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_level_filters_history() {
        let logger = GcLogger::default();
        logger.log(GcEvent::ReferenceStats {
            cleared: 1,
            kept: 2,
        });
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let logger = GcLogger::new(GcLoggerConfig {
            history: 2,
            ..Default::default()
        });
        for epoch in 0..5 {
            logger.log(start(epoch));
        }
        assert_eq!(logger.events(), vec![start(3), start(4)]);
    }

    #[test]
    fn test_json_is_tagged() {
        let logger = GcLogger::default();
        logger.log(start(7));
        let json = logger.events_json();
        assert_eq!(json.len(), 1);
        assert!(json[0].contains("\"type\":\"cycle_start\""));
        assert!(json[0].contains("\"epoch\":7"));
    }
}
