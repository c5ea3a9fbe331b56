//! Safepoint Management
//!
//! Collection is stop-the-world. Every heap operation a mutator performs
//! (allocation, reference stores, handle access) runs while holding the world
//! lock shared; the collector takes it exclusively. Holding the lock exclusively
//! therefore means every mutator is at a safepoint: outside of any heap operation,
//! holding no raw addresses the collector would have to know about.
//!
//! ## Safepoint States
//!
//! ```text
//! SAFEPOINT_NONE (0) ─────┐
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REQUESTED (1) │  collector waits for running heap operations
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REACHED (2) ──┘  world stopped, released when the guard drops
//! ```
//!
//! The world lock is not re-entrant: a thread that holds it shared must never try
//! to stop the world, which is why allocation drops its guard before triggering a
//! collection.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Safepoint state constants
pub const SAFEPOINT_NONE: u8 = 0;
pub const SAFEPOINT_REQUESTED: u8 = 1;
pub const SAFEPOINT_REACHED: u8 = 2;

/// Safepoint - the world lock shared by mutators and the collector
pub struct Safepoint {
    world: RwLock<()>,
    state: AtomicU8,
    safepoints: AtomicU64,
}

/// Held by a mutator for the duration of one heap operation
pub type MutatorGuard<'a> = RwLockReadGuard<'a, ()>;

/// Held by the collector while the world is stopped
pub struct WorldStopped<'a> {
    safepoint: &'a Safepoint,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for WorldStopped<'_> {
    fn drop(&mut self) {
        self.safepoint.state.store(SAFEPOINT_NONE, Ordering::Release);
    }
}

impl Safepoint {
    pub fn new() -> Self {
        Self {
            world: RwLock::new(()),
            state: AtomicU8::new(SAFEPOINT_NONE),
            safepoints: AtomicU64::new(0),
        }
    }

    /// Start a heap operation; blocks while the world is stopped
    #[inline]
    pub fn enter(&self) -> MutatorGuard<'_> {
        self.world.read()
    }

    /// Wait until no heap operation is running and keep new ones out
    pub fn stop_the_world(&self) -> WorldStopped<'_> {
        self.state.store(SAFEPOINT_REQUESTED, Ordering::Release);
        let guard = self.world.write();
        self.state.store(SAFEPOINT_REACHED, Ordering::Release);
        self.safepoints.fetch_add(1, Ordering::Relaxed);
        WorldStopped {
            safepoint: self,
            _guard: guard,
        }
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// True while a collector waits for, or holds, the world
    pub fn is_requested(&self) -> bool {
        self.state() != SAFEPOINT_NONE
    }

    pub fn is_world_stopped(&self) -> bool {
        self.state() == SAFEPOINT_REACHED
    }

    /// Number of times the world was stopped
    pub fn safepoint_count(&self) -> u64 {
        self.safepoints.load(Ordering::Relaxed)
    }
}

impl Default for Safepoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_state_follows_guard() {
        let safepoint = Safepoint::new();
        assert_eq!(safepoint.state(), SAFEPOINT_NONE);
        {
            let _world = safepoint.stop_the_world();
            assert!(safepoint.is_world_stopped());
        }
        assert_eq!(safepoint.state(), SAFEPOINT_NONE);
        assert_eq!(safepoint.safepoint_count(), 1);
    }

    #[test]
    fn test_mutators_share_the_world() {
        let safepoint = Safepoint::new();
        let a = safepoint.enter();
        let b = safepoint.enter();
        drop((a, b));
    }

    #[test]
    fn test_collector_waits_for_running_operation() {
        let safepoint = Arc::new(Safepoint::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let guard = safepoint.enter();
        let collector = {
            let safepoint = Arc::clone(&safepoint);
            let stopped = Arc::clone(&stopped);
            thread::spawn(move || {
                let _world = safepoint.stop_the_world();
                stopped.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!stopped.load(Ordering::SeqCst));
        drop(guard);
        collector.join().expect("collector thread");
        assert!(stopped.load(Ordering::SeqCst));
    }
}
