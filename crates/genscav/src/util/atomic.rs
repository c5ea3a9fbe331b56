//! Atomic Utilities
//!
//! Helper functions for atomic counters and the spin lock that guards a
//! mutator's allocation slow path.

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// AtomicUtils - utility for atomic operations
pub struct AtomicUtils;

impl AtomicUtils {
    /// Atomic fetch-sub that refuses to wrap
    ///
    /// Returns the previous value, or `None` (leaving the counter untouched) when
    /// `value` exceeds the current count.
    pub fn checked_sub(atomic: &AtomicUsize, value: usize) -> Option<usize> {
        let mut current = atomic.load(Ordering::Relaxed);

        loop {
            let new_value = current.checked_sub(value)?;

            match atomic.compare_exchange_weak(
                current,
                new_value,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current),
                Err(actual) => current = actual,
            }
        }
    }
}

/// SpinLock - test-and-test-and-set lock with exponential backoff
///
/// Held only for the few instructions it takes to refresh a mutator's chunks,
/// which never block, so spinning beats parking the thread.
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire the lock, spinning until it is free
    pub fn lock(&self) -> SpinLockGuard<'_> {
        let backoff = Backoff::new();
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard { lock: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    /// Try to acquire the lock without spinning
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard releasing a [`SpinLock`] on drop
pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_checked_sub_refuses_underflow() {
        let counter = AtomicUsize::new(3);
        assert_eq!(AtomicUtils::checked_sub(&counter, 2), Some(3));
        assert_eq!(AtomicUtils::checked_sub(&counter, 2), None);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_spin_lock_excludes() {
        let lock = SpinLock::new();
        let guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_spin_lock_counts_under_contention() {
        struct Shared {
            lock: SpinLock,
            value: std::cell::UnsafeCell<usize>,
        }
        unsafe impl Sync for Shared {}

        let shared = Arc::new(Shared {
            lock: SpinLock::new(),
            value: std::cell::UnsafeCell::new(0),
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = shared.lock.lock();
                        unsafe { *shared.value.get() += 1 };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }

        let _guard = shared.lock.lock();
        assert_eq!(unsafe { *shared.value.get() }, 4000);
    }
}
