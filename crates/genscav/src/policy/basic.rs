//! Basic collection policies
//!
//! - [`FixedThresholdPolicy`]: collect when the young generation reaches its
//!   maximum size; go complete when the old generation passes a threshold or every
//!   N incremental collections. Once live old data alone exceeds the threshold,
//!   the old generation must grow by half the threshold past what the last
//!   complete collection left before it escalates again
//! - [`AlwaysCompletely`]: every collection is complete
//! - [`OnlyIncrementally`]: never complete unless explicitly requested
//!
//! All three share [`SizeLimits`], which lets the maximum young generation size be
//! adjusted while the heap runs.

use crate::config::HeapConfig;
use crate::error::Result;
use crate::policy::{CollectionPolicy, HeapSizes, PolicyLimits};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Validated, adjustable size bounds
pub struct SizeLimits {
    limits: RwLock<PolicyLimits>,
    tenuring_age: usize,
}

impl SizeLimits {
    pub fn new(limits: PolicyLimits, tenuring_age: usize) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            limits: RwLock::new(limits),
            tenuring_age,
        })
    }

    pub fn from_config(config: &HeapConfig) -> Result<Self> {
        Self::new(
            PolicyLimits::from_config(config),
            config.tenuring_age.min(config.max_survivor_spaces),
        )
    }

    pub fn get(&self) -> PolicyLimits {
        *self.limits.read()
    }

    pub fn tenuring_age(&self) -> usize {
        self.tenuring_age
    }

    /// Young generation is full
    pub fn young_exhausted(&self, sizes: &HeapSizes) -> bool {
        sizes.young_bytes() >= self.limits.read().max_young_size
    }

    pub fn set_max_young_size(&self, bytes: usize) -> Result<()> {
        let mut limits = self.limits.write();
        let candidate = PolicyLimits {
            max_young_size: bytes,
            ..*limits
        };
        candidate.validate()?;
        *limits = candidate;
        log::debug!("maximum young generation size set to {} bytes", bytes);
        Ok(())
    }
}

/// FixedThresholdPolicy - size thresholds for both generations
pub struct FixedThresholdPolicy {
    limits: SizeLimits,
    old_threshold: usize,
    complete_every: Option<u64>,
    incrementals_since_complete: AtomicU64,
    /// Old generation bytes left by the last complete collection
    old_after_complete: AtomicUsize,
}

impl FixedThresholdPolicy {
    pub fn new(limits: SizeLimits, old_threshold: usize) -> Self {
        Self {
            limits,
            old_threshold,
            complete_every: None,
            incrementals_since_complete: AtomicU64::new(0),
            old_after_complete: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &HeapConfig) -> Result<Self> {
        Ok(Self::new(
            SizeLimits::from_config(config)?,
            config.old_collection_threshold,
        ))
    }

    /// Also go complete after `count` incremental collections in a row
    pub fn with_complete_every(mut self, count: u64) -> Self {
        self.complete_every = Some(count.max(1));
        self
    }

    pub fn old_threshold(&self) -> usize {
        self.old_threshold
    }

    /// Old generation size at which an incremental collection escalates
    pub fn escalation_threshold(&self) -> usize {
        let headroom = self.old_threshold / 2;
        let baseline = self.old_after_complete.load(Ordering::Relaxed);
        self.old_threshold.max(baseline.saturating_add(headroom))
    }
}

impl CollectionPolicy for FixedThresholdPolicy {
    fn name(&self) -> &'static str {
        "fixed-threshold"
    }

    fn should_collect_on_allocation(&self, sizes: &HeapSizes) -> bool {
        self.limits.young_exhausted(sizes)
    }

    fn should_collect_completely(&self, following_incremental: bool, sizes: &HeapSizes) -> bool {
        if following_incremental {
            return sizes.old_bytes >= self.escalation_threshold();
        }
        match self.complete_every {
            Some(count) => self.incrementals_since_complete.load(Ordering::Relaxed) >= count,
            None => false,
        }
    }

    fn tenuring_age(&self) -> usize {
        self.limits.tenuring_age()
    }

    fn limits(&self) -> PolicyLimits {
        self.limits.get()
    }

    fn set_maximum_young_generation_size(&self, bytes: usize) -> Result<()> {
        self.limits.set_max_young_size(bytes)
    }

    fn on_collection_end(&self, complete: bool, sizes: &HeapSizes) {
        if complete {
            self.incrementals_since_complete.store(0, Ordering::Relaxed);
            self.old_after_complete.store(sizes.old_bytes, Ordering::Relaxed);
        } else {
            self.incrementals_since_complete.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// AlwaysCompletely - every collection includes the old generation
pub struct AlwaysCompletely {
    limits: SizeLimits,
}

impl AlwaysCompletely {
    pub fn new(limits: SizeLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &HeapConfig) -> Result<Self> {
        Ok(Self::new(SizeLimits::from_config(config)?))
    }
}

impl CollectionPolicy for AlwaysCompletely {
    fn name(&self) -> &'static str {
        "always-completely"
    }

    fn should_collect_on_allocation(&self, sizes: &HeapSizes) -> bool {
        self.limits.young_exhausted(sizes)
    }

    fn should_collect_completely(&self, _following_incremental: bool, _sizes: &HeapSizes) -> bool {
        true
    }

    fn tenuring_age(&self) -> usize {
        self.limits.tenuring_age()
    }

    fn limits(&self) -> PolicyLimits {
        self.limits.get()
    }

    fn set_maximum_young_generation_size(&self, bytes: usize) -> Result<()> {
        self.limits.set_max_young_size(bytes)
    }
}

/// OnlyIncrementally - complete collections only on explicit request
pub struct OnlyIncrementally {
    limits: SizeLimits,
}

impl OnlyIncrementally {
    pub fn new(limits: SizeLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &HeapConfig) -> Result<Self> {
        Ok(Self::new(SizeLimits::from_config(config)?))
    }
}

impl CollectionPolicy for OnlyIncrementally {
    fn name(&self) -> &'static str {
        "only-incrementally"
    }

    fn should_collect_on_allocation(&self, sizes: &HeapSizes) -> bool {
        self.limits.young_exhausted(sizes)
    }

    fn should_collect_completely(&self, _following_incremental: bool, _sizes: &HeapSizes) -> bool {
        false
    }

    fn tenuring_age(&self) -> usize {
        self.limits.tenuring_age()
    }

    fn limits(&self) -> PolicyLimits {
        self.limits.get()
    }

    fn set_maximum_young_generation_size(&self, bytes: usize) -> Result<()> {
        self.limits.set_max_young_size(bytes)
    }
}
