//! Roots - where tracing starts
//!
//! The heap does not walk thread stacks, thread locals, code or image heaps
//! itself. Each of those registers a [`RootProvider`] that hands every root slot
//! to the collector, which may overwrite it with the object's new address.
//!
//! Two root sources are owned by the heap:
//! - the [`HandleTable`] of global handles, the only way a mutator can keep an
//!   object across a collection without a provider
//! - the [`PinnedObjects`] registry; pinned objects are roots that never move

use crate::error::{GcError, Result};
use indexmap::IndexMap;
use parking_lot::Mutex;

/// Root types for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootType {
    /// Stack slots of mutator threads
    Stack,
    /// Thread-local variables
    ThreadLocal,
    /// Static fields and other globals
    Global,
    /// References embedded in compiled code
    Code,
    /// References from the image heap
    Image,
    /// Global handles
    Handle,
    /// Pinned objects
    Pinned,
}

impl std::fmt::Display for RootType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RootType::Stack => "Stack",
            RootType::ThreadLocal => "ThreadLocal",
            RootType::Global => "Global",
            RootType::Code => "Code",
            RootType::Image => "Image",
            RootType::Handle => "Handle",
            RootType::Pinned => "Pinned",
        };
        f.write_str(name)
    }
}

/// Source of root slots outside the heap
///
/// `visit_roots` is called once per collection while the world is stopped. The
/// visitor receives each slot and may rewrite it; null slots (0) may be passed or
/// skipped.
///
/// # Examples
///
/// ```rust
/// use genscav::marker::roots::{RootProvider, RootType};
/// use parking_lot::Mutex;
///
/// struct ShadowStack(Mutex<Vec<usize>>);
///
/// impl RootProvider for ShadowStack {
///     fn root_type(&self) -> RootType {
///         RootType::Stack
///     }
///
///     fn visit_roots(&self, visitor: &mut dyn FnMut(&mut usize)) {
///         for slot in self.0.lock().iter_mut() {
///             visitor(slot);
///         }
///     }
/// }
/// ```
pub trait RootProvider: Send + Sync {
    fn root_type(&self) -> RootType;

    fn visit_roots(&self, visitor: &mut dyn FnMut(&mut usize));
}

/// A growable set of root slots, usable as a simple provider
#[derive(Debug)]
pub struct RootSet {
    root_type: RootType,
    slots: Mutex<Vec<usize>>,
}

impl RootSet {
    pub fn new(root_type: RootType) -> Self {
        Self {
            root_type,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Add a slot, returning its index
    pub fn push(&self, obj: usize) -> usize {
        let mut slots = self.slots.lock();
        slots.push(obj);
        slots.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<usize> {
        self.slots.lock().get(index).copied()
    }

    pub fn set(&self, index: usize, obj: usize) {
        if let Some(slot) = self.slots.lock().get_mut(index) {
            *slot = obj;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<usize> {
        self.slots.lock().clone()
    }
}

impl RootProvider for RootSet {
    fn root_type(&self) -> RootType {
        self.root_type
    }

    fn visit_roots(&self, visitor: &mut dyn FnMut(&mut usize)) {
        for slot in self.slots.lock().iter_mut() {
            visitor(slot);
        }
    }
}

/// Global handle: an index into the handle table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// HandleTable - slots the collector updates in place
#[derive(Debug, Default)]
pub struct HandleTable {
    slots: Vec<Option<usize>>,
    free: Vec<usize>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, obj: usize) -> Handle {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(obj);
                Handle(index)
            }
            None => {
                self.slots.push(Some(obj));
                Handle(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, handle: Handle) -> Result<usize> {
        self.slots
            .get(handle.0)
            .copied()
            .flatten()
            .ok_or(GcError::InvalidHandle(handle.0))
    }

    pub fn set(&mut self, handle: Handle, obj: usize) -> Result<()> {
        match self.slots.get_mut(handle.0) {
            Some(Some(slot)) => {
                *slot = obj;
                Ok(())
            }
            _ => Err(GcError::InvalidHandle(handle.0)),
        }
    }

    pub fn remove(&mut self, handle: Handle) -> Result<usize> {
        match self.slots.get_mut(handle.0).and_then(Option::take) {
            Some(obj) => {
                self.free.push(handle.0);
                Ok(obj)
            }
            None => Err(GcError::InvalidHandle(handle.0)),
        }
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each_mut<F>(&mut self, mut visitor: F)
    where
        F: FnMut(&mut usize),
    {
        for slot in self.slots.iter_mut().flatten() {
            visitor(slot);
        }
    }
}

/// PinnedObjects - registry of objects that must not move
#[derive(Debug, Default)]
pub struct PinnedObjects {
    objects: IndexMap<u64, usize>,
    next_id: u64,
}

impl PinnedObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, obj: usize) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, obj);
        id
    }

    pub fn remove(&mut self, id: u64) -> Option<usize> {
        self.objects.shift_remove(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains_object(&self, obj: usize) -> bool {
        self.objects.values().any(|&o| o == obj)
    }

    pub fn objects(&self) -> impl Iterator<Item = usize> + '_ {
        self.objects.values().copied()
    }
}

/// Per-collection root counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RootStats {
    pub handles: usize,
    pub provided: usize,
    pub pinned: usize,
    pub null_roots: usize,
}

impl RootStats {
    pub fn total(&self) -> usize {
        self.handles + self.provided + self.pinned
    }
}

impl std::fmt::Display for RootStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RootStats {{ handles: {}, provided: {}, pinned: {}, null: {} }}",
            self.handles, self.provided, self.pinned, self.null_roots
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_table_reuses_released_slots() {
        let mut table = HandleTable::new();
        let a = table.insert(0x1000);
        let b = table.insert(0x2000);
        assert_eq!(table.len(), 2);

        assert_eq!(table.remove(a).expect("live handle"), 0x1000);
        assert!(matches!(table.get(a), Err(GcError::InvalidHandle(0))));
        assert!(table.remove(a).is_err());

        let c = table.insert(0x3000);
        assert_eq!(c.index(), a.index());
        assert_eq!(table.get(b).expect("live handle"), 0x2000);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_handle_table_visits_live_slots() {
        let mut table = HandleTable::new();
        let a = table.insert(8);
        let b = table.insert(16);
        table.remove(a).expect("live handle");
        table.for_each_mut(|slot| *slot += 1);
        assert_eq!(table.get(b).expect("live handle"), 17);
    }

    #[test]
    fn test_root_set_as_provider() {
        let roots = RootSet::new(RootType::Stack);
        roots.push(0x10);
        roots.push(0);
        roots.visit_roots(&mut |slot| {
            if *slot != 0 {
                *slot = 0x20
            }
        });
        assert_eq!(roots.snapshot(), vec![0x20, 0]);
        assert_eq!(roots.root_type(), RootType::Stack);
    }

    #[test]
    fn test_pinned_registry() {
        let mut pinned = PinnedObjects::new();
        let a = pinned.insert(0x100);
        let b = pinned.insert(0x100);
        assert_ne!(a, b);
        assert!(pinned.contains_object(0x100));
        assert_eq!(pinned.remove(a), Some(0x100));
        assert!(pinned.contains_object(0x100));
        assert_eq!(pinned.remove(b), Some(0x100));
        assert!(pinned.is_empty());
    }
}
