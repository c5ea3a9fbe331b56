//! Heap Management Module - chunked, generational heap
//!
//! The heap is a set of chunks owned by spaces, grouped into a young and an old
//! generation:
//!
//! ```text
//!   young generation                       old generation
//!   ┌──────┐ ┌────────────┐ ┌──────────┐    ┌─────────────────────┐
//!   │ eden │ │ survivor 1 │ │ ...      │ ─► │ from / to (copying) │
//!   └──────┘ └────────────┘ └──────────┘    │ single (compacting) │
//!       ▲                                   └─────────────────────┘
//!       │ retired at every collection
//!   mutator-owned chunks (not in any space until retired)
//! ```
//!
//! - **Aligned chunks** hold many objects, sit on their own alignment and carry a
//!   card table and first-object table when the remembered set is enabled.
//! - **Unaligned chunks** hold one large object and move between spaces whole.
//!
//! [`Heap`] is the explicit context everything hangs off: the chunk allocator, the
//! space/generation state behind one lock, the world lock, the collector and the
//! root registries. There is no global heap.

pub mod accounting;
pub mod aligned;
pub mod chunk;
pub mod old;
pub mod space;
pub mod state;
pub mod unaligned;
pub mod verify;
pub mod walk;
pub mod young;

pub use accounting::ChunksAccounting;
pub use chunk::{ChunkKind, ChunkLayout, ChunkRef};
pub use space::{GenerationKind, Space, SpaceId};
pub use state::HeapState;
pub use walk::{ChunkInfo, ObjectInfo, SpaceSummary, SpaceUsage};

use crate::allocator::{Mutator, MutatorState};
use crate::barrier::{post_write_barrier, RememberedSet};
use crate::config::HeapConfig;
use crate::error::{GcError, Result};
use crate::gc::{CollectionWatcher, GarbageCollector, GcCause};
use crate::logging::GcLogger;
use crate::marker::{Handle, HandleTable, PinnedObjects, RootProvider};
use crate::memory::ChunkAllocator;
use crate::object::{self, read_slot, write_slot};
use crate::policy::{default_policy, CollectionPolicy, HeapSizes};
use crate::runtime::safepoint::Safepoint;
use crate::stats::{CollectionRecord, CollectionSummary};
use crate::util::AtomicUtils;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Heap - one garbage-collected heap
///
/// Created with [`Heap::new`] and shared as `Arc<Heap>`; mutators attach to it
/// with [`Heap::attach_mutator`].
///
/// # Examples
///
/// ```rust
/// use genscav::{GcCause, Heap, HeapConfig, ObjectShape};
///
/// let config = HeapConfig::with_chunk_size(256 * 1024).with_max_heap_size(16 * 1024 * 1024);
/// let heap = Heap::new(config).unwrap();
/// let mutator = heap.attach_mutator();
///
/// let obj = mutator.allocate(&ObjectShape::plain(1, 16)).unwrap();
/// let handle = heap.new_handle(obj);
/// heap.collect(GcCause::Explicit, false);
///
/// // The object survived and may have moved; the handle follows it.
/// let moved = heap.resolve(handle).unwrap();
/// assert_eq!(heap.space_usage().survivor_object_count(), 1);
/// # let _ = moved;
/// ```
pub struct Heap {
    pub(crate) config: HeapConfig,
    pub(crate) layout: ChunkLayout,
    pub(crate) remembered_set: RememberedSet,
    pub(crate) chunks: ChunkAllocator,
    pub(crate) state: Mutex<HeapState>,
    pub(crate) safepoint: Safepoint,
    pub(crate) collector: GarbageCollector,
    pub(crate) handles: Mutex<HandleTable>,
    pub(crate) roots: Mutex<IndexMap<u64, Arc<dyn RootProvider>>>,
    pub(crate) pinned: Mutex<PinnedObjects>,

    mutators: Mutex<Vec<Arc<MutatorState>>>,
    next_mutator_id: AtomicU64,
    next_root_id: AtomicU64,

    /// Sizes as of the last change of the heap state, readable without locks
    eden_bytes: AtomicUsize,
    survivor_bytes: AtomicUsize,
    old_bytes: AtomicUsize,
    /// Chunk bytes owned by mutators and not yet retired into eden
    mutator_chunk_bytes: AtomicUsize,
}

impl Heap {
    /// Create a heap with the default policy for `config`
    pub fn new(config: HeapConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let policy = default_policy(&config)?;
        Self::with_policy(config, policy)
    }

    /// Create a heap collected under `policy`
    pub fn with_policy(config: HeapConfig, policy: Box<dyn CollectionPolicy>) -> Result<Arc<Self>> {
        config.validate()?;
        policy.limits().validate()?;

        let layout = ChunkLayout::new(
            config.aligned_chunk_size,
            config.card_size,
            config.remembered_set,
        );
        let remembered_set = RememberedSet::from_config(config.remembered_set);
        let chunks = ChunkAllocator::new(
            layout,
            remembered_set,
            policy.maximum_heap_size(),
            config.zap_chunks,
        )?;
        let state = HeapState::new(&config);

        log::info!(
            "heap created: {} KiB chunks, {} old generation, policy {}, max {} MiB",
            layout.chunk_size / 1024,
            config.old_generation,
            policy.name(),
            policy.maximum_heap_size() / (1024 * 1024)
        );

        Ok(Arc::new(Self {
            collector: GarbageCollector::new(policy, config.verbose),
            config,
            layout,
            remembered_set,
            chunks,
            state: Mutex::new(state),
            safepoint: Safepoint::new(),
            handles: Mutex::new(HandleTable::new()),
            roots: Mutex::new(IndexMap::new()),
            pinned: Mutex::new(PinnedObjects::new()),
            mutators: Mutex::new(Vec::new()),
            next_mutator_id: AtomicU64::new(1),
            next_root_id: AtomicU64::new(1),
            eden_bytes: AtomicUsize::new(0),
            survivor_bytes: AtomicUsize::new(0),
            old_bytes: AtomicUsize::new(0),
            mutator_chunk_bytes: AtomicUsize::new(0),
        }))
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn remembered_set(&self) -> &RememberedSet {
        &self.remembered_set
    }

    pub fn chunk_allocator(&self) -> &ChunkAllocator {
        &self.chunks
    }

    pub fn policy(&self) -> &dyn CollectionPolicy {
        self.collector.policy()
    }

    pub fn logger(&self) -> &GcLogger {
        self.collector.logger()
    }

    /// Serializable totals over every collection so far
    pub fn collection_stats(&self) -> CollectionSummary {
        self.collector.stats().summary()
    }

    /// Number of finished collections
    pub fn epoch(&self) -> u64 {
        self.collector.epoch()
    }

    pub fn is_collecting(&self) -> bool {
        self.collector.is_collecting()
    }

    pub fn add_watcher(&self, watcher: Arc<dyn CollectionWatcher>) {
        self.collector.add_watcher(watcher);
    }

    /// Policy, collector and size figures as strings, for diagnostics output
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let mut diag = self.collector.diagnostics();
        let sizes = self.heap_sizes();
        diag.insert("eden_bytes".to_string(), sizes.eden_bytes.to_string());
        diag.insert("survivor_bytes".to_string(), sizes.survivor_bytes.to_string());
        diag.insert("old_bytes".to_string(), sizes.old_bytes.to_string());
        diag.insert("committed_bytes".to_string(), sizes.committed_bytes.to_string());
        diag.insert("mutators".to_string(), self.mutator_count().to_string());
        diag
    }

    // === Mutators ===

    /// Register the calling thread (or any owner) as a mutator
    pub fn attach_mutator(self: &Arc<Self>) -> Mutator {
        let id = self.next_mutator_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(MutatorState::new(id));
        self.mutators.lock().push(state.clone());
        log::debug!("mutator {} attached", id);
        Mutator::new(self.clone(), state)
    }

    pub fn mutator_count(&self) -> usize {
        self.mutators.lock().len()
    }

    /// Retire the mutator's chunks into eden and forget it
    pub(crate) fn detach_mutator(&self, mutator: &Arc<MutatorState>) {
        let _world = self.safepoint.enter();
        let mut state = self.state.lock();
        let retired = mutator.retire(&mut state);
        self.forget_mutator_chunks(retired);
        self.mutators.lock().retain(|m| !Arc::ptr_eq(m, mutator));
        self.publish_sizes(&state);
        log::debug!("mutator {} detached, {} bytes retired", mutator.id(), retired);
    }

    pub(crate) fn note_mutator_chunk(&self, bytes: usize) {
        self.mutator_chunk_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Move every mutator-owned chunk into eden; only while the world is stopped
    pub(crate) fn retire_mutators(&self, state: &mut HeapState) {
        for mutator in self.mutators.lock().iter() {
            let retired = mutator.retire(state);
            self.forget_mutator_chunks(retired);
        }
    }

    fn forget_mutator_chunks(&self, bytes: usize) {
        if AtomicUtils::checked_sub(&self.mutator_chunk_bytes, bytes).is_none() {
            crate::fatal!(
                "retired {} mutator chunk bytes, only {} were handed out",
                bytes,
                self.mutator_chunk_bytes.load(Ordering::Acquire)
            );
        }
    }

    // === Collection ===

    /// Collect now; `full` forces a complete collection
    ///
    /// Returns the record of the collection that ran. Calling this from inside a
    /// collection (a watcher, a root provider) is a fatal error.
    pub fn collect(&self, cause: GcCause, full: bool) -> Option<CollectionRecord> {
        self.collector.collect(self, cause, full, None)
    }

    /// Collect unless a collection finished since `epoch` was read
    pub(crate) fn collect_on_allocation(&self, cause: GcCause, epoch: u64, full: bool) {
        self.collector.collect(self, cause, full, Some(epoch));
    }

    // === Sizes ===

    /// Current sizes, without taking any lock
    pub fn heap_sizes(&self) -> HeapSizes {
        HeapSizes {
            eden_bytes: self.eden_bytes.load(Ordering::Acquire)
                + self.mutator_chunk_bytes.load(Ordering::Acquire),
            survivor_bytes: self.survivor_bytes.load(Ordering::Acquire),
            old_bytes: self.old_bytes.load(Ordering::Acquire),
            committed_bytes: self.chunks.committed_bytes(),
            free_list_bytes: self.chunks.free_list_bytes(),
        }
    }

    /// Sizes computed from `state` rather than the published figures
    pub(crate) fn sizes_of(&self, state: &HeapState) -> HeapSizes {
        HeapSizes {
            eden_bytes: state.space(state.young().eden()).accounting().chunk_bytes()
                + self.mutator_chunk_bytes.load(Ordering::Acquire),
            survivor_bytes: state.survivor_chunk_bytes(),
            old_bytes: state.old_chunk_bytes(),
            committed_bytes: self.chunks.committed_bytes(),
            free_list_bytes: self.chunks.free_list_bytes(),
        }
    }

    pub(crate) fn publish_sizes(&self, state: &HeapState) {
        let eden = state.space(state.young().eden()).accounting().chunk_bytes();
        self.eden_bytes.store(eden, Ordering::Release);
        self.survivor_bytes
            .store(state.survivor_chunk_bytes(), Ordering::Release);
        self.old_bytes.store(state.old_chunk_bytes(), Ordering::Release);
    }

    // === Global handles ===

    /// Register `obj` as a root; the handle follows the object when it moves
    pub fn new_handle(&self, obj: usize) -> Handle {
        let _world = self.safepoint.enter();
        self.handles.lock().insert(obj)
    }

    /// Current address of the handle's object
    ///
    /// The address is valid until the next collection.
    pub fn resolve(&self, handle: Handle) -> Result<usize> {
        let _world = self.safepoint.enter();
        self.handles.lock().get(handle)
    }

    pub fn set_handle(&self, handle: Handle, obj: usize) -> Result<()> {
        let _world = self.safepoint.enter();
        self.handles.lock().set(handle, obj)
    }

    pub fn release_handle(&self, handle: Handle) -> Result<()> {
        let _world = self.safepoint.enter();
        self.handles.lock().remove(handle).map(|_| ())
    }

    // === Root providers ===

    /// Register a root provider; returns the id to remove it with
    pub fn add_root_provider(&self, provider: Arc<dyn RootProvider>) -> u64 {
        let id = self.next_root_id.fetch_add(1, Ordering::Relaxed);
        let _world = self.safepoint.enter();
        self.roots.lock().insert(id, provider);
        id
    }

    pub fn remove_root_provider(&self, id: u64) -> bool {
        let _world = self.safepoint.enter();
        self.roots.lock().shift_remove(&id).is_some()
    }

    // === Object access ===

    /// Read reference slot `index` of `holder`
    ///
    /// # Safety
    /// `holder` must be the current address of a live object.
    pub unsafe fn read_reference(&self, holder: usize, index: usize) -> Result<usize> {
        let _world = self.safepoint.enter();
        Self::check_slot(holder, index)?;
        Ok(read_slot(holder, index))
    }

    /// Store `value` into reference slot `index` of `holder`, with the write barrier
    ///
    /// # Safety
    /// `holder` must be the current address of a live object and `value` zero or
    /// the current address of a live object.
    pub unsafe fn write_reference(&self, holder: usize, index: usize, value: usize) -> Result<()> {
        let _world = self.safepoint.enter();
        Self::check_slot(holder, index)?;
        write_slot(holder, index, value);
        post_write_barrier(&self.remembered_set, &self.layout, holder);
        Ok(())
    }

    unsafe fn check_slot(holder: usize, index: usize) -> Result<()> {
        if holder == 0 {
            return Err(GcError::InvalidObject { address: holder });
        }
        let count = object::header(holder).ref_count();
        if index >= count {
            return Err(GcError::InvalidArgument(format!(
                "slot {} of object {:#x} with {} reference slots",
                index, holder, count
            )));
        }
        Ok(())
    }

    /// Stable hash of `obj`, assigned on first request and kept across moves
    ///
    /// # Safety
    /// `obj` must be the current address of a live object.
    pub unsafe fn identity_hash(&self, obj: usize) -> u32 {
        let _world = self.safepoint.enter();
        let h = object::header(obj);
        if let Some(hash) = h.identity_hash() {
            return hash;
        }
        let salt = chunk::chunk_of(obj, &self.layout).identity_hash_salt();
        h.install_identity_hash(mix_hash(obj as u64 ^ salt))
    }

    // === Pinning ===

    /// Keep `obj` in place until the returned guard drops
    ///
    /// # Safety
    /// `obj` must be the current address of a live object.
    pub unsafe fn pin(self: &Arc<Self>, obj: usize) -> PinnedObject {
        let _world = self.safepoint.enter();
        chunk::chunk_of(obj, &self.layout).increment_pinned();
        let id = self.pinned.lock().insert(obj);
        PinnedObject {
            heap: self.clone(),
            obj,
            id,
        }
    }

    // === Inspection ===

    /// Occupancy of every space
    pub fn space_usage(&self) -> SpaceUsage {
        let _world = self.safepoint.enter();
        let state = self.state.lock();
        SpaceUsage {
            mutator_chunk_bytes: self.mutator_chunk_bytes.load(Ordering::Acquire),
            free_list_chunks: self.chunks.free_list_count(),
            free_list_bytes: self.chunks.free_list_bytes(),
            committed_bytes: self.chunks.committed_bytes(),
            ..SpaceUsage::collect(&state)
        }
    }

    /// Visit every object with the world stopped; fillers are skipped
    ///
    /// The visitor runs while the world is stopped and the heap state is
    /// locked. It must not call back into the `Heap`: any such call deadlocks.
    pub fn walk_objects<F>(&self, mut visitor: F)
    where
        F: FnMut(ObjectInfo),
    {
        let _world = self.safepoint.stop_the_world();
        let state = self.state.lock();
        let mut visit = |obj: usize, size: usize, generation: Option<GenerationKind>| {
            // SAFETY: the world is stopped, so every object is initialized.
            let h = unsafe { object::header(obj) };
            if !h.is_filler() {
                visitor(ObjectInfo {
                    address: obj,
                    size,
                    ref_count: h.ref_count(),
                    generation,
                });
            }
        };
        for space in state.spaces() {
            let generation = space.generation();
            space.walk_objects(|obj, size| visit(obj, size, Some(generation)));
        }
        for mutator in self.mutators.lock().iter() {
            for chunk in mutator.chunks() {
                chunk.for_each_object(|obj, size| visit(obj, size, None));
            }
        }
    }

    /// Visit every chunk with the world stopped, mutator-owned chunks included
    ///
    /// As with [`Heap::walk_objects`], the visitor must not call back into the
    /// `Heap`.
    pub fn walk_chunks<F>(&self, mut visitor: F)
    where
        F: FnMut(ChunkInfo),
    {
        let _world = self.safepoint.stop_the_world();
        let state = self.state.lock();
        for space in state.spaces() {
            for chunk in space.chunks() {
                visitor(ChunkInfo::new(chunk, Some(space)));
            }
        }
        for mutator in self.mutators.lock().iter() {
            for chunk in mutator.chunks() {
                visitor(ChunkInfo::new(chunk, None));
            }
        }
    }

    /// Stop the world and check every heap invariant
    ///
    /// Mutator chunks are retired into eden first.
    pub fn verify(&self) -> Result<()> {
        let _world = self.safepoint.stop_the_world();
        let mut state = self.state.lock();
        self.retire_mutators(&mut state);
        self.publish_sizes(&state);
        let failures = verify::verify_heap(self, &state);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GcError::Verification { failures })
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("layout", &self.layout)
            .field("sizes", &self.heap_sizes())
            .field("epoch", &self.epoch())
            .finish()
    }
}

fn mix_hash(value: u64) -> u32 {
    let mut z = value.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    (z ^ (z >> 31)) as u32
}

/// Pin guard returned by [`Heap::pin`]
///
/// While it lives, the object stays at [`PinnedObject::address`]: its chunk is
/// promoted whole instead of being evacuated, and compaction sweeps around it.
pub struct PinnedObject {
    heap: Arc<Heap>,
    obj: usize,
    id: u64,
}

impl PinnedObject {
    pub fn address(&self) -> usize {
        self.obj
    }
}

impl Drop for PinnedObject {
    fn drop(&mut self) {
        let _world = self.heap.safepoint.enter();
        // SAFETY: a pinned object never moves and its chunk stays owned.
        unsafe { chunk::chunk_of(self.obj, &self.heap.layout) }.decrement_pinned();
        self.heap.pinned.lock().remove(self.id);
    }
}

impl std::fmt::Debug for PinnedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PinnedObject({:#x})", self.obj)
    }
}
