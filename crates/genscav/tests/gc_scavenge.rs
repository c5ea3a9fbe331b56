//! Scavenge Tests - incremental collection of the young generation
//!
//! These tests verify:
//! - survivors are copied out of eden and eden chunks are recycled
//! - references into moved objects are updated everywhere
//! - objects age through the survivor spaces into the old generation
//! - unaligned objects are promoted without being copied
//! - weak referents are cleared or updated

mod common;

use common::{assert_heap_valid, assert_stamped, read_stamp, test_config, HeapFixture, KB, MB};
use genscav::{GenerationKind, ObjectShape};

/// ============================================================================
/// EDEN RECYCLING
/// ============================================================================

/// One chunk of eden, half of it live: the survivors fit in one new chunk and
/// the eden chunk goes back to the free list.
///
/// **Bug this finds:** Eden chunks leaked, dead objects copied, survivors lost
#[test]
fn test_half_live_eden_chunk_is_recycled() {
    let fixture = HeapFixture::incremental(test_config(MB, 64 * MB));
    let shape = ObjectShape::plain(1, 65_000);
    // 64 KiB less one card
    assert_eq!(shape.size(), 65_024);
    assert_eq!(fixture.heap.layout().object_area() / shape.size(), 16);

    let mut handles = Vec::new();
    for i in 0..16u64 {
        let obj = fixture.mutator.allocate(&shape).expect("allocation");
        unsafe { common::write_stamp(obj, i) };
        if i % 2 == 0 {
            handles.push((fixture.root(obj), i));
        }
    }

    let mut chunks = Vec::new();
    fixture.heap.walk_chunks(|info| chunks.push(info));
    assert_eq!(chunks.len(), 1, "sixteen objects fill exactly one chunk");

    let record = fixture.scavenge();
    assert!(!record.complete);
    assert_eq!(record.copied_bytes, 8 * shape.size());
    assert_eq!(record.promoted_bytes, 0);

    let usage = fixture.heap.space_usage();
    assert_eq!(usage.eden.chunk_count, 0);
    assert_eq!(usage.eden.object_count, 0);
    assert_eq!(usage.survivor_object_count(), 8);
    assert_eq!(usage.survivors[0].chunk_count, 1);
    assert_eq!(usage.old.object_count, 0);

    let allocator = fixture.heap.chunk_allocator().stats();
    assert_eq!(allocator.free_list_count, 1);
    assert_eq!(allocator.aligned_freed, 1);
    assert_eq!(allocator.committed_bytes, 2 * MB);

    for (handle, stamp) in handles {
        assert_stamped(fixture.resolve(handle), stamp, "eden survivor");
    }
}

/// **Bug this finds:** Collections that copy garbage
#[test]
fn test_unreachable_objects_are_not_copied() {
    let fixture = HeapFixture::incremental(test_config(128 * KB, 32 * MB));
    for _ in 0..1_000 {
        fixture.alloc(2, 48);
    }
    let record = fixture.scavenge();
    assert_eq!(record.copied_bytes, 0);
    assert_eq!(record.promoted_bytes, 0);

    let usage = fixture.heap.space_usage();
    assert_eq!(usage.eden.object_count, 0);
    assert_eq!(usage.survivor_object_count(), 0);
    assert!(record.collected_bytes > 0);
}

/// ============================================================================
/// REFERENCE UPDATES
/// ============================================================================

/// **Bug this finds:** Slots left pointing at forwarding stubs, cycles copied twice
#[test]
fn test_object_graph_survives_and_is_rewired() {
    let fixture = HeapFixture::incremental(test_config(128 * KB, 32 * MB));

    // A linked list with a back edge from the tail to the head, garbage in between
    let head = fixture.alloc_stamped(2, 0);
    let mut tail = head;
    for i in 1..200u64 {
        fixture.alloc(0, 100);
        let node = fixture.alloc_stamped(2, i);
        fixture.link(tail, 0, node);
        tail = node;
    }
    fixture.link(tail, 1, head);
    let root = fixture.root(head);

    for round in 0..3 {
        fixture.scavenge();

        let head = fixture.resolve(root);
        let mut node = head;
        for i in 0..200u64 {
            assert_stamped(node, i, &format!("list node after round {}", round));
            if i < 199 {
                node = fixture.get(node, 0);
            }
        }
        assert_eq!(fixture.get(node, 0), 0);
        assert_eq!(fixture.get(node, 1), head, "back edge must reach the moved head");
    }

    let mut live = 0;
    fixture.heap.walk_objects(|_| live += 1);
    assert_eq!(live, 200);
}

/// Two slots naming one object must still name one object after the copy.
///
/// **Bug this finds:** Missing forwarding, duplicated survivors
#[test]
fn test_shared_referent_is_copied_once() {
    let fixture = HeapFixture::incremental(test_config(128 * KB, 32 * MB));
    let shared = fixture.alloc_stamped(0, 7);
    let a = fixture.alloc(1, 0);
    let b = fixture.alloc(1, 0);
    fixture.link(a, 0, shared);
    fixture.link(b, 0, shared);
    let ra = fixture.root(a);
    let rb = fixture.root(b);

    fixture.scavenge();

    let via_a = fixture.get(fixture.resolve(ra), 0);
    let via_b = fixture.get(fixture.resolve(rb), 0);
    assert_eq!(via_a, via_b);
    assert_ne!(via_a, shared, "the shared object should have moved");
    assert_stamped(via_a, 7, "shared referent");
    assert_eq!(fixture.heap.space_usage().survivor_object_count(), 3);
}

/// ============================================================================
/// AGING AND TENURING
/// ============================================================================

/// **Bug this finds:** Objects stuck in survivor spaces, ages not advancing
#[test]
fn test_survivors_are_tenured_into_the_old_generation() {
    let fixture = HeapFixture::incremental(test_config(128 * KB, 32 * MB));
    let root = fixture.root(fixture.alloc_stamped(0, 42));
    let tenuring_age = fixture.heap.config().tenuring_age;

    for _ in 0..tenuring_age {
        let record = fixture.scavenge();
        assert_eq!(record.promoted_bytes, 0);
        assert_eq!(fixture.heap.space_usage().survivor_object_count(), 1);
    }

    let record = fixture.scavenge();
    assert!(record.promoted_bytes > 0);
    let usage = fixture.heap.space_usage();
    assert_eq!(usage.survivor_object_count(), 0);
    assert_eq!(usage.old.object_count, 1);

    let obj = fixture.resolve(root);
    assert_stamped(obj, 42, "tenured object");
    let mut generation = None;
    fixture.heap.walk_objects(|info| {
        if info.address == obj {
            generation = info.generation;
        }
    });
    assert_eq!(generation, Some(GenerationKind::Old));

    // Old objects stay put during later scavenges
    fixture.scavenge();
    assert_eq!(fixture.resolve(root), obj);
}

/// **Bug this finds:** Survivor spaces not swapped, aging reset each cycle
#[test]
fn test_deeper_survivor_spaces_age_objects_one_step_per_collection() {
    let config = genscav::HeapConfig {
        max_survivor_spaces: 3,
        tenuring_age: 3,
        ..test_config(128 * KB, 32 * MB)
    };
    let fixture = HeapFixture::incremental(config);
    let root = fixture.root(fixture.alloc_stamped(0, 1));

    for age in 0..3 {
        fixture.scavenge();
        let usage = fixture.heap.space_usage();
        assert_eq!(usage.survivors[age].object_count, 1, "object should be in survivor space {}", age);
        assert_eq!(usage.old.object_count, 0);
    }
    fixture.scavenge();
    assert_eq!(fixture.heap.space_usage().old.object_count, 1);
    assert_stamped(fixture.resolve(root), 1, "aged object");
}

/// ============================================================================
/// UNALIGNED CHUNKS
/// ============================================================================

/// **Bug this finds:** Large objects copied, unaligned chunks freed while live
#[test]
fn test_large_objects_are_promoted_in_place() {
    let fixture = HeapFixture::incremental(test_config(128 * KB, 32 * MB));
    let threshold = fixture.heap.config().large_object_threshold;
    let large = fixture.alloc(1, threshold);
    let small = fixture.alloc_stamped(0, 9);
    fixture.link(large, 0, small);
    let root = fixture.root(large);
    // An unreachable large object is released, not promoted
    fixture.alloc(0, threshold);

    fixture.scavenge();
    fixture.scavenge();

    assert_eq!(fixture.resolve(root), large, "large objects never move");
    assert_stamped(fixture.get(large, 0), 9, "referent of a large object");
    let usage = fixture.heap.space_usage();
    assert_eq!(usage.old.object_count, 2);
    let stats = fixture.heap.chunk_allocator().stats();
    assert_eq!(stats.unaligned_produced, 2);
    assert_eq!(stats.unaligned_released, 1);
    assert_heap_valid(&fixture.heap, "after promoting a large object");
}

/// ============================================================================
/// WEAK REFERENCES
/// ============================================================================

/// **Bug this finds:** Weak referents kept alive, dangling weak slots
#[test]
fn test_weak_referents_are_cleared_or_updated() {
    let fixture = HeapFixture::incremental(test_config(128 * KB, 32 * MB));
    let shape = ObjectShape::reference(0, 8);

    let dying = fixture.mutator.allocate(&shape).expect("allocation");
    let target = fixture.alloc_stamped(0, 5);
    fixture.link(dying, 0, target);

    let keeping = fixture.mutator.allocate(&shape).expect("allocation");
    let kept = fixture.alloc_stamped(0, 6);
    fixture.link(keeping, 0, kept);

    let dying_root = fixture.root(dying);
    let keeping_root = fixture.root(keeping);
    let kept_root = fixture.root(kept);

    fixture.scavenge();

    assert_eq!(fixture.get(fixture.resolve(dying_root), 0), 0, "unreachable referent must be cleared");
    let referent = fixture.get(fixture.resolve(keeping_root), 0);
    assert_eq!(referent, fixture.resolve(kept_root));
    assert_stamped(referent, 6, "weakly and strongly reachable referent");
    assert_eq!(unsafe { read_stamp(referent) }, 6);
}
