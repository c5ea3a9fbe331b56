//! genscav Benchmarks
//!
//! Allocation throughput, scavenge and complete collection pauses, and the
//! write barrier.
//! Run with: `cargo bench --package genscav`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use genscav::{GcCause, Handle, Heap, HeapConfig, ObjectShape, OldGenerationKind};
use std::sync::Arc;
use std::thread;

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

fn create_heap() -> Arc<Heap> {
    Heap::new(HeapConfig::with_chunk_size(MB).with_max_heap_size(256 * MB)).unwrap()
}

fn create_heap_with(kind: OldGenerationKind) -> Arc<Heap> {
    let config = HeapConfig {
        old_generation: kind,
        ..HeapConfig::with_chunk_size(MB).with_max_heap_size(256 * MB)
    };
    Heap::new(config).unwrap()
}

/// A rooted linked list of `len` nodes, each with `payload` bytes
fn build_list(heap: &Arc<Heap>, len: usize, payload: usize) -> Handle {
    let mutator = heap.attach_mutator();
    let shape = ObjectShape::plain(1, payload);
    let head = mutator.allocate(&shape).unwrap();
    let root = heap.new_handle(head);
    let mut tail = head;
    let mut epoch = heap.epoch();
    for _ in 1..len {
        let node = mutator.allocate(&shape).unwrap();
        // A collection may have moved the tail
        if heap.epoch() != epoch {
            epoch = heap.epoch();
            tail = last_node(heap, root);
        }
        unsafe { heap.write_reference(tail, 0, node).unwrap() };
        tail = node;
    }
    root
}

fn last_node(heap: &Heap, root: Handle) -> usize {
    let mut node = heap.resolve(root).unwrap();
    loop {
        let next = unsafe { heap.read_reference(node, 0).unwrap() };
        if next == 0 {
            return node;
        }
        node = next;
    }
}

fn bench_heap_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_creation");

    group.bench_function("default_config", |b| {
        b.iter(|| black_box(create_heap()))
    });

    group.bench_function("compacting", |b| {
        b.iter(|| black_box(create_heap_with(OldGenerationKind::Compacting)))
    });

    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");

    let heap = create_heap();
    let mutator = heap.attach_mutator();

    for &payload in &[8usize, 64, 256, 1024, 4096] {
        let shape = ObjectShape::plain(2, payload);
        group.throughput(Throughput::Bytes(shape.size() as u64));
        group.bench_with_input(BenchmarkId::new("small", payload), &shape, |b, shape| {
            b.iter(|| black_box(mutator.allocate(shape)))
        });
    }

    let large = ObjectShape::plain(0, heap.config().large_object_threshold);
    group.throughput(Throughput::Bytes(large.size() as u64));
    group.bench_function("unaligned_chunk", |b| {
        b.iter(|| black_box(mutator.allocate(&large)))
    });

    group.finish();
}

fn bench_concurrent_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_allocation");

    for &threads in &[2usize, 4] {
        group.throughput(Throughput::Elements((threads * 10_000) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let heap = create_heap();
            b.iter(|| {
                let workers: Vec<_> = (0..threads)
                    .map(|_| {
                        let heap = heap.clone();
                        thread::spawn(move || {
                            let mutator = heap.attach_mutator();
                            let shape = ObjectShape::plain(1, 48);
                            for _ in 0..10_000 {
                                black_box(mutator.allocate(&shape).unwrap());
                            }
                        })
                    })
                    .collect();
                for worker in workers {
                    worker.join().unwrap();
                }
            })
        });
    }

    group.finish();
}

fn bench_scavenge(c: &mut Criterion) {
    let mut group = c.benchmark_group("scavenge");

    group.bench_function("empty_young", |b| {
        let heap = create_heap();
        b.iter(|| heap.collect(GcCause::Explicit, false))
    });

    for &live in &[1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("garbage_plus_live", live), &live, |b, &live| {
            let heap = create_heap();
            let mutator = heap.attach_mutator();
            let _root = build_list(&heap, live, 32);
            let shape = ObjectShape::plain(0, 64);
            b.iter(|| {
                for _ in 0..10_000 {
                    black_box(mutator.allocate(&shape).unwrap());
                }
                heap.collect(GcCause::Explicit, false)
            })
        });
    }

    group.finish();
}

fn bench_complete_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("complete_collection");

    for kind in [OldGenerationKind::Copying, OldGenerationKind::Compacting] {
        group.bench_function(kind.to_string(), |b| {
            let heap = create_heap_with(kind);
            let _root = build_list(&heap, 20_000, 64);
            heap.collect(GcCause::Explicit, true);
            b.iter(|| heap.collect(GcCause::Explicit, true))
        });
    }

    group.finish();
}

fn bench_write_barrier(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_barrier");

    let heap = create_heap();
    let mutator = heap.attach_mutator();
    let holder = heap.new_handle(mutator.allocate(&ObjectShape::plain(4, 0)).unwrap());

    group.bench_function("young_holder", |b| {
        let obj = heap.resolve(holder).unwrap();
        b.iter(|| unsafe { heap.write_reference(obj, 1, black_box(0)) })
    });

    // Two collections move the holder into the old generation
    heap.collect(GcCause::Explicit, false);
    heap.collect(GcCause::Explicit, false);
    group.bench_function("old_holder", |b| {
        let obj = heap.resolve(holder).unwrap();
        b.iter(|| unsafe { heap.write_reference(obj, 1, black_box(0)) })
    });

    group.finish();
}

fn bench_pinning(c: &mut Criterion) {
    let mut group = c.benchmark_group("pinning");

    let heap = create_heap();
    let mutator = heap.attach_mutator();
    let obj = mutator.allocate(&ObjectShape::plain(0, 4 * KB)).unwrap();

    group.bench_function("pin_unpin", |b| {
        b.iter(|| {
            let pin = unsafe { heap.pin(obj) };
            black_box(pin.address());
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_heap_creation,
    bench_allocation,
    bench_concurrent_allocation,
    bench_scavenge,
    bench_complete_collection,
    bench_write_barrier,
    bench_pinning
);
criterion_main!(benches);
