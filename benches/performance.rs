use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use tessera_core::{DispatchKey, DispatchKeySet};
use tessera_mem::{default_cpu_allocator, Allocator, Storage};

fn make_key_set() -> DispatchKeySet {
    [
        DispatchKey::CPU,
        DispatchKey::Autograd,
        DispatchKey::Tracer,
        DispatchKey::Batched,
    ]
    .into_iter()
    .collect()
}

fn bench_key_set(c: &mut Criterion) {
    let set = make_key_set();
    c.bench_function("key_set_highest_priority", |b| {
        b.iter(|| black_box(set).highest_priority_key())
    });
    c.bench_function("key_set_redispatch_walk", |b| {
        b.iter(|| {
            let mut remaining = black_box(set);
            let mut hops = 0;
            while !remaining.is_empty() {
                let key = remaining.highest_priority_key();
                remaining = remaining & DispatchKeySet::full_after(key);
                hops += 1;
            }
            hops
        })
    });
}

fn bench_cpu_allocator(c: &mut Criterion) {
    let alloc = default_cpu_allocator();
    c.bench_function("cpu_allocate_free_4k", |b| {
        b.iter(|| {
            let dp = alloc.allocate(black_box(4096)).unwrap();
            black_box(dp.get());
        })
    });
}

fn bench_storage(c: &mut Criterion) {
    let storage = Storage::new(1024, default_cpu_allocator(), true).unwrap();
    c.bench_function("storage_clone_drop", |b| {
        b.iter(|| black_box(storage.clone()).nbytes())
    });
    c.bench_function("storage_resize_grow", |b| {
        b.iter(|| {
            let s = Storage::new(256, default_cpu_allocator(), true).unwrap();
            s.resize(black_box(4096)).unwrap();
            s
        })
    });
}

criterion_group!(storage, bench_key_set, bench_cpu_allocator, bench_storage);
criterion_main!(storage);
