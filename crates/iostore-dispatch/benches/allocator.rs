use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use iostore_dispatch::{BlockAllocator, Request};
use iostore_types::{ChunkId, ReadOptions};

const BATCH_SIZES: &[usize] = &[1, 16, 256];

fn request(i: usize) -> Request {
    Request::new(ChunkId::from_raw([i as u8; 32]), ReadOptions::whole(), i as u64)
}

fn alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_cycle");
    for &n in BATCH_SIZES {
        let slab = BlockAllocator::new(256);
        group.bench_with_input(BenchmarkId::new("block_allocator", n), &n, |b, &n| {
            let mut handles = Vec::with_capacity(n);
            b.iter(|| {
                handles.extend((0..n).map(|i| slab.alloc(request(i))));
                for h in handles.drain(..) {
                    black_box(slab.free(h));
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("box", n), &n, |b, &n| {
            let mut boxes = Vec::with_capacity(n);
            b.iter(|| {
                boxes.extend((0..n).map(|i| Box::new(request(i))));
                for r in boxes.drain(..) {
                    black_box(r);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, alloc_free_cycle);
criterion_main!(benches);
