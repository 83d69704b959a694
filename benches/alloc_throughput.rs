use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segalloc::Segalloc;

const OPS: u64 = 100_000;

/// segalloc alloc/free throughput.
fn segalloc_alloc_free(allocator: &mut Segalloc, size: usize) {
    for _ in 0..OPS {
        let ptr = allocator.allocate(size).unwrap();
        black_box(ptr);
        unsafe { allocator.deallocate(ptr) };
    }
}

/// libc alloc/free throughput, as a baseline.
fn libc_malloc_free(size: usize) {
    for _ in 0..OPS {
        unsafe {
            let ptr = libc::malloc(size);
            black_box(ptr);
            libc::free(ptr);
        }
    }
}

fn benchmark_alloc_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_throughput");

    for size in [16, 64, 256, 1024, 4096] {
        group.throughput(Throughput::Elements(OPS));

        group.bench_with_input(BenchmarkId::new("segalloc", size), &size, |b, &size| {
            let mut allocator = Segalloc::new().unwrap();
            b.iter(|| segalloc_alloc_free(&mut allocator, size))
        });

        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
            b.iter(|| libc_malloc_free(size))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_alloc_throughput);
criterion_main!(benches);
