use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use memcore::{Allocator, Arena, GeneralAllocator};

fn bench_general(c: &mut Criterion) {
    let allocator = GeneralAllocator::new();
    let mut group = c.benchmark_group("general");

    for &align in &[8usize, 64] {
        group.bench_with_input(BenchmarkId::new("alloc_free_64", align), &align, |b, &align| {
            b.iter(|| {
                let ptr = allocator.allocate(black_box(64), align).unwrap();
                unsafe { allocator.free(ptr.as_ptr(), 64) };
            });
        });
    }

    group.bench_function("realloc_grow", |b| {
        b.iter(|| unsafe {
            let ptr = allocator.allocate(16, 8).unwrap();
            let grown = allocator.reallocate(ptr.as_ptr(), 16, black_box(1024), 8).unwrap();
            allocator.free(grown.as_ptr(), 1024);
        });
    });

    group.finish();
}

fn bench_arena(c: &mut Criterion) {
    let arena = Arena::new(1 << 20).unwrap();

    c.bench_function("arena_bump_1000x32", |b| {
        b.iter(|| {
            let scope = arena.scope();
            for _ in 0..1000 {
                black_box(scope.allocate(32, 8).unwrap());
            }
        });
    });

    c.bench_function("scoped_alloc_with_drop_100", |b| {
        b.iter(|| {
            let scope = arena.scope();
            for i in 0..100 {
                black_box(scope.alloc(vec![i as u8; 8]).unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_general, bench_arena);
criterion_main!(benches);
