use criterion::{black_box, criterion_group, criterion_main, Criterion};

use scout_search::{CannedSearch, QueryEngine};

fn bench_compute(c: &mut Criterion) {
    let engine = CannedSearch::new();
    let long_query = "what happened in the markets today ".repeat(50);

    c.bench_function("canned_search_short_query", |b| {
        b.iter(|| engine.compute(black_box("hello")))
    });

    c.bench_function("canned_search_long_query", |b| {
        b.iter(|| engine.compute(black_box(&long_query)))
    });
}

criterion_group!(benches, bench_compute);
criterion_main!(benches);
