use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tierline_core::{RelevanceEngine, TieringConfig};

fn bench_relevance_access_and_tick_500_resources(c: &mut Criterion) {
    let engine = RelevanceEngine::new(TieringConfig::default());
    let now = Utc::now();
    for i in 0..500 {
        engine.access(&format!("src/file{}.rs", i), now);
    }

    c.bench_function("relevance_access_tick_500", |b| {
        let mut i = 0usize;
        b.iter(|| {
            engine.access(black_box(&format!("src/file{}.rs", i % 500)), now);
            engine.tick();
            i += 1;
        });
    });

    c.bench_function("relevance_snapshot_500", |b| {
        b.iter(|| black_box(engine.snapshot()));
    });
}

criterion_group!(benches, bench_relevance_access_and_tick_500_resources);
criterion_main!(benches);
