//! Mnemo search benchmarks.
//!
//! Run with: cargo bench -p mnemo-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mnemo_core::embeddings::{cosine_similarity, matryoshka_truncate};
use mnemo_core::search::reciprocal_rank_fusion;

fn bench_rrf_fusion(c: &mut Criterion) {
    let keyword_results: Vec<(String, f32)> =
        (0..50).map(|i| (format!("doc-{i}"), 1.0 - i as f32 / 50.0)).collect();
    let semantic_results: Vec<(String, f32)> =
        (0..50).map(|i| (format!("doc-{}", 25 + i), 1.0 - i as f32 / 50.0)).collect();

    c.bench_function("rrf_50x50", |b| {
        b.iter(|| black_box(reciprocal_rank_fusion(&keyword_results, &semantic_results, 60.0)));
    });
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let a: Vec<f32> = (0..256).map(|i| (i as f32).sin()).collect();
    let b: Vec<f32> = (0..256).map(|i| (i as f32).cos()).collect();

    c.bench_function("cosine_similarity_256d", |bench| {
        bench.iter(|| black_box(cosine_similarity(&a, &b)));
    });
}

fn bench_matryoshka_truncate(c: &mut Criterion) {
    let v: Vec<f32> = (0..768).map(|i| (i as f32).sin()).collect();

    c.bench_function("matryoshka_truncate_768_to_256", |b| {
        b.iter(|| black_box(matryoshka_truncate(v.clone(), 256)));
    });
}

criterion_group!(
    benches,
    bench_rrf_fusion,
    bench_cosine_similarity,
    bench_matryoshka_truncate,
);
criterion_main!(benches);
