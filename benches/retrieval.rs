use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hybridqa::rag::retrieval::{CorpusIndex, Retriever};
use std::time::Duration;

const PARAGRAPH: &str = "Northwind ships Beverages, Condiments and Seafood to customers across Europe. \
Unopened beverages may be returned within 14 days. The Summer Beverages 1997 campaign ran through June. \
Average Order Value is revenue divided by the number of distinct orders. Gross margin subtracts cost of goods. ";

fn corpus(docs: usize) -> Vec<(String, String)> {
    (0..docs)
        .map(|i| (format!("doc_{:03}", i), format!("{} section {}", PARAGRAPH.repeat(6), i)))
        .collect()
}

/// Benchmark index construction over growing corpora
fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("retrieval_index_build");
    group.measurement_time(Duration::from_secs(10));

    for docs in [10usize, 100, 500] {
        let documents = corpus(docs);
        group.bench_with_input(BenchmarkId::from_parameter(docs), &documents, |b, documents| {
            b.iter(|| {
                let index = CorpusIndex::from_documents(documents.clone(), 400).unwrap();
                black_box(index.len());
            });
        });
    }

    group.finish();
}

/// Benchmark top-k queries against a prebuilt index
fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("retrieval_query");
    let index = CorpusIndex::from_documents(corpus(500), 400).unwrap();

    for top_k in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(top_k), &top_k, |b, &top_k| {
            b.iter(|| black_box(index.retrieve("return window for unopened beverages", top_k)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_index_build, bench_query);
criterion_main!(benches);
