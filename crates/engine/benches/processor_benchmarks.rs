use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use bulkdml_core::{OperationDescriptor, SObject};
use bulkdml_engine::{
    ChunkQuota, HookManager, InMemoryRecordStore, Processor, ProcessorConfig, RetryPolicy, split,
    split_by_quota,
};
use std::sync::Arc;

fn batch(n: usize) -> Vec<SObject> {
    (0..n)
        .map(|i| {
            SObject::new("Account")
                .with_field("Name", format!("Account {i}"))
                .with_field("Seq", i as i64)
        })
        .collect()
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");

    for size in [1_000usize, 10_000, 50_000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("by_count", size), &size, |b, &size| {
            b.iter_batched(
                || batch(size),
                |records| split(black_box(records), 200).unwrap(),
                criterion::BatchSize::LargeInput,
            );
        });

        // Byte-aware splitting serializes every record once.
        group.bench_with_input(BenchmarkId::new("by_quota", size), &size, |b, &size| {
            let quota = ChunkQuota::new(200, 64 * 1024).unwrap();
            b.iter_batched(
                || batch(size),
                |records| split_by_quota(black_box(records), quota).unwrap(),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("process");
    group.sample_size(20);

    for failure_every in [0usize, 10] {
        let label = if failure_every == 0 {
            "all_success".to_string()
        } else {
            format!("one_in_{failure_every}_fails")
        };

        group.throughput(Throughput::Elements(10_000));
        group.bench_function(label, |b| {
            let store = Arc::new(InMemoryRecordStore::<SObject>::new());
            if failure_every > 0 {
                store.set_rejector(move |r: &SObject, _| {
                    let seq = r.field("Seq").and_then(|v| v.as_i64()).unwrap_or_default();
                    (seq as usize % failure_every == 0).then(|| "ROW_LOCK".to_string())
                });
            }
            let processor = Processor::new(
                store,
                Arc::new(HookManager::new()),
                ProcessorConfig::default(),
            );
            let descriptor = OperationDescriptor::insert("Account").unwrap();

            b.iter_batched(
                || batch(10_000),
                |records| {
                    processor
                        .process(black_box(records), &descriptor, &RetryPolicy::disabled())
                        .unwrap()
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_split, bench_process);
criterion_main!(benches);
