use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use bulkdml_core::{OperationDescriptor, SObject};
use bulkdml_infra::jobs::{
    InMemoryRetryJobStore, JobFinish, JsonRecordCodec, RetryJob, RetryJobStore,
};

fn batch(n: usize) -> Vec<SObject> {
    (0..n)
        .map(|i| {
            SObject::new("Account")
                .with_field("Name", format!("Account {i}"))
                .with_field("Seq", i as i64)
        })
        .collect()
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for size in [100usize, 1_000, 10_000] {
        let records = batch(size);
        let payload = JsonRecordCodec::encode(&records).unwrap();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &records, |b, records| {
            b.iter(|| JsonRecordCodec::encode(black_box(records)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("decode", size), &payload, |b, payload| {
            b.iter(|| {
                let decoded: Vec<SObject> =
                    JsonRecordCodec::decode(black_box(payload), "Account").unwrap();
                decoded
            });
        });
    }

    group.finish();
}

/// Insert, claim and finish one job: the store traffic of a single rerun.
fn bench_job_lifecycle(c: &mut Criterion) {
    let store = InMemoryRetryJobStore::new();
    let descriptor = OperationDescriptor::insert("Account").unwrap();
    let payload = JsonRecordCodec::encode(&batch(10)).unwrap();

    c.bench_function("job_lifecycle", |b| {
        b.iter(|| {
            let job = RetryJob::new(descriptor.clone(), payload.clone(), 10).with_budget(2, 1);
            let id = store.insert(job).unwrap();
            store.try_claim(id).unwrap();
            store.finish(black_box(id), JobFinish::Completed).unwrap();
        });
    });
}

criterion_group!(benches, bench_codec, bench_job_lifecycle);
criterion_main!(benches);
