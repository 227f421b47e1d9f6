//! Benchmark the polling hot paths: single-handle tests, the detach
//! fast path, progress passes over pending entries, and batch tests.

use std::sync::Arc;

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};

use opdrive::{Completion, DetachEngine, EngineConfig, OpHandle};
use opdrive_local::LocalTransport;

fn record(tag: u32) -> Completion {
    Completion {
        source: 0,
        tag,
        code: 0,
        count: 1,
    }
}

fn bench_handle_test(c: &mut Criterion) {
    let transport = Arc::new(LocalTransport::new());

    c.bench_function("handle_test_pending", |b| {
        let mut handle = OpHandle::managed(transport.submit_manual(record(0)), transport.clone());
        b.iter(|| black_box(handle.test()));
    });

    c.bench_function("handle_test_ready", |b| {
        b.iter_batched(
            || OpHandle::managed(transport.submit_ready(record(0)), transport.clone()),
            |mut handle| black_box(handle.test()),
            BatchSize::SmallInput,
        );
    });
}

fn bench_detach_fast_path(c: &mut Criterion) {
    let transport = Arc::new(LocalTransport::new());
    let engine = DetachEngine::new(EngineConfig::new().background_thread(false));

    c.bench_function("detach_fast_path", |b| {
        b.iter_batched(
            || OpHandle::managed(transport.submit_ready(record(0)), transport.clone()),
            |mut handle| {
                engine.detach(&mut handle, |rec| {
                    black_box(rec);
                })
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_progress_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("progress_pass");
    for entries in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(entries as u64));
        group.bench_function(BenchmarkId::from_parameter(entries), |b| {
            let transport = Arc::new(LocalTransport::new());
            let engine = DetachEngine::new(EngineConfig::new().background_thread(false));
            let mut tokens = Vec::with_capacity(entries);
            for i in 0..entries {
                let mut handle =
                    OpHandle::managed(transport.submit_manual(record(i as u32)), transport.clone());
                tokens.push(handle.token());
                engine.detach(&mut handle, |_| {});
            }
            // First pass absorbs intake; measured passes sweep a
            // steady active list where nothing completes.
            engine.progress();
            b.iter(|| black_box(engine.progress()));

            // Complete everything so the engine can drain on drop.
            for token in tokens {
                transport.fire(token);
            }
            while engine.pending_entries() > 0 {
                engine.progress();
            }
        });
    }
    group.finish();
}

fn bench_batch_test_all(c: &mut Criterion) {
    let transport = Arc::new(LocalTransport::new());

    c.bench_function("test_all_ready_64", |b| {
        b.iter_batched(
            || {
                (0..64u32)
                    .map(|i| OpHandle::managed(transport.submit_ready(record(i)), transport.clone()))
                    .collect::<Vec<_>>()
            },
            |mut handles| black_box(opdrive::test_all(&mut handles)),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_handle_test,
    bench_detach_fast_path,
    bench_progress_pass,
    bench_batch_test_all
);
criterion_main!(benches);
