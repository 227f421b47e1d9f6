//! Benchmark suite for opdrive
//!
//! Measures completion-path costs against the in-process transport.

use opdrive::{Completion, DetachEngine, EngineConfig, OpFuture, OpHandle};
use opdrive_local::LocalTransport;
use std::sync::Arc;
use std::time::Instant;

fn main() {
    println!("=== opdrive Benchmarks ===\n");

    let transport = Arc::new(LocalTransport::new());

    bench_submit_consume(&transport);
    bench_test_miss(&transport);
    bench_detach_fast(&transport);
    bench_progress(&transport);
    bench_future_chain(&transport);

    println!("\n=== Benchmarks Complete ===");
}

fn record(tag: u32) -> Completion {
    Completion {
        source: 0,
        tag,
        code: 0,
        count: 1,
    }
}

fn bench_submit_consume(transport: &Arc<LocalTransport>) {
    println!("Benchmark: Submit + Consume");
    println!("{}", "─".repeat(40));

    let iterations = 100_000u32;

    let start = Instant::now();
    for i in 0..iterations {
        let mut op = OpHandle::managed(transport.submit_ready(record(i)), transport.clone());
        let _ = op.test();
    }
    let elapsed = start.elapsed();

    let per_op = elapsed.as_nanos() as f64 / iterations as f64;
    println!("  Iterations:  {}", iterations);
    println!("  Total time:  {:?}", elapsed);
    println!("  Per op:      {:.1} ns", per_op);
    println!("  Rate:        {:.0}/sec\n", iterations as f64 / elapsed.as_secs_f64());
}

fn bench_test_miss(transport: &Arc<LocalTransport>) {
    println!("Benchmark: Test (pending)");
    println!("{}", "─".repeat(40));

    let mut op = OpHandle::managed(transport.submit_manual(record(0)), transport.clone());
    let iterations = 1_000_000u32;

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = op.test();
    }
    let elapsed = start.elapsed();

    transport.fire(op.token());
    let _ = op.test();

    let per_test = elapsed.as_nanos() as f64 / iterations as f64;
    println!("  Iterations:  {}", iterations);
    println!("  Total time:  {:?}", elapsed);
    println!("  Per test:    {:.1} ns", per_test);
    println!("  Rate:        {:.0}/sec\n", iterations as f64 / elapsed.as_secs_f64());
}

fn bench_detach_fast(transport: &Arc<LocalTransport>) {
    println!("Benchmark: Detach (fast path)");
    println!("{}", "─".repeat(40));

    let engine = DetachEngine::new(EngineConfig::new().background_thread(false));
    let iterations = 100_000u32;

    let start = Instant::now();
    for i in 0..iterations {
        let mut op = OpHandle::managed(transport.submit_ready(record(i)), transport.clone());
        engine.detach(&mut op, |_| {});
    }
    let elapsed = start.elapsed();

    let per_detach = elapsed.as_nanos() as f64 / iterations as f64;
    println!("  Iterations:  {}", iterations);
    println!("  Total time:  {:?}", elapsed);
    println!("  Per detach:  {:.1} ns", per_detach);
    println!("  Rate:        {:.0}/sec\n", iterations as f64 / elapsed.as_secs_f64());
}

fn bench_progress(transport: &Arc<LocalTransport>) {
    println!("Benchmark: Progress pass (1024 pending)");
    println!("{}", "─".repeat(40));

    let engine = DetachEngine::new(EngineConfig::new().background_thread(false));
    let entries = 1024u32;
    let mut tokens = Vec::with_capacity(entries as usize);
    for i in 0..entries {
        let mut op = OpHandle::managed(transport.submit_manual(record(i)), transport.clone());
        tokens.push(op.token());
        engine.detach(&mut op, |_| {});
    }
    // First pass absorbs intake; measured passes sweep the active list.
    engine.progress();

    let iterations = 1_000u32;
    let start = Instant::now();
    for _ in 0..iterations {
        engine.progress();
    }
    let elapsed = start.elapsed();

    let per_pass = elapsed.as_nanos() as f64 / iterations as f64;
    println!("  Entries:     {}", entries);
    println!("  Passes:      {}", iterations);
    println!("  Total time:  {:?}", elapsed);
    println!("  Per pass:    {:.1} ns", per_pass);
    println!("  Per entry:   {:.2} ns\n", per_pass / entries as f64);

    for token in tokens {
        transport.fire(token);
    }
    while engine.pending_entries() > 0 {
        engine.progress();
    }
}

fn bench_future_chain(transport: &Arc<LocalTransport>) {
    println!("Benchmark: Future chain (ready links)");
    println!("{}", "─".repeat(40));

    let iterations = 10_000u32;
    let links = 8u32;

    let start = Instant::now();
    for _ in 0..iterations {
        let mut chain = OpFuture::new(OpHandle::managed(
            transport.submit_ready(record(0)),
            transport.clone(),
        ));
        for _ in 0..links {
            let transport = Arc::clone(transport);
            chain = chain.then(move |mut prev| {
                let _ = prev.get();
                OpFuture::new(OpHandle::managed(
                    transport.submit_ready(record(0)),
                    transport.clone(),
                ))
            });
        }
        let _ = chain.get();
    }
    let elapsed = start.elapsed();

    let per_link = elapsed.as_nanos() as f64 / (iterations * links) as f64;
    println!("  Chains:      {} x {} links", iterations, links);
    println!("  Total time:  {:?}", elapsed);
    println!("  Per link:    {:.1} ns", per_link);
    println!(
        "  Rate:        {:.0} links/sec\n",
        (iterations * links) as f64 / elapsed.as_secs_f64()
    );
}
