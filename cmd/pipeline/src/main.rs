//! Operation pipeline example
//!
//! Submits delayed operations on an in-process transport and drives
//! them through every completion surface: direct handle waits, a
//! synchronous future chain, when_all fan-in, and detached callbacks.
//!
//! # Environment Variables
//!
//! Configuration:
//! - `PIPE_STAGES=<n>` - Stages in the future chain (default: 3)
//! - `PIPE_FANOUT=<n>` - Parallel operations for fan-in/detach (default: 4)
//! - `PIPE_DELAY_MS=<n>` - Simulated per-operation latency (default: 5)
//!
//! Engine (read by the global detach engine on first use):
//! - `OPDRIVE_BACKGROUND_THREAD=0|1` - Background progress thread (default: 1)
//! - `OPDRIVE_POLL_INTERVAL_US=<n>` - Park bound between passes (default: 2000)

use opdrive::{detach, shutdown_global, when_all, Completion, OpFuture, OpHandle};
use opdrive_local::LocalTransport;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn env_get<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn record(tag: u32, count: usize) -> Completion {
    Completion {
        source: 0,
        tag,
        code: 0,
        count,
    }
}

fn main() {
    println!("=== opdrive Pipeline Example ===\n");

    let stages: u32 = env_get("PIPE_STAGES", 3);
    let fanout: usize = env_get("PIPE_FANOUT", 4);
    let delay = Duration::from_millis(env_get("PIPE_DELAY_MS", 5u64));

    println!("Configuration:");
    println!("  Chain stages: {}", stages);
    println!("  Fan-out width: {}", fanout);
    println!("  Simulated latency: {:?}", delay);
    println!();

    let transport = Arc::new(LocalTransport::new());

    single_wait(&transport, delay);
    future_chain(&transport, stages, delay);
    fan_in(&transport, fanout, delay);
    detached(&transport, fanout, delay);

    shutdown_global();
    println!("\n=== Pipeline Complete ===");
}

fn single_wait(transport: &Arc<LocalTransport>, delay: Duration) {
    println!("--- Stage 1: test then wait ---");
    let mut op = OpHandle::managed(transport.submit_after(record(1, 64), delay), transport.clone());

    match op.test() {
        Some(rec) => println!("  completed immediately: count={}", rec.count),
        None => {
            println!("  still in flight, blocking...");
            let start = Instant::now();
            let rec = op.wait();
            println!(
                "  completed after {:?}: tag={} count={}",
                start.elapsed(),
                rec.tag,
                rec.count
            );
        }
    }
}

fn future_chain(transport: &Arc<LocalTransport>, stages: u32, delay: Duration) {
    println!("\n--- Stage 2: future chain ({} stages) ---", stages);
    let start = Instant::now();

    // Each continuation runs on this thread as soon as its
    // predecessor resolves, and submits the next stage.
    let mut chain = OpFuture::new(OpHandle::managed(
        transport.submit_after(record(1, 1), delay),
        transport.clone(),
    ));
    for stage in 2..=stages {
        let transport = Arc::clone(transport);
        chain = chain.then(move |mut done| {
            println!("  stage {} finished (tag={})", stage - 1, done.get().tag);
            OpFuture::new(OpHandle::managed(
                transport.submit_after(record(stage, 1), delay),
                transport.clone(),
            ))
        });
    }
    let last = chain.get();
    println!("  stage {} finished (tag={})", stages, last.tag);
    println!(
        "  chain of {} took {:?} (at least {:?} expected)",
        stages,
        start.elapsed(),
        delay * stages
    );
}

fn fan_in(transport: &Arc<LocalTransport>, fanout: usize, delay: Duration) {
    println!("\n--- Stage 3: when_all fan-in ({} ops) ---", fanout);
    let mut futures: Vec<OpFuture> = (0..fanout)
        .map(|i| {
            OpFuture::new(OpHandle::managed(
                transport.submit_after(record(i as u32, i + 1), delay),
                transport.clone(),
            ))
        })
        .collect();

    let start = Instant::now();
    let mut all = when_all(&mut futures);
    all.wait();
    println!("  all {} completed in {:?}", fanout, start.elapsed());

    let total: usize = futures.iter_mut().map(|f| f.get().count).sum();
    println!("  total transferred count: {}", total);
}

fn detached(transport: &Arc<LocalTransport>, fanout: usize, delay: Duration) {
    println!("\n--- Stage 4: detached callbacks ---");
    let fired = Arc::new(AtomicUsize::new(0));

    for i in 0..fanout {
        let mut op = OpHandle::managed(
            transport.submit_after(record(i as u32, 1), delay),
            transport.clone(),
        );
        let fired = Arc::clone(&fired);
        detach(&mut op, move |rec| {
            println!("  callback: op tag={} landed", rec.tag);
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    println!("  {} operations detached, main thread is free", fanout);
    let deadline = Instant::now() + Duration::from_secs(5);
    while fired.load(Ordering::SeqCst) < fanout && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    println!("  {}/{} callbacks fired", fired.load(Ordering::SeqCst), fanout);
}
