//! opdrive End-to-End Smoke Test
//!
//! Exercises the full completion stack against the in-process
//! transport:
//!   Part A — Handles: test/wait/cancel, consumption, persistent ops
//!   Part B — Batches: all-or-nothing test_all, test_any/some, waits
//!   Part C — Futures: lifecycle flags, synchronous chains, combinators
//!   Part D — Detach engine: fast path, progress passes, drop drain
//!
//! Run: ./target/release/detach-smoke

use opdrive::{
    shutdown_global, test_all, test_any, test_some, wait_all, wait_any, when_all, when_any,
    Completion, DetachEngine, EngineConfig, OpFuture, OpHandle, Transport,
};
use opdrive_local::{LocalTransport, CANCELLED_CODE};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn record(tag: u32) -> Completion {
    Completion { source: 0, tag, code: 0, count: 1 }
}

fn submit_manual_set(transport: &Arc<LocalTransport>, n: u32) -> Vec<OpHandle> {
    (0..n)
        .map(|i| OpHandle::managed(transport.submit_manual(record(i)), transport.clone()))
        .collect()
}

// ════════════════════════════════════════════════════════════
// Part A: Operation Handles
// ════════════════════════════════════════════════════════════

fn test_handles(t: &mut TestRunner, transport: &Arc<LocalTransport>) {
    t.section("Part A: Operation Handles");

    // A1-A4: polling lifecycle
    let mut op = OpHandle::managed(transport.submit_manual(record(1)), transport.clone());
    t.check("test() on pending op returns None", op.test().is_none(), "completed early");
    t.check("fire() claims the armed op", transport.fire(op.token()), "claim failed");
    let rec = op.test();
    t.check(
        "test() after fire returns the record",
        rec.map(|r| r.tag) == Some(1),
        &format!("{:?}", rec),
    );
    t.check("consumption nulls the handle", op.is_null(), "still live");
    t.check(
        "consumed handle is trivially complete",
        op.test() == Some(Completion::empty()),
        "not trivial",
    );

    // A5: blocking wait on a deadline op
    let mut op = OpHandle::managed(
        transport.submit_after(record(2), Duration::from_millis(10)),
        transport.clone(),
    );
    let start = Instant::now();
    let rec = op.wait();
    t.check(
        &format!("wait() returned after {:?}", start.elapsed()),
        rec.tag == 2 && start.elapsed() >= Duration::from_millis(10),
        "early or wrong tag",
    );

    // A6: cancellation
    let mut op = OpHandle::managed(transport.submit_manual(record(3)), transport.clone());
    t.check("cancel() claims an armed op", op.cancel(), "claim failed");
    let rec = op.test().unwrap_or_default();
    t.check(
        &format!("cancelled completion carries code {}", rec.code),
        rec.code == CANCELLED_CODE,
        &format!("got {}", rec.code),
    );

    // A7: persistent op survives consumption and re-arms
    let token = transport.submit_persistent(record(4), None);
    let mut op = OpHandle::persistent(token, transport.clone());
    transport.start(token);
    transport.fire(token);
    let first = op.test();
    let live_after_first = !op.is_null();
    transport.start(token);
    transport.fire(token);
    let second = op.test();
    t.check(
        "persistent op completes twice and stays live",
        first.map(|r| r.tag) == Some(4) && live_after_first && second.map(|r| r.tag) == Some(4),
        "lifecycle broken",
    );
}

// ════════════════════════════════════════════════════════════
// Part B: Batched Tests
// ════════════════════════════════════════════════════════════

fn test_batches(t: &mut TestRunner, transport: &Arc<LocalTransport>) {
    t.section("Part B: Batched Tests");

    // B1: all-or-nothing
    let mut handles = submit_manual_set(transport, 3);
    let tokens: Vec<_> = handles.iter().map(|h| h.token()).collect();
    transport.fire(tokens[0]);
    t.check(
        "test_all with stragglers returns None",
        test_all(&mut handles).is_none(),
        "partial success",
    );
    t.check(
        "failed test_all consumed nothing",
        handles.iter().all(|h| !h.is_null()),
        "a handle was consumed",
    );
    transport.fire(tokens[1]);
    transport.fire(tokens[2]);
    let recs = test_all(&mut handles);
    t.check(
        "test_all after last fire returns all records in order",
        recs.map(|r| r.iter().enumerate().all(|(i, rec)| rec.tag == i as u32))
            .unwrap_or(false),
        "missing or misordered",
    );

    // B2: test_any consumes only the hit
    let mut handles = submit_manual_set(transport, 3);
    let tokens: Vec<_> = handles.iter().map(|h| h.token()).collect();
    transport.fire(tokens[1]);
    let hit = test_any(&mut handles);
    t.check(
        "test_any returns the completed index",
        hit.map(|(i, rec)| (i, rec.tag)) == Some((1, 1)),
        &format!("{:?}", hit.map(|(i, _)| i)),
    );
    t.check(
        "test_any left the other members live",
        !handles[0].is_null() && handles[1].is_null() && !handles[2].is_null(),
        "wrong consumption",
    );
    transport.fire(tokens[0]);
    transport.fire(tokens[2]);
    let rest = wait_all(&mut handles);
    t.check("wait_all finishes the remainder", rest.len() == 3, "short");

    // B3: test_some collects everything done so far
    let mut handles = submit_manual_set(transport, 4);
    let tokens: Vec<_> = handles.iter().map(|h| h.token()).collect();
    transport.fire(tokens[0]);
    transport.fire(tokens[3]);
    let done = test_some(&mut handles);
    let idx: Vec<usize> = done.iter().map(|(i, _)| *i).collect();
    t.check("test_some returns {0, 3}", idx == vec![0, 3], &format!("{:?}", idx));
    transport.fire(tokens[1]);
    transport.fire(tokens[2]);
    let _ = wait_all(&mut handles);

    // B4: wait_any picks the earliest landing op
    let mut handles: Vec<OpHandle> = (0..3u32)
        .map(|i| {
            OpHandle::managed(
                transport.submit_after(record(i), Duration::from_millis(5 + 15 * i as u64)),
                transport.clone(),
            )
        })
        .collect();
    let start = Instant::now();
    let (idx, rec) = wait_any(&mut handles);
    t.check(
        &format!("wait_any -> index {} after {:?}", idx, start.elapsed()),
        idx == 0 && rec.tag == 0,
        "wrong member",
    );
    let _ = wait_all(&mut handles);
}

// ════════════════════════════════════════════════════════════
// Part C: Futures & Continuations
// ════════════════════════════════════════════════════════════

fn test_futures(t: &mut TestRunner, transport: &Arc<LocalTransport>) {
    t.section("Part C: Futures & Continuations");

    // C1: lifecycle flags
    let token = transport.submit_manual(record(1));
    let mut f = OpFuture::new(OpHandle::managed(token, transport.clone()));
    t.check("new future is valid and not ready", f.valid() && !f.is_ready(), "flags wrong");
    transport.fire(token);
    t.check("completion makes it ready", f.is_ready(), "still pending");
    t.check("resolution consumed the operation", !f.valid(), "still valid");
    t.check("get() hands out the record", f.get().tag == 1, "wrong record");
    f.wait();
    t.check("wait() after resolution is a no-op", f.get().tag == 1, "record changed");

    // C2: trivially ready future
    let mut done = OpFuture::ready();
    t.check("ready future is ready and not valid", done.is_ready() && !done.valid(), "flags");

    // C3: chain runs on the calling thread, in order
    let main_thread = thread::current().id();
    let on_main = Arc::new(AtomicBool::new(true));
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut chain = OpFuture::new(OpHandle::managed(
        transport.submit_after(record(1), Duration::from_millis(3)),
        transport.clone(),
    ));
    for step in 2..=3u32 {
        let transport = Arc::clone(transport);
        let on_main = Arc::clone(&on_main);
        let order = Arc::clone(&order);
        chain = chain.then(move |mut prev| {
            if thread::current().id() != main_thread {
                on_main.store(false, Ordering::SeqCst);
            }
            order.lock().unwrap().push(prev.get().tag);
            OpFuture::new(OpHandle::managed(
                transport.submit_after(record(step), Duration::from_millis(3)),
                transport.clone(),
            ))
        });
    }
    order.lock().unwrap().push(chain.get().tag);
    t.check(
        "chain resolved 1 -> 2 -> 3",
        *order.lock().unwrap() == vec![1, 2, 3],
        &format!("{:?}", order.lock().unwrap()),
    );
    t.check(
        "continuations ran on the calling thread",
        on_main.load(Ordering::SeqCst),
        "hopped threads",
    );

    // C4: when_any then when_all over the stragglers
    let mut futures: Vec<OpFuture> = (0..3u32)
        .map(|i| {
            OpFuture::new(OpHandle::managed(
                transport.submit_after(record(i), Duration::from_millis(4 + 12 * i as u64)),
                transport.clone(),
            ))
        })
        .collect();
    let start = Instant::now();
    let mut first = when_any(&mut futures);
    t.check(
        &format!("when_any resolved in {:?}", start.elapsed()),
        first.is_ready(),
        "not ready",
    );
    let resolved = futures.iter().filter(|f| !f.valid()).count();
    t.check("exactly one member was consumed", resolved == 1, &format!("{}", resolved));
    let mut rest = when_all(&mut futures);
    rest.wait();
    t.check(
        "when_all drains the remainder",
        futures.iter().all(|f| !f.valid()),
        "members left over",
    );
}

// ════════════════════════════════════════════════════════════
// Part D: Detach Engine
// ════════════════════════════════════════════════════════════

fn test_detach(t: &mut TestRunner, transport: &Arc<LocalTransport>) {
    t.section("Part D: Detach Engine");

    // D1: synchronous fast path
    let engine = DetachEngine::new(EngineConfig::new().background_thread(false));
    let mut op = OpHandle::managed(transport.submit_ready(record(7)), transport.clone());
    let fired = Arc::new(AtomicBool::new(false));
    {
        let fired = Arc::clone(&fired);
        engine.detach(&mut op, move |_| fired.store(true, Ordering::SeqCst));
    }
    t.check(
        "complete op fires before detach returns",
        fired.load(Ordering::SeqCst),
        "deferred",
    );

    // D2: foreground progress delivers manual ops
    let counter = Arc::new(AtomicUsize::new(0));
    let mut tokens = Vec::new();
    for i in 0..4u32 {
        let mut op = OpHandle::managed(transport.submit_manual(record(i)), transport.clone());
        tokens.push(op.token());
        let counter = Arc::clone(&counter);
        engine.detach(&mut op, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    engine.progress();
    t.check(
        "nothing fires before completion",
        counter.load(Ordering::SeqCst) == 0,
        "early fire",
    );
    for tk in &tokens {
        transport.fire(*tk);
    }
    while engine.pending_entries() > 0 {
        engine.progress();
    }
    t.check(
        "all four callbacks fired after completion",
        counter.load(Ordering::SeqCst) == 4,
        &format!("{}", counter.load(Ordering::SeqCst)),
    );

    // D3: detach_all is all-or-nothing
    let mut handles = submit_manual_set(transport, 3);
    let tokens: Vec<_> = handles.iter().map(|h| h.token()).collect();
    let got = Arc::new(Mutex::new(Vec::new()));
    {
        let got = Arc::clone(&got);
        engine.detach_all(&mut handles, move |recs| {
            *got.lock().unwrap() = recs.iter().map(|r| r.tag).collect();
        });
    }
    transport.fire(tokens[0]);
    engine.progress();
    t.check(
        "partial batch does not fire",
        got.lock().unwrap().is_empty(),
        "fired early",
    );
    transport.fire(tokens[1]);
    transport.fire(tokens[2]);
    while engine.pending_entries() > 0 {
        engine.progress();
    }
    t.check(
        "batch fired once with ordered records",
        *got.lock().unwrap() == vec![0, 1, 2],
        &format!("{:?}", got.lock().unwrap()),
    );

    // D4: background thread + drop drain
    let engine = DetachEngine::new(EngineConfig::new());
    let mut op = OpHandle::managed(transport.submit_manual(record(9)), transport.clone());
    let token = op.token();
    let fired = Arc::new(AtomicBool::new(false));
    {
        let fired = Arc::clone(&fired);
        engine.detach(&mut op, move |_| fired.store(true, Ordering::SeqCst));
    }
    let firer = {
        let transport = Arc::clone(transport);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            transport.fire(token)
        })
    };
    drop(engine);
    t.check(
        "drop drained the outstanding callback",
        fired.load(Ordering::SeqCst),
        "work discarded",
    );
    t.check("completer thread succeeded", firer.join().unwrap_or(false), "join failed");

    // D5: process-wide facade
    let mut op = OpHandle::managed(transport.submit_ready(record(5)), transport.clone());
    let fired = Arc::new(AtomicBool::new(false));
    {
        let fired = Arc::clone(&fired);
        opdrive::detach(&mut op, move |_| fired.store(true, Ordering::SeqCst));
    }
    t.check("global detach fast path", fired.load(Ordering::SeqCst), "deferred");
    shutdown_global();
}

// ════════════════════════════════════════════════════════════

fn main() {
    println!("=== opdrive Detach Smoke Test ===");

    let mut t = TestRunner::new();
    let transport = Arc::new(LocalTransport::new());

    test_handles(&mut t, &transport);
    test_batches(&mut t, &transport);
    test_futures(&mut t, &transport);
    test_detach(&mut t, &transport);

    t.check(
        "transport fully drained at exit",
        transport.pending() == 0,
        &format!("{} ops left", transport.pending()),
    );

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
