//! Blocking future and continuation combinator.
//!
//! An [`OpFuture`] wraps one operation handle and adds a readiness
//! query, blocking retrieval with a cached result, and `then` chaining.
//!
//! # Design
//!
//! There is no executor. `then` invokes its continuation immediately on
//! the calling thread; a chain of continuations is ordinary sequential
//! code where each step decides for itself when to block (`get`). That
//! keeps composition cheap and the control flow obvious: the thread
//! that drives the chain *is* the scheduler.
//!
//! ```text
//! ready() ──then(f1)──▶ f1 runs now ──then(f2)──▶ f2 runs now ──▶ …
//!                        │ may get()                │ may get()
//!                        ▼                          ▼
//!                      blocks here                blocks here
//! ```

use std::thread;
use std::time::Duration;

use opdrive_core::Completion;

use crate::handle::OpHandle;

/// Sweep gap inside [`when_any`]'s poll loop.
const POLL_SLEEP: Duration = Duration::from_micros(50);

/// One asynchronous operation plus its eventual cached result.
///
/// Movable, not clonable. State machine: unresolved until a test or
/// wait succeeds, resolved afterwards; moving out of a variable is the
/// only way to leave the resolved state.
pub struct OpFuture {
    handle: OpHandle,
    cached: Option<Completion>,
}

impl OpFuture {
    /// Adopt a handle. A persistent handle is armed immediately — it is
    /// inert until started, and a future over an inert operation would
    /// never resolve.
    pub fn new(handle: OpHandle) -> Self {
        if handle.is_persistent() && !handle.is_null() {
            handle.transport().start(handle.token());
        }
        Self {
            handle,
            cached: None,
        }
    }

    /// An immediately resolved future over the null operation. The
    /// canonical chain starting point.
    pub fn ready() -> Self {
        Self {
            handle: OpHandle::null(),
            cached: Some(Completion::empty()),
        }
    }

    /// Whether the underlying handle still refers to a live operation.
    ///
    /// False once a non-persistent operation has been finally consumed —
    /// including for [`ready`](Self::ready) futures, which are resolved
    /// but refer to nothing.
    pub fn valid(&self) -> bool {
        !self.handle.is_null()
    }

    /// Non-blocking readiness query.
    ///
    /// Not side-effect-free: a successful test resolves the future, and
    /// the result it caches is the one later returned by `get`.
    pub fn is_ready(&mut self) -> bool {
        if self.cached.is_some() {
            return true;
        }
        match self.handle.test() {
            Some(record) => {
                self.cached = Some(record);
                true
            }
            None => false,
        }
    }

    /// Block until resolved. Idempotent: once resolved, further calls
    /// return without touching the handle again.
    pub fn wait(&mut self) {
        if self.cached.is_none() {
            self.cached = Some(self.handle.wait());
        }
    }

    /// [`wait`](Self::wait), then the cached record.
    pub fn get(&mut self) -> Completion {
        self.wait();
        self.cached.unwrap_or_else(Completion::empty)
    }

    /// Chain a continuation.
    ///
    /// The continuation receives this future by value and runs
    /// immediately on the calling thread; it calls `get` internally if
    /// it needs the result before proceeding. `then` never blocks by
    /// itself — any blocking happens inside the continuation.
    pub fn then<F>(self, continuation: F) -> OpFuture
    where
        F: FnOnce(OpFuture) -> OpFuture,
    {
        continuation(self)
    }

    /// Consume the future's handle, for registration elsewhere (the
    /// detach engine adopts handles this way).
    pub fn into_handle(self) -> OpHandle {
        self.handle
    }

    fn resolved(&self) -> bool {
        self.cached.is_some()
    }
}

/// Resolve every future in the collection, blocking until all are done,
/// then yield a fresh ready future.
///
/// Sugar over [`ready`](OpFuture::ready) + [`then`](OpFuture::then): the
/// continuation performs the batched wait. The futures are borrowed, so
/// their cached results stay retrievable afterwards via `get`.
pub fn when_all(futures: &mut [OpFuture]) -> OpFuture {
    OpFuture::ready().then(move |_| {
        for future in futures.iter_mut() {
            future.wait();
        }
        OpFuture::ready()
    })
}

/// Block until at least one future in the collection is resolved, then
/// yield a fresh ready future.
///
/// Precondition (asserted): at least one future is resolved already or
/// still valid — otherwise nothing could ever become ready.
pub fn when_any(futures: &mut [OpFuture]) -> OpFuture {
    assert!(
        !futures.is_empty(),
        "when_any requires at least one future"
    );
    assert!(
        futures.iter().any(|f| f.resolved() || f.valid()),
        "when_any requires at least one future that can become ready"
    );
    OpFuture::ready().then(move |_| loop {
        for future in futures.iter_mut() {
            if future.is_ready() {
                return OpFuture::ready();
            }
        }
        thread::sleep(POLL_SLEEP);
    })
}
