//! # opdrive-local — In-process reference transport
//!
//! A [`Transport`] whose operations live in one process-local table.
//! Three ways for an operation to complete:
//!
//! ```text
//! submit_after(rec, delay)   completes once `delay` has elapsed
//! submit_manual(rec)         completes when fire(token) is called
//! submit_ready(rec)          complete at submission
//! ```
//!
//! plus `submit_persistent`, which mints a restartable operation: inert
//! until `start`, one completion per arming, re-armable after each drain.
//!
//! Deadlines are evaluated lazily inside the completion queries — there
//! is no timer thread. Blocking waiters park on a condvar with
//! deadline-aware timeouts. The whole table sits behind a single mutex,
//! which is what makes `try_complete_all` genuinely all-or-nothing: the
//! check and the consume happen under one critical section.
//!
//! Built for the engine's tests and demos; it is deliberately small and
//! makes no throughput claims.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use opdrive_core::{Completion, OpToken, Transport, TransportError};

/// Code delivered by a cancelled operation (-ECANCELED, the io_uring
/// convention).
pub const CANCELLED_CODE: i32 = -125;

/// Condvar re-check slice for waiters with no deadline to aim at.
const WAIT_SLICE: Duration = Duration::from_millis(100);

struct OpState {
    /// Record a normal completion delivers.
    template: Completion,
    /// Fired but not yet consumed completion.
    ready: Option<Completion>,
    /// Will eventually produce a completion (by deadline or `fire`).
    armed: bool,
    deadline: Option<Instant>,
    persistent: bool,
    /// Deadline ops re-fire this long after each `start`.
    period: Option<Duration>,
}

impl OpState {
    /// Fold an elapsed deadline into the ready slot.
    fn poll(&mut self, now: Instant) {
        if self.armed {
            if let Some(d) = self.deadline {
                if d <= now {
                    self.ready = Some(self.template);
                    self.armed = false;
                }
            }
        }
    }

    /// Whether a completion query would succeed right now.
    fn is_ready(&self) -> bool {
        self.ready.is_some()
    }
}

/// In-process transport. Wrap in an `Arc` and hand clones to handles;
/// keep one for the control surface (`fire`, submissions).
pub struct LocalTransport {
    ops: Mutex<HashMap<OpToken, OpState>>,
    completed: Condvar,
    next_token: AtomicU64,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(HashMap::new()),
            completed: Condvar::new(),
            // Token 0 is reserved for OpToken::NULL.
            next_token: AtomicU64::new(1),
        }
    }

    fn mint(&self) -> OpToken {
        OpToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, state: OpState) -> OpToken {
        let token = self.mint();
        self.ops.lock().unwrap().insert(token, state);
        token
    }

    /// One-shot operation that completes once `delay` has elapsed.
    pub fn submit_after(&self, record: Completion, delay: Duration) -> OpToken {
        self.insert(OpState {
            template: record,
            ready: None,
            armed: true,
            deadline: Some(Instant::now() + delay),
            persistent: false,
            period: None,
        })
    }

    /// One-shot operation that completes only when [`fire`](Self::fire)d.
    pub fn submit_manual(&self, record: Completion) -> OpToken {
        self.insert(OpState {
            template: record,
            ready: None,
            armed: true,
            deadline: None,
            persistent: false,
            period: None,
        })
    }

    /// One-shot operation that is complete at submission.
    pub fn submit_ready(&self, record: Completion) -> OpToken {
        self.insert(OpState {
            template: record,
            ready: Some(record),
            armed: false,
            deadline: None,
            persistent: false,
            period: None,
        })
    }

    /// Persistent operation: inert until `start`. With a period, each
    /// arming completes that long after the `start`; without one, each
    /// arming completes on `fire`.
    pub fn submit_persistent(&self, record: Completion, period: Option<Duration>) -> OpToken {
        self.insert(OpState {
            template: record,
            ready: None,
            armed: false,
            deadline: None,
            persistent: true,
            period,
        })
    }

    /// Force an armed operation to complete now. Returns `false` if the
    /// token is unknown, inert, or already complete.
    pub fn fire(&self, token: OpToken) -> bool {
        let mut ops = self.ops.lock().unwrap();
        let fired = match ops.get_mut(&token) {
            Some(st) if st.armed && st.ready.is_none() => {
                st.ready = Some(st.template);
                st.armed = false;
                true
            }
            _ => false,
        };
        drop(ops);
        if fired {
            log::trace!("local: fired {}", token);
            self.completed.notify_all();
        }
        fired
    }

    /// Operations still in the table (unconsumed one-shots plus all
    /// unreleased persistent ops).
    pub fn pending(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    /// Consume a ready completion. One-shot entries leave the table;
    /// persistent entries stay, disarmed, until the next `start`.
    fn consume(ops: &mut HashMap<OpToken, OpState>, token: OpToken) -> Option<Completion> {
        let st = ops.get_mut(&token)?;
        let rec = st.ready.take()?;
        if !st.persistent {
            ops.remove(&token);
        }
        Some(rec)
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalTransport {
    fn try_complete(&self, token: OpToken) -> Option<Completion> {
        if token.is_null() {
            return Some(Completion::empty());
        }
        let mut ops = self.ops.lock().unwrap();
        match ops.get_mut(&token) {
            // Unknown tokens are inactive: trivially complete.
            None => Some(Completion::empty()),
            Some(st) => {
                st.poll(Instant::now());
                if st.is_ready() {
                    Self::consume(&mut ops, token)
                } else {
                    None
                }
            }
        }
    }

    fn wait(&self, token: OpToken) -> Completion {
        if token.is_null() {
            return Completion::empty();
        }
        let mut ops = self.ops.lock().unwrap();
        loop {
            let timeout = match ops.get_mut(&token) {
                None => return Completion::empty(),
                Some(st) => {
                    let now = Instant::now();
                    st.poll(now);
                    if st.is_ready() {
                        return Self::consume(&mut ops, token)
                            .unwrap_or_else(Completion::empty);
                    }
                    match st.deadline {
                        Some(d) if st.armed => d.saturating_duration_since(now),
                        _ => WAIT_SLICE,
                    }
                }
            };
            // Wake on fire/cancel/start, or re-check at the deadline.
            let timeout = timeout.min(WAIT_SLICE).max(Duration::from_micros(1));
            let (guard, _) = self.completed.wait_timeout(ops, timeout).unwrap();
            ops = guard;
        }
    }

    fn try_complete_all(&self, tokens: &[OpToken]) -> Option<Vec<Completion>> {
        let mut ops = self.ops.lock().unwrap();
        let now = Instant::now();

        // Pass 1: everything must be ready before anything is consumed.
        for token in tokens {
            if token.is_null() {
                continue;
            }
            match ops.get_mut(token) {
                None => continue,
                Some(st) => {
                    st.poll(now);
                    if !st.is_ready() {
                        return None;
                    }
                }
            }
        }

        // Pass 2: consume, index-aligned.
        let records = tokens
            .iter()
            .map(|&token| {
                if token.is_null() {
                    Completion::empty()
                } else {
                    Self::consume(&mut ops, token).unwrap_or_else(Completion::empty)
                }
            })
            .collect();
        Some(records)
    }

    fn release(&self, token: OpToken) -> Result<(), TransportError> {
        if token.is_null() {
            return Ok(());
        }
        self.ops.lock().unwrap().remove(&token);
        Ok(())
    }

    fn cancel(&self, token: OpToken) -> bool {
        let mut ops = self.ops.lock().unwrap();
        let won = match ops.get_mut(&token) {
            Some(st) if st.armed && st.ready.is_none() => {
                st.ready = Some(Completion {
                    source: st.template.source,
                    tag: st.template.tag,
                    code: CANCELLED_CODE,
                    count: 0,
                });
                st.armed = false;
                true
            }
            _ => false,
        };
        drop(ops);
        if won {
            log::trace!("local: cancelled {}", token);
            self.completed.notify_all();
        }
        won
    }

    fn start(&self, token: OpToken) {
        let mut ops = self.ops.lock().unwrap();
        let armed = match ops.get_mut(&token) {
            Some(st) if st.persistent && !st.armed && st.ready.is_none() => {
                st.armed = true;
                st.deadline = st.period.map(|p| Instant::now() + p);
                true
            }
            _ => false,
        };
        drop(ops);
        if armed {
            // Waiters blocked on this token need to pick up the new deadline.
            self.completed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn rec(tag: u32, count: usize) -> Completion {
        Completion {
            source: 1,
            tag,
            code: 0,
            count,
        }
    }

    #[test]
    fn deadline_op_completes_after_delay() {
        let t = LocalTransport::new();
        let token = t.submit_after(rec(7, 3), Duration::from_millis(20));
        assert_eq!(t.try_complete(token), None);
        thread::sleep(Duration::from_millis(30));
        let c = t.try_complete(token).expect("past deadline");
        assert_eq!(c.tag, 7);
        assert_eq!(c.count, 3);
        // Consumed: the token is inactive now.
        assert_eq!(t.try_complete(token), Some(Completion::empty()));
    }

    #[test]
    fn manual_op_pends_until_fired() {
        let t = LocalTransport::new();
        let token = t.submit_manual(rec(1, 1));
        assert_eq!(t.try_complete(token), None);
        assert!(t.fire(token));
        assert!(!t.fire(token), "second fire loses");
        assert_eq!(t.try_complete(token), Some(rec(1, 1)));
    }

    #[test]
    fn ready_op_is_immediate() {
        let t = LocalTransport::new();
        let token = t.submit_ready(rec(2, 8));
        assert_eq!(t.try_complete(token), Some(rec(2, 8)));
    }

    #[test]
    fn wait_blocks_until_concurrent_fire() {
        let t = Arc::new(LocalTransport::new());
        let token = t.submit_manual(rec(4, 2));
        let firer = {
            let t = Arc::clone(&t);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                t.fire(token)
            })
        };
        let c = t.wait(token);
        assert_eq!(c, rec(4, 2));
        assert!(firer.join().unwrap());
    }

    #[test]
    fn wait_honors_deadline() {
        let t = LocalTransport::new();
        let token = t.submit_after(rec(5, 5), Duration::from_millis(15));
        let started = Instant::now();
        let c = t.wait(token);
        assert_eq!(c.tag, 5);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn batch_test_is_all_or_nothing() {
        let t = LocalTransport::new();
        let a = t.submit_ready(rec(1, 1));
        let b = t.submit_manual(rec(2, 2));
        let tokens = [a, b];

        // b pending: nothing may be consumed.
        assert!(t.try_complete_all(&tokens).is_none());
        assert_eq!(t.pending(), 2, "failed batch consumed nothing");

        t.fire(b);
        let recs = t.try_complete_all(&tokens).expect("both ready");
        assert_eq!(recs[0].tag, 1);
        assert_eq!(recs[1].tag, 2);
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn batch_treats_null_as_complete() {
        let t = LocalTransport::new();
        let a = t.submit_ready(rec(1, 1));
        let recs = t
            .try_complete_all(&[OpToken::NULL, a])
            .expect("null is trivial");
        assert_eq!(recs[0], Completion::empty());
        assert_eq!(recs[1].tag, 1);
    }

    #[test]
    fn cancel_delivers_cancelled_code() {
        let t = LocalTransport::new();
        let token = t.submit_manual(rec(9, 4));
        assert!(t.cancel(token));
        assert!(!t.cancel(token), "cancel races are single-winner");
        let c = t.try_complete(token).expect("cancelled ops complete");
        assert_eq!(c.code, CANCELLED_CODE);
        assert_eq!(c.tag, 9);
        assert_eq!(c.count, 0);
    }

    #[test]
    fn cancel_loses_to_completion() {
        let t = LocalTransport::new();
        let token = t.submit_manual(rec(3, 3));
        assert!(t.fire(token));
        assert!(!t.cancel(token));
        assert_eq!(t.try_complete(token), Some(rec(3, 3)));
    }

    #[test]
    fn persistent_op_rearms() {
        let t = LocalTransport::new();
        let token = t.submit_persistent(rec(6, 1), None);

        // Inert until started.
        assert_eq!(t.try_complete(token), None);
        assert!(!t.fire(token), "inert ops cannot fire");

        t.start(token);
        assert!(t.fire(token));
        assert_eq!(t.try_complete(token), Some(rec(6, 1)));

        // Drained arming: pending again until restarted.
        assert_eq!(t.try_complete(token), None);
        t.start(token);
        assert!(t.fire(token));
        assert_eq!(t.try_complete(token), Some(rec(6, 1)));

        // Entry survives consumption; release removes it.
        assert_eq!(t.pending(), 1);
        t.release(token).unwrap();
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn persistent_period_sets_deadline_per_start() {
        let t = LocalTransport::new();
        let token = t.submit_persistent(rec(8, 2), Some(Duration::from_millis(10)));
        assert_eq!(t.try_complete(token), None);
        t.start(token);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(t.try_complete(token), Some(rec(8, 2)));
        assert_eq!(t.try_complete(token), None, "not re-armed yet");
    }

    #[test]
    fn release_is_idempotent() {
        let t = LocalTransport::new();
        let token = t.submit_manual(rec(1, 1));
        assert!(t.release(token).is_ok());
        assert!(t.release(token).is_ok());
        assert!(t.release(OpToken::NULL).is_ok());
        assert!(t.release(OpToken(0xdead_beef)).is_ok());
    }
}
