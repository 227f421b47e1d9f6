//! Batched completion tests.
//!
//! Free functions over ordered collections of [`OpHandle`]s. Order is
//! significant: results are reported with the original index of the
//! operation they belong to.
//!
//! All handles of one call must come from the same transport (checked in
//! debug builds). Already-consumed (null) handles are legal members of a
//! collection: `test_all`/`wait_all` treat them as trivially complete,
//! the `*_any`/`*_some` sweeps skip them.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use opdrive_core::{Completion, OpToken};

use crate::handle::OpHandle;

/// Sleep between sweeps inside the blocking poll loops.
const POLL_SLEEP: Duration = Duration::from_micros(50);

fn debug_assert_one_transport(handles: &[OpHandle]) {
    let mut live = handles.iter().filter(|h| !h.is_null());
    if let Some(first) = live.next() {
        for h in live {
            debug_assert!(
                Arc::ptr_eq(first.transport(), h.transport()),
                "batched handles must share one transport"
            );
        }
    }
}

/// Transport of the first live handle, if any handle is live at all.
fn live_transport(handles: &[OpHandle]) -> Option<Arc<dyn opdrive_core::Transport>> {
    handles
        .iter()
        .find(|h| !h.is_null())
        .map(|h| Arc::clone(h.transport()))
}

/// Non-blocking test of the whole collection at once.
///
/// Returns all N records, index-aligned, only if every operation is
/// complete simultaneously at the time of the call; otherwise `None`.
/// All-or-nothing: a `None` outcome has consumed nothing — the test is
/// delegated in one call to the transport's atomic batch primitive, so a
/// partial completion can never be silently lost. `Some` consumes every
/// non-persistent handle to null.
///
/// An empty collection is trivially complete.
pub fn test_all(handles: &mut [OpHandle]) -> Option<Vec<Completion>> {
    debug_assert_one_transport(handles);
    let Some(transport) = live_transport(handles) else {
        return Some(vec![Completion::empty(); handles.len()]);
    };
    let tokens: Vec<OpToken> = handles.iter().map(|h| h.token()).collect();
    let records = transport.try_complete_all(&tokens)?;
    for h in handles.iter_mut() {
        h.finish_consume();
    }
    Some(records)
}

/// Non-blocking test for exactly one completed operation.
///
/// Sweeps in index order, skipping null handles; the first success is
/// consumed and returned with its index, everything else is untouched.
///
/// Precondition (asserted): the collection holds at least one live
/// handle — an all-consumed collection has nothing left to report and
/// a blocking caller would never return.
pub fn test_any(handles: &mut [OpHandle]) -> Option<(usize, Completion)> {
    assert!(
        !handles.is_empty(),
        "test_any/wait_any require at least one operation"
    );
    assert!(
        handles.iter().any(|h| !h.is_null()),
        "test_any/wait_any require at least one live operation"
    );
    debug_assert_one_transport(handles);
    for (index, handle) in handles.iter_mut().enumerate() {
        if handle.is_null() {
            continue;
        }
        if let Some(record) = handle.test() {
            return Some((index, record));
        }
    }
    None
}

/// Non-blocking test for every operation that is ready right now.
///
/// Returns the (index, record) pairs of all completions available at
/// the time of the call, possibly none, consuming exactly those. Null
/// handles are skipped.
pub fn test_some(handles: &mut [OpHandle]) -> Vec<(usize, Completion)> {
    debug_assert_one_transport(handles);
    let mut ready = Vec::new();
    for (index, handle) in handles.iter_mut().enumerate() {
        if handle.is_null() {
            continue;
        }
        if let Some(record) = handle.test() {
            ready.push((index, record));
        }
    }
    ready
}

/// Block until every operation has completed; records index-aligned.
///
/// Waits the handles in index order — the total effect is the same
/// regardless of completion order. Empty collections return immediately.
pub fn wait_all(handles: &mut [OpHandle]) -> Vec<Completion> {
    debug_assert_one_transport(handles);
    handles.iter_mut().map(|h| h.wait()).collect()
}

/// Block until at least one operation completes; returns its index and
/// record, consuming only that one.
///
/// Same precondition as [`test_any`].
pub fn wait_any(handles: &mut [OpHandle]) -> (usize, Completion) {
    loop {
        if let Some(hit) = test_any(handles) {
            return hit;
        }
        thread::sleep(POLL_SLEEP);
    }
}

/// Block until at least one operation completes; returns every
/// completion available at that moment.
///
/// A collection with no live handles (including the empty one) returns
/// immediately with no records.
pub fn wait_some(handles: &mut [OpHandle]) -> Vec<(usize, Completion)> {
    if handles.iter().all(|h| h.is_null()) {
        return Vec::new();
    }
    loop {
        let ready = test_some(handles);
        if !ready.is_empty() {
            return ready;
        }
        thread::sleep(POLL_SLEEP);
    }
}
