//! Transport abstraction.
//!
//! A `Transport` is the collaborator that actually runs asynchronous
//! operations. It mints tokens at submission time (its own API, outside
//! this trait), answers completion queries here, and owns whatever
//! per-operation resources exist until `release`.
//!
//! The engine calls these methods from multiple threads; implementations
//! must be internally synchronized.

use crate::completion::Completion;
use crate::error::TransportError;
use crate::token::OpToken;

/// Completion queries and lifecycle control for in-flight operations.
///
/// **Contract:**
///
/// - `try_complete` and `try_complete_all` never block.
/// - A completed operation is reported exactly once per arming: the call
///   that returns `Some` consumes the completion. A later query for the
///   same token returns pending (or the next completion, for persistent
///   operations that were re-armed).
/// - `try_complete_all` is all-or-nothing: either every listed token is
///   complete and all are consumed, or `None` and nothing is consumed.
///   Engines rely on this for atomic batch tests and perform no partial
///   bookkeeping of their own.
/// - [`OpToken::NULL`] is trivially complete: `try_complete` returns
///   `Some(Completion::empty())`, `wait` returns the empty record
///   immediately, and it never counts against an all-or-nothing batch.
/// - `release` is idempotent; unknown and null tokens are a successful
///   no-op.
/// - Failed operations still complete. The failure rides in
///   [`Completion::code`]; no trait method signals it.
///
/// # Implementors
///
/// - `NullTransport`: every token behaves as null. Backs ready futures.
/// - `LocalTransport` (crate `opdrive-local`): in-process reference
///   transport with deadline, manual-fire and persistent operations.
pub trait Transport: Send + Sync {
    /// Non-blocking completion test. `Some` consumes the completion.
    fn try_complete(&self, token: OpToken) -> Option<Completion>;

    /// Block until the operation completes, then consume and return its
    /// record. Must not spin against `try_complete` if the transport can
    /// sleep properly.
    fn wait(&self, token: OpToken) -> Completion;

    /// Non-blocking all-or-nothing batch test, results index-aligned
    /// with `tokens`.
    fn try_complete_all(&self, tokens: &[OpToken]) -> Option<Vec<Completion>>;

    /// Release per-operation resources. Idempotent.
    fn release(&self, token: OpToken) -> Result<(), TransportError>;

    /// Best-effort cancellation. `true` means the cancel was accepted;
    /// the operation still completes (with a transport-defined code) and
    /// must still be observed and released.
    fn cancel(&self, token: OpToken) -> bool;

    /// Arm or re-arm a persistent operation for its next completion.
    /// No-op for transports without persistent operations.
    fn start(&self, _token: OpToken) {}
}

/// Transport for which every token behaves as [`OpToken::NULL`].
///
/// Everything is already complete with the empty record. Ready futures
/// are built over this.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn try_complete(&self, _token: OpToken) -> Option<Completion> {
        Some(Completion::empty())
    }

    fn wait(&self, _token: OpToken) -> Completion {
        Completion::empty()
    }

    fn try_complete_all(&self, tokens: &[OpToken]) -> Option<Vec<Completion>> {
        Some(vec![Completion::empty(); tokens.len()])
    }

    fn release(&self, _token: OpToken) -> Result<(), TransportError> {
        Ok(())
    }

    fn cancel(&self, _token: OpToken) -> bool {
        false
    }
}
