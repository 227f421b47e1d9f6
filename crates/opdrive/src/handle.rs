//! Operation handle.
//!
//! An `OpHandle` is the engine's grip on one in-flight asynchronous
//! operation: a transport token plus the ownership bookkeeping around it.
//!
//! # Design
//!
//! Two flags drive the lifecycle:
//!
//! - `managed`: this handle's drop must release the token's resources.
//! - `persistent`: the operation is re-armable; a successful test or
//!   wait drains one completion but leaves the handle live.
//!
//! A non-persistent handle is single-shot: the first successful `test`
//! or `wait` consumes it, releasing the token (if managed) and leaving
//! the null token behind. Testing a null handle trivially succeeds with
//! the empty record, so consumed handles stay harmless inside batched
//! calls.

use std::fmt;
use std::sync::Arc;

use opdrive_core::{Completion, NullTransport, OpToken, Transport};

/// Handle to one outstanding asynchronous operation.
///
/// Not `Clone`: the operation is a unique resource. Use
/// [`alias`](Self::alias) where a non-owning duplicate is needed.
pub struct OpHandle {
    token: OpToken,
    transport: Arc<dyn Transport>,
    managed: bool,
    persistent: bool,
}

impl OpHandle {
    /// Owning handle: drop releases the token.
    pub fn managed(token: OpToken, transport: Arc<dyn Transport>) -> Self {
        Self {
            token,
            transport,
            managed: true,
            persistent: false,
        }
    }

    /// Non-owning handle: drop leaves the token alone.
    pub fn unmanaged(token: OpToken, transport: Arc<dyn Transport>) -> Self {
        Self {
            token,
            transport,
            managed: false,
            persistent: false,
        }
    }

    /// Owning handle to a persistent (re-armable) operation. Inert
    /// until the transport's `start` arms it.
    pub fn persistent(token: OpToken, transport: Arc<dyn Transport>) -> Self {
        Self {
            token,
            transport,
            managed: true,
            persistent: true,
        }
    }

    /// Handle to the null operation. Trivially complete forever.
    pub fn null() -> Self {
        Self {
            token: OpToken::NULL,
            transport: Arc::new(NullTransport),
            managed: false,
            persistent: false,
        }
    }

    #[inline]
    pub fn token(&self) -> OpToken {
        self.token
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.token.is_null()
    }

    #[inline]
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    #[inline]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Non-blocking completion test.
    ///
    /// `Some` consumes the completion: a non-persistent handle becomes
    /// null (releasing the token if managed); a persistent handle stays
    /// live for the next arming. A null handle reports the empty record.
    pub fn test(&mut self) -> Option<Completion> {
        if self.token.is_null() {
            return Some(Completion::empty());
        }
        let record = self.transport.try_complete(self.token)?;
        self.finish_consume();
        Some(record)
    }

    /// Block until the operation completes, consuming it under the same
    /// rules as [`test`](Self::test).
    pub fn wait(&mut self) -> Completion {
        if self.token.is_null() {
            return Completion::empty();
        }
        let record = self.transport.wait(self.token);
        self.finish_consume();
        record
    }

    /// Best-effort cancellation. The operation still completes (usually
    /// with a transport-defined cancellation code) and must still be
    /// observed.
    pub fn cancel(&mut self) -> bool {
        if self.token.is_null() {
            return false;
        }
        self.transport.cancel(self.token)
    }

    /// Move the operation out, leaving this handle null and unmanaged.
    pub fn take(&mut self) -> OpHandle {
        OpHandle {
            token: std::mem::replace(&mut self.token, OpToken::NULL),
            transport: Arc::clone(&self.transport),
            managed: std::mem::replace(&mut self.managed, false),
            persistent: self.persistent,
        }
    }

    /// Non-owning duplicate of this handle. The alias tests and waits
    /// like the original but never releases the token; ownership stays
    /// here.
    pub fn alias(&self) -> OpHandle {
        OpHandle {
            token: self.token,
            transport: Arc::clone(&self.transport),
            managed: false,
            persistent: self.persistent,
        }
    }

    /// Post-consumption bookkeeping, shared with the batched tests
    /// (which consume completions transport-side in one call).
    pub(crate) fn finish_consume(&mut self) {
        if self.persistent {
            return;
        }
        let token = std::mem::replace(&mut self.token, OpToken::NULL);
        if self.managed && !token.is_null() {
            if let Err(e) = self.transport.release(token) {
                log::error!("release of consumed {} failed: {}", token, e);
            }
        }
        self.managed = false;
    }
}

impl fmt::Debug for OpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpHandle")
            .field("token", &self.token)
            .field("managed", &self.managed)
            .field("persistent", &self.persistent)
            .finish()
    }
}

impl Drop for OpHandle {
    fn drop(&mut self) {
        if self.managed && !self.token.is_null() {
            // Destructors cannot propagate; log and move on.
            if let Err(e) = self.transport.release(self.token) {
                log::error!("release of {} failed during drop: {}", self.token, e);
            }
        }
    }
}
