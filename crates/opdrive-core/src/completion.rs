//! Completion record type.
//!
//! One record is produced per finished operation and is immutable from
//! then on. The engine moves records to callers and callbacks verbatim;
//! it never interprets them. In particular a non-zero `code` does not
//! trigger retries or short-circuits anywhere in the engine — error
//! handling is the consumer's business.

/// Immutable outcome of one completed asynchronous operation.
///
/// `code` is transport-defined: zero means success, anything else is an
/// error or cancellation indicator. `source` and `tag` identify the peer
/// and message class for matched operations; `count` is the transferred
/// element count. Transports that have no use for a field leave it zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Originating peer of the operation, if any.
    pub source: u32,
    /// Match tag of the operation, if any.
    pub tag: u32,
    /// Transport status code. Zero is success; the engine never interprets
    /// non-zero values.
    pub code: i32,
    /// Number of elements transferred.
    pub count: usize,
}

impl Completion {
    /// The all-zero record: what a null (already consumed or never
    /// started) operation completes with.
    pub const fn empty() -> Self {
        Self {
            source: 0,
            tag: 0,
            code: 0,
            count: 0,
        }
    }

    /// Success record with a payload count.
    pub const fn with_count(count: usize) -> Self {
        Self {
            source: 0,
            tag: 0,
            code: 0,
            count,
        }
    }

    /// Whether the transport reported a non-success code.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::empty()
    }
}
