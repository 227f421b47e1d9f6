//! Operation token type.
//!
//! Tokens are the transport's names for in-flight operations. The engine
//! stores and forwards them; it never interprets the value beyond the
//! null check.

/// Opaque identifier for one asynchronous operation, minted by a transport.
///
/// The zero value is reserved: [`OpToken::NULL`] names "no operation" and
/// is what a consumed handle holds. Transports must never hand out zero
/// for a live operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct OpToken(pub u64);

impl OpToken {
    /// The distinguished null token. Trivially complete everywhere.
    pub const NULL: Self = Self(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for OpToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "op#null")
        } else {
            write!(f, "op#{}", self.0)
        }
    }
}
