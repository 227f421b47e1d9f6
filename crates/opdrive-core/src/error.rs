//! opdrive error types.
//!
//! Three layers, three enums. Transport-level *operation* failure is not
//! here at all: it rides inside [`crate::Completion::code`] and stays
//! opaque to the engine. These enums cover the control surface —
//! resource release, engine lifecycle, configuration.

use crate::token::OpToken;

/// Errors from the transport's control operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport refused to release a token's resources.
    #[error("release failed for {0}")]
    ReleaseFailed(OpToken),

    /// The transport has been shut down and no longer accepts calls.
    #[error("transport shut down")]
    ShutDown,
}

/// Errors from engine lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A process-wide engine already exists.
    #[error("global engine already initialized")]
    AlreadyInitialized,

    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("{0}")]
    Invalid(String),
}
