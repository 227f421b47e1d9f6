//! # opdrive-core — Trait definitions for opdrive
//!
//! This crate defines the boundary between the completion engine and the
//! transport that actually performs asynchronous operations. The engine
//! (handles, futures, the detach/progress machinery) lives in `opdrive`
//! and depends only on the types and traits here, never on a concrete
//! transport.
//!
//! ## Design principle
//!
//! > "Program to the interface. The engine polls; the transport completes."
//!
//! A transport mints [`OpToken`]s, answers non-blocking and blocking
//! completion queries about them, and produces one immutable
//! [`Completion`] record per finished operation. Everything else — who
//! waits, who polls, who gets called back — is engine policy and stays
//! out of this crate.

pub mod completion;
pub mod error;
pub mod token;
pub mod transport;

pub use completion::Completion;
pub use error::{ConfigError, EngineError, TransportError};
pub use token::OpToken;
pub use transport::{NullTransport, Transport};
