//! # opdrive - Asynchronous Operation Completion Engine
//!
//! Track in-flight operations from any completion source and drive
//! them to completion: poll, block, compose, or detach with a callback.
//!
//! ## Features
//!
//! - **Handles**: single-shot or persistent operation handles with
//!   `test` / `wait` / `cancel`
//! - **Batches**: index-addressed collection tests; `test_all` is
//!   all-or-nothing, `test_any` and `test_some` consume what's done
//! - **Futures**: `valid` / `is_ready` lifecycle, synchronous `then`
//!   chaining, `when_all` / `when_any` combinators
//! - **Detach**: fire-and-forget registration; every callback fires
//!   exactly once, even across engine shutdown
//! - **Progress**: explicit `progress()` passes from any thread, or a
//!   background thread with bounded parks
//! - **Pluggable**: any completion source fits behind the
//!   [`Transport`] trait
//!
//! ## Quick Start
//!
//! ```ignore
//! use opdrive::{detach, OpFuture, OpHandle};
//!
//! fn main() {
//!     // A transport turns submitted work into completion records.
//!     let driver = my_driver::connect();
//!
//!     // Handle: poll without blocking, or block explicitly.
//!     let mut op = OpHandle::managed(driver.submit_read(buf), driver.clone());
//!     if let Some(record) = op.test() {
//!         println!("done early: {} bytes", record.count);
//!     } else {
//!         let record = op.wait();
//!         println!("done: {} bytes", record.count);
//!     }
//!
//!     // Future: compose follow-up work on the completing thread.
//!     let mut chain = OpFuture::new(OpHandle::managed(driver.submit_read(buf), driver.clone()))
//!         .then(|mut done| {
//!             println!("read {} bytes", done.get().count);
//!             OpFuture::ready()
//!         });
//!     chain.wait();
//!
//!     // Detach: fire-and-forget with a callback.
//!     let mut op = OpHandle::managed(driver.submit_write(buf), driver.clone());
//!     detach(&mut op, |record| println!("write finished: code {}", record.code));
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       User Code                         │
//! │      OpHandle · batch tests · OpFuture · detach()       │
//! └─────────────────────────────────────────────────────────┘
//!                   │                        │
//!                   ▼                        ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │      Blocking paths      │   │      Detach engine       │
//! │  wait / wait_all / get   │   │  intake queues → active  │
//! │   caller-thread waits    │   │  lists, progress passes, │
//! │                          │   │  optional poll thread    │
//! └──────────────────────────┘   └──────────────────────────┘
//!                   │                        │
//!                   └───────────┬────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Transport (trait)                    │
//! │  try_complete · wait · try_complete_all · cancel · ...  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod batch;
pub mod config;
pub mod detach;
pub mod future;
pub mod handle;

// Re-export interface types
pub use opdrive_core::{
    Completion,
    ConfigError,
    EngineError,
    NullTransport,
    OpToken,
    Transport,
    TransportError,
};

// Re-export the working surface, flattened for the common case
pub use batch::{test_all, test_any, test_some, wait_all, wait_any, wait_some};
pub use config::EngineConfig;
pub use detach::{
    detach, detach_all, detach_each, init_global, progress, shutdown_global, DetachEngine,
    ProgressStats,
};
pub use future::{when_all, when_any, OpFuture};
pub use handle::OpHandle;
