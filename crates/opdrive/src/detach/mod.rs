//! Fire-and-forget completion: register a callback for an in-flight
//! operation and let a progress engine deliver it.
//!
//! Most programs want exactly one engine. The free functions here
//! ([`detach`], [`detach_each`], [`detach_all`], [`progress`]) forward
//! to a process-wide instance that is created on first use with
//! [`EngineConfig::default`] — or explicitly, with a chosen
//! configuration, through [`init_global`]. Code that needs an isolated
//! engine (tests, embedded drivers with their own polling rules)
//! constructs a [`DetachEngine`] directly instead.

mod engine;

pub use engine::{DetachEngine, ProgressStats};

use std::sync::{Arc, Mutex};

use opdrive_core::{Completion, EngineError};

use crate::config::EngineConfig;
use crate::handle::OpHandle;

static GLOBAL: Mutex<Option<Arc<DetachEngine>>> = Mutex::new(None);

/// Install the process-wide engine with an explicit configuration.
///
/// Fails with [`EngineError::AlreadyInitialized`] if the global engine
/// already exists (whether installed here or created lazily by
/// [`global`]). Call before any detach traffic to pick the
/// configuration deliberately.
pub fn init_global(config: EngineConfig) -> Result<(), EngineError> {
    config.validate()?;
    let mut slot = GLOBAL.lock().unwrap();
    if slot.is_some() {
        return Err(EngineError::AlreadyInitialized);
    }
    *slot = Some(Arc::new(DetachEngine::new(config)));
    log::debug!("global detach engine installed");
    Ok(())
}

/// The process-wide engine, created on first use if nobody called
/// [`init_global`].
pub fn global() -> Arc<DetachEngine> {
    let mut slot = GLOBAL.lock().unwrap();
    Arc::clone(slot.get_or_insert_with(|| Arc::new(DetachEngine::new(EngineConfig::default()))))
}

/// Tear down the process-wide engine.
///
/// Removes the global reference; the engine drains and shuts down when
/// the last outstanding [`Arc`] from [`global`] goes away (immediately,
/// if nobody else holds one). A later [`global`] or [`init_global`]
/// starts fresh.
pub fn shutdown_global() {
    let engine = GLOBAL.lock().unwrap().take();
    drop(engine);
}

/// Detach `handle` on the process-wide engine.
///
/// See [`DetachEngine::detach`].
pub fn detach<F>(handle: &mut OpHandle, callback: F)
where
    F: FnOnce(Completion) + Send + 'static,
{
    global().detach(handle, callback);
}

/// Detach each handle independently on the process-wide engine.
///
/// See [`DetachEngine::detach_each`].
pub fn detach_each<F>(handles: &mut [OpHandle], callback: F)
where
    F: Fn(usize, Completion) + Send + Sync + 'static,
{
    global().detach_each(handles, callback);
}

/// Detach the collection all-or-nothing on the process-wide engine.
///
/// See [`DetachEngine::detach_all`].
pub fn detach_all<F>(handles: &mut [OpHandle], callback: F)
where
    F: FnOnce(Vec<Completion>) + Send + 'static,
{
    global().detach_all(handles, callback);
}

/// Run one progress pass on the process-wide engine.
///
/// See [`DetachEngine::progress`].
pub fn progress() -> bool {
    global().progress()
}
