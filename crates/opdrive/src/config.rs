//! Engine configuration.
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration priority (highest wins)
//!
//! 1. Builder methods (programmatic)
//! 2. Environment variables (runtime)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use opdrive::EngineConfig;
//!
//! // Defaults with env overrides
//! let config = EngineConfig::from_env();
//!
//! // Or customize programmatically
//! let config = EngineConfig::from_env()
//!     .background_thread(false)
//!     .poll_interval(Duration::from_millis(5));
//! ```

use std::str::FromStr;
use std::time::Duration;

use opdrive_core::ConfigError;

mod defaults {
    pub const BACKGROUND_THREAD: bool = true;
    pub const POLL_INTERVAL_US: u64 = 2_000;
    pub const DRAIN_SLEEP_US: u64 = 50;
    pub const THREAD_NAME: &str = "opdrive-progress";
}

/// Get environment variable parsed as type T, or return default.
fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Detach engine configuration with builder pattern.
///
/// Use `from_env()` to start from library defaults with environment
/// overrides applied.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Spawn a dedicated progress thread. Without one, progress happens
    /// only when callers invoke `progress()` themselves.
    pub background_thread: bool,
    /// Upper bound on the background thread's park between passes.
    /// Bounds completion latency without busy-spinning.
    pub poll_interval: Duration,
    /// Sleep between sweeps while draining at shutdown.
    pub drain_sleep: Duration,
    /// Name of the background thread.
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EngineConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `OPDRIVE_BACKGROUND_THREAD` - Spawn the progress thread (0/1)
    /// - `OPDRIVE_POLL_INTERVAL_US` - Park bound in microseconds
    /// - `OPDRIVE_DRAIN_SLEEP_US` - Drain sweep gap in microseconds
    /// - `OPDRIVE_THREAD_NAME` - Progress thread name
    pub fn from_env() -> Self {
        Self {
            background_thread: env_get_bool(
                "OPDRIVE_BACKGROUND_THREAD",
                defaults::BACKGROUND_THREAD,
            ),
            poll_interval: Duration::from_micros(env_get(
                "OPDRIVE_POLL_INTERVAL_US",
                defaults::POLL_INTERVAL_US,
            )),
            drain_sleep: Duration::from_micros(env_get(
                "OPDRIVE_DRAIN_SLEEP_US",
                defaults::DRAIN_SLEEP_US,
            )),
            thread_name: env_get("OPDRIVE_THREAD_NAME", defaults::THREAD_NAME.to_string()),
        }
    }

    /// Explicit defaults, no env override. Useful for tests that must
    /// not depend on ambient environment.
    pub fn new() -> Self {
        Self {
            background_thread: defaults::BACKGROUND_THREAD,
            poll_interval: Duration::from_micros(defaults::POLL_INTERVAL_US),
            drain_sleep: Duration::from_micros(defaults::DRAIN_SLEEP_US),
            thread_name: defaults::THREAD_NAME.to_string(),
        }
    }

    /// Config tuned for completion latency: short parks, tight drains.
    pub fn low_latency() -> Self {
        Self {
            poll_interval: Duration::from_micros(200),
            drain_sleep: Duration::from_micros(10),
            ..Self::new()
        }
    }

    /// Config tuned for low idle CPU: long parks.
    pub fn low_cpu() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            drain_sleep: Duration::from_micros(500),
            ..Self::new()
        }
    }

    /// Set whether a background progress thread is spawned.
    pub fn background_thread(mut self, enabled: bool) -> Self {
        self.background_thread = enabled;
        self
    }

    /// Set the park bound between progress passes.
    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    /// Set the shutdown drain sweep gap.
    pub fn drain_sleep(mut self, d: Duration) -> Self {
        self.drain_sleep = d;
        self
    }

    /// Set the background thread's name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval must be non-zero".into(),
            ));
        }
        if self.drain_sleep.is_zero() {
            return Err(ConfigError::Invalid("drain_sleep must be non-zero".into()));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }
        Ok(())
    }
}
