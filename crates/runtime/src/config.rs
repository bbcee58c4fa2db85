//! Runtime configuration
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TESSEL_POLL_MS` | `100` | Upper bound (ms) of the event loop's idle wait |
//! | `TESSEL_DIAGNOSTICS` | off | `1`/`true`/`on` installs the SIGQUIT diagnostics dump |
//!
//! ## Example
//!
//! ```bash
//! # Wake at least every 20ms and dump diagnostics on kill -3
//! TESSEL_POLL_MS=20 TESSEL_DIAGNOSTICS=1 ./host
//! ```

use std::time::Duration;

const DEFAULT_POLL_MS: u64 = 100;

/// Event loop configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Longest the interpreter thread sleeps waiting for a wakeup
    pub poll_ms: u64,
    /// Install the SIGQUIT diagnostics handler when the loop starts
    pub diagnostics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_ms: DEFAULT_POLL_MS,
            diagnostics: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let poll_ms = std::env::var("TESSEL_POLL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_POLL_MS);

        let diagnostics = std::env::var("TESSEL_DIAGNOSTICS")
            .ok()
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "on"))
            .unwrap_or(false);

        Self {
            poll_ms,
            diagnostics,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}
