//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
///
/// Every field has a default, so a partial JSON document is a valid config:
///
/// ```rust,ignore
/// let config = RuntimeConfig::from_json_str(r#"{ "strict_tracking": true }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Report a `TrackingViolation` for every `read()` made outside a
    /// consumer. The read itself still succeeds.
    pub strict_tracking: bool,

    /// Catch panics in task bodies and render functions and report them as
    /// task failures instead of unwinding through the scheduler.
    pub catch_panics: bool,

    /// Upper bound on the ticks a single `settle()` drives.
    pub max_ticks: usize,

    /// How long the async driver waits after a wake-up before settling.
    pub driver_debounce_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict_tracking: false,
            catch_panics: true,
            max_ticks: 64,
            driver_debounce_ms: 4,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ReactiveError> {
        serde_json::from_str(json).map_err(|err| ReactiveError::Config(err.to_string()))
    }

    pub fn strict_tracking(mut self, strict: bool) -> Self {
        self.strict_tracking = strict;
        self
    }

    pub fn catch_panics(mut self, catch: bool) -> Self {
        self.catch_panics = catch;
        self
    }

    pub fn max_ticks(mut self, ticks: usize) -> Self {
        self.max_ticks = ticks.max(1);
        self
    }

    pub fn driver_debounce(mut self, debounce: Duration) -> Self {
        self.driver_debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.driver_debounce_ms)
    }
}
