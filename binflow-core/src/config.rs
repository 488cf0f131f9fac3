//! Tunables for the engine, loadable from JSON.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Engine settings. Missing fields fall back to [`EngineConfig::default`].
pub struct EngineConfig {
    /// Age of the last emptying after which a FULL bin is swept to OVERDUE.
    pub overdue_threshold_hours: i64,
    /// Planned minutes per route stop.
    pub minutes_per_stop: i64,
    /// Seconds between simulator ticks.
    pub simulator_interval_secs: u64,
    /// Seed for the simulator's randomness; entropy when absent.
    pub simulator_seed: Option<u64>,
    /// Read-modify-write attempts before giving up on a contended record.
    pub max_write_attempts: u32,
    /// Attempts for a resident disposal submission.
    pub disposal_retry_attempts: u32,
    /// Base backoff between disposal attempts; grows linearly.
    pub disposal_retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            overdue_threshold_hours: 48,
            minutes_per_stop: 15,
            simulator_interval_secs: 30,
            simulator_seed: None,
            max_write_attempts: 5,
            disposal_retry_attempts: 3,
            disposal_retry_backoff_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] for malformed input.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Overdue window as a duration.
    #[must_use]
    pub fn overdue_threshold(&self) -> Duration {
        Duration::hours(self.overdue_threshold_hours)
    }

    /// Simulator period.
    #[must_use]
    pub fn simulator_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.simulator_interval_secs)
    }

    /// Base disposal backoff.
    #[must_use]
    pub fn disposal_backoff(&self) -> StdDuration {
        StdDuration::from_millis(self.disposal_retry_backoff_ms)
    }
}
