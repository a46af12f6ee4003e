//! Scheduler configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a drain does when a queued call fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure, count it, and keep executing the batch.
    #[default]
    Isolate,

    /// Stop the tick at the first failure. The rest of the drained batch is
    /// discarded and tick listeners do not fire. Queues not yet visited keep
    /// their calls, and a new tick is scheduled for them.
    Abort,
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Re-arm a pending tick on every new call instead of keeping the first
    #[serde(default = "default_debounce")]
    pub debounce: bool,

    /// Bypass queuing entirely: wrapping returns the target unchanged
    #[serde(default)]
    pub disabled: bool,

    /// Delay in milliseconds requested from the host for each tick
    #[serde(default)]
    pub quiet_period_ms: u64,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_debounce() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            disabled: false,
            quiet_period_ms: 0,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Config {
    /// Get the quiet period as a Duration
    #[must_use]
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}
