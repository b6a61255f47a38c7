//! Orchestrator configuration

use crate::error::ConfigError;
use crate::scheduler::POLL_FLOOR;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Default poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Shortest accepted poll interval; shorter requests are clamped up
    pub min_poll_interval_ms: u64,
    /// Longest accepted poll interval
    pub max_poll_interval_ms: u64,
    /// Seconds a session may stay non-terminal before a stall warning
    pub stall_after_secs: u64,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML document and validate
    ///
    /// # Errors
    /// [`ConfigError`] on malformed TOML or inconsistent values
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// With default poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// With accepted poll interval bounds
    #[inline]
    #[must_use]
    pub fn with_poll_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_poll_interval_ms = duration_ms(min);
        self.max_poll_interval_ms = duration_ms(max);
        self
    }

    /// With stall threshold
    #[inline]
    #[must_use]
    pub fn with_stall_after(mut self, after: Duration) -> Self {
        self.stall_after_secs = after.as_secs();
        self
    }

    /// With event channel capacity
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check value consistency
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_poll_interval_ms < duration_ms(POLL_FLOOR) {
            return Err(ConfigError::Invalid {
                field: "min_poll_interval_ms",
                reason: format!(
                    "{} is below the {} ms floor",
                    self.min_poll_interval_ms,
                    duration_ms(POLL_FLOOR)
                ),
            });
        }
        if self.min_poll_interval_ms > self.max_poll_interval_ms {
            return Err(ConfigError::Invalid {
                field: "max_poll_interval_ms",
                reason: format!(
                    "{} is below min_poll_interval_ms {}",
                    self.max_poll_interval_ms, self.min_poll_interval_ms
                ),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "event_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Default poll interval, clamped into bounds
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.clamp_interval(Duration::from_millis(self.poll_interval_ms))
    }

    /// Lower bound for poll intervals
    #[inline]
    #[must_use]
    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    /// Upper bound for poll intervals
    #[inline]
    #[must_use]
    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms.max(self.min_poll_interval_ms))
    }

    /// Clamp a requested interval into the accepted range
    #[inline]
    #[must_use]
    pub fn clamp_interval(&self, requested: Duration) -> Duration {
        requested.clamp(self.min_poll_interval(), self.max_poll_interval())
    }

    /// Stall threshold
    #[inline]
    #[must_use]
    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_after_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            min_poll_interval_ms: 1_000,
            max_poll_interval_ms: 5_000,
            stall_after_secs: 600,
            event_capacity: 256,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
