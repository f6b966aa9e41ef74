//! # Poll Interval
//!
//! The poll cadence a session may run at. Only the values offered by the
//! interval selector exist; anything else is a `ConfigError` raised before a
//! timer is armed.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Rejected scheduling input. Raised before any timer is started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll interval must be 1, 3 or 5 seconds, got {0}")]
    InvalidInterval(u64),
}

/// Poll cadence. Only the three values offered by the interval selector exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u64")]
pub struct PollInterval(u64);

impl PollInterval {
    pub const ALLOWED: [u64; 3] = [1, 3, 5];
    pub const FAST: PollInterval = PollInterval(1);
    pub const NORMAL: PollInterval = PollInterval(3);
    pub const SLOW: PollInterval = PollInterval(5);

    pub fn seconds(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Selector label.
    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "Fast (1 second)",
            5 => "Slow (5 seconds)",
            _ => "Normal (3 seconds)",
        }
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        PollInterval::NORMAL
    }
}

impl TryFrom<u64> for PollInterval {
    type Error = ConfigError;

    fn try_from(seconds: u64) -> Result<Self, Self::Error> {
        if Self::ALLOWED.contains(&seconds) {
            Ok(PollInterval(seconds))
        } else {
            Err(ConfigError::InvalidInterval(seconds))
        }
    }
}

impl From<PollInterval> for u64 {
    fn from(interval: PollInterval) -> Self {
        interval.0
    }
}

impl fmt::Display for PollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
