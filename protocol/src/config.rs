//! # Lifecycle Configuration & Constants
//!
//! Every magic number of the lifecycle pipeline lives here. The indexing
//! timeout in particular exists in exactly one place: [`LifecycleConfig`].
//! If you find yourself typing `Duration::from_secs(…)` in the coordinator,
//! stop and add a field instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Secret Formats
// ---------------------------------------------------------------------------

/// PINs are exactly six ASCII digits. Not five, not "123 456".
pub const PIN_LENGTH: usize = 6;

/// Time-based one-time codes, same shape as a PIN.
pub const OTP_LENGTH: usize = 6;

/// Shortest recovery code we accept once `-` separators are stripped.
pub const RECOVERY_CODE_MIN_LENGTH: usize = 8;

/// Longest recovery code we accept once `-` separators are stripped.
pub const RECOVERY_CODE_MAX_LENGTH: usize = 32;

/// Separator allowed between groups of a recovery code (`abcd-efgh`).
pub const RECOVERY_CODE_SEPARATOR: char = '-';

// ---------------------------------------------------------------------------
// Indexing Wait
// ---------------------------------------------------------------------------

/// How long we wait for the indexer after the ledger confirms. Thirty
/// seconds is fifteen blocks at a 2s block time; an indexer further behind
/// than that is having a bad day and the caller should hear about it.
pub const DEFAULT_INDEXING_TIMEOUT: Duration = Duration::from_secs(30);

/// Base delay between two index polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound of the random delay added to each poll so a burst of
/// lifecycles doesn't hammer the indexer in lockstep.
pub const DEFAULT_POLL_JITTER: Duration = Duration::from_millis(100);

/// Anything faster than this is a busy-loop with extra steps.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// LifecycleConfig
// ---------------------------------------------------------------------------

/// Errors raised by [`LifecycleConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The poll interval is below [`MIN_POLL_INTERVAL`].
    #[error("poll interval {got_ms}ms is below the minimum of {min_ms}ms")]
    PollIntervalTooShort {
        /// Configured interval.
        got_ms: u64,
        /// Smallest accepted interval.
        min_ms: u64,
    },

    /// A zero indexing timeout would report every lifecycle as partially indexed.
    #[error("indexing timeout must be greater than zero")]
    ZeroIndexingTimeout,

    /// Jitter larger than the interval itself defeats the point of an interval.
    #[error("poll jitter {jitter_ms}ms exceeds poll interval {interval_ms}ms")]
    JitterExceedsInterval {
        /// Configured jitter.
        jitter_ms: u64,
        /// Configured interval.
        interval_ms: u64,
    },
}

/// Tunable parameters for the lifecycle pipeline.
///
/// Stored as milliseconds so the struct round-trips through JSON and
/// environment variables without a duration parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Default deadline for the indexing wait, used when the caller does not
    /// pass an explicit timeout.
    pub indexing_timeout_ms: u64,

    /// Base delay between index polls.
    pub poll_interval_ms: u64,

    /// Maximum random delay added on top of `poll_interval_ms`. Zero gives a
    /// fixed cadence, which is what tests want.
    pub poll_jitter_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            indexing_timeout_ms: DEFAULT_INDEXING_TIMEOUT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            poll_jitter_ms: DEFAULT_POLL_JITTER.as_millis() as u64,
        }
    }
}

impl LifecycleConfig {
    /// Indexing deadline as a [`Duration`].
    pub fn indexing_timeout(&self) -> Duration {
        Duration::from_millis(self.indexing_timeout_ms)
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Poll jitter as a [`Duration`].
    pub fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }

    /// Replace the indexing timeout.
    pub fn with_indexing_timeout(mut self, timeout: Duration) -> Self {
        self.indexing_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Replace the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Replace the poll jitter.
    pub fn with_poll_jitter(mut self, jitter: Duration) -> Self {
        self.poll_jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Check the configuration for values that would make the waiter
    /// misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min_ms = MIN_POLL_INTERVAL.as_millis() as u64;
        if self.poll_interval_ms < min_ms {
            return Err(ConfigError::PollIntervalTooShort {
                got_ms: self.poll_interval_ms,
                min_ms,
            });
        }
        if self.indexing_timeout_ms == 0 {
            return Err(ConfigError::ZeroIndexingTimeout);
        }
        if self.poll_jitter_ms > self.poll_interval_ms {
            return Err(ConfigError::JitterExceedsInterval {
                jitter_ms: self.poll_jitter_ms,
                interval_ms: self.poll_interval_ms,
            });
        }
        Ok(())
    }
}
