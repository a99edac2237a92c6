// ── Runtime configuration ──
//
// These types describe how the engine behaves at run time. They never
// touch disk: `mealgate-config` reads files and environment and hands
// finished values in.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

/// Bounded retry with exponential backoff, used by gate status polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per cycle, including the first. Never below 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No retries: one attempt per cycle.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Gate supervision tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Interval between status polls. Zero disables background polling.
    pub poll_interval: Duration,
    /// Upper bound for one driver round-trip.
    pub command_timeout: Duration,
    /// Failed poll cycles in a row before a gate is reported OFFLINE.
    pub offline_after_failures: u32,
    pub retry: RetryPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            command_timeout: Duration::from_secs(3),
            offline_after_failures: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Open the restaurant's gate after an allowed scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoOpen {
    /// Auto-reclose hint passed to the device.
    pub duration_secs: u16,
}

/// Scan pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Bound on decode, lookup, validation and ledger commit together.
    pub scan_timeout: Duration,
    /// Offset used for "now" and for meal window times.
    pub venue_offset: FixedOffset,
    pub max_conflict_retries: u32,
    pub auto_open: Option<AutoOpen>,
    /// Localized texts keyed by error code name, or `ALLOW`.
    pub localized_messages: HashMap<String, String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(2),
            venue_offset: Utc.fix(),
            max_conflict_retries: 5,
            auto_open: None,
            localized_messages: HashMap::new(),
        }
    }
}
