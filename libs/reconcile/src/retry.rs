//! Per-key exponential backoff.

use std::collections::BTreeMap;
use std::time::Duration;

/// Default delay after the first failure.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Default delay cap.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5 * 60); // 5 minutes

/// Failure counter per key with exponentially growing delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,

    /// Tracked failures: key -> consecutive failure count.
    failures: BTreeMap<String, u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before the
    /// next attempt.
    pub fn next_delay(&mut self, key: &str) -> Duration {
        let count = self.failures.entry(key.to_string()).or_insert(0);
        let exponent = (*count).min(31);
        *count = count.saturating_add(1);

        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Clear failure tracking for `key` (on success).
    pub fn reset(&mut self, key: &str) {
        self.failures.remove(key);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}
