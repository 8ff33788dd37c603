//! Retry policy: decides how many transient failures are retried and how long to back off.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Base delay; retry `n` waits `base_delay * 2^n`.
    #[serde(with = "secs_f64")]
    pub base_delay: Duration,

    /// Upper bound on a single backoff.
    #[serde(with = "secs_f64")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before retry number `retry` (1-indexed): `min(max_delay, base_delay * 2^retry)`.
    ///
    /// With the defaults (0.5s base, 10s cap):
    /// - retry 1: 1s
    /// - retry 2: 2s
    /// - retry 3: 4s
    /// - retry 4: 8s
    /// - retry 5+: 10s
    pub fn backoff(&self, retry: u32) -> Duration {
        // 2^31 * anything already blows past any sane cap
        let factor = 2f64.powi(retry.min(31) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Is there a retry left after `retry` transient failures?
    pub fn allows(&self, retry: u32) -> bool {
        retry <= self.max_retries
    }
}

pub(crate) mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
