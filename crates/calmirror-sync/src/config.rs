//! Sync and health monitor configuration.

use std::time::Duration;

use calmirror_core::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fetch, cache and credential storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long fetched data counts as fresh.
    #[serde(with = "secs")]
    pub cache_ttl: Duration,

    /// Minimum spacing between unforced network fetches of one kind.
    #[serde(with = "secs")]
    pub rate_limit_window: Duration,

    /// Quota retries before giving up.
    pub max_retries: u32,

    /// First quota backoff; doubles on each retry.
    #[serde(with = "secs")]
    pub backoff_base: Duration,

    /// Credential write attempts.
    pub store_attempts: u32,

    /// Delay unit between credential write attempts.
    #[serde(with = "millis")]
    pub store_retry_delay: Duration,

    /// Days of past events to mirror.
    pub window_past_days: u32,

    /// Days of future events to mirror.
    pub window_future_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300), // 5 minutes
            rate_limit_window: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            store_attempts: 3,
            store_retry_delay: Duration::from_millis(100),
            window_past_days: 1,
            window_future_days: 30,
        }
    }
}

impl SyncConfig {
    /// Builder: set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Builder: set the rate-limit window.
    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    /// Builder: set quota retry parameters.
    pub fn with_backoff(mut self, base: Duration, max_retries: u32) -> Self {
        self.backoff_base = base;
        self.max_retries = max_retries;
        self
    }

    /// Builder: set credential write retry parameters.
    pub fn with_store_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.store_attempts = attempts.max(1);
        self.store_retry_delay = delay;
        self
    }

    /// Builder: set the mirrored event window.
    pub fn with_window_days(mut self, past: u32, future: u32) -> Self {
        self.window_past_days = past;
        self.window_future_days = future;
        self
    }

    /// Event window around `now`.
    pub fn event_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::around(
            now,
            chrono::Duration::days(i64::from(self.window_past_days)),
            chrono::Duration::days(i64::from(self.window_future_days)),
        )
    }

    /// Backoff before quota retry number `retry` (0-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between probes.
    #[serde(with = "secs")]
    pub probe_interval: Duration,

    /// Consecutive failures before a recovery is scheduled.
    pub failure_threshold: u32,

    /// Delay between scheduling and running a recovery.
    #[serde(with = "secs")]
    pub recovery_delay: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(300),
            failure_threshold: 3,
            recovery_delay: Duration::from_secs(30),
        }
    }
}

impl HealthConfig {
    /// Builder: set the probe interval.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Builder: set the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder: set the recovery delay.
    pub fn with_recovery_delay(mut self, delay: Duration) -> Self {
        self.recovery_delay = delay;
        self
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
