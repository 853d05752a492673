//! Time window used to bound event queries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time range `[start, end)` for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new window. The bounds are swapped if given in reverse.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    /// Window reaching `back` into the past and `ahead` into the future of `now`.
    pub fn around(now: DateTime<Utc>, back: Duration, ahead: Duration) -> Self {
        Self::new(now - back, now + ahead)
    }

    /// Default mirror window: one day back, thirty days ahead.
    pub fn default_from(now: DateTime<Utc>) -> Self {
        Self::around(now, Duration::days(1), Duration::days(30))
    }

    /// Returns true if `instant` falls inside the window.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Returns the window length.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
