//! Wall-clock milliseconds that advance with tokio's timer.
//!
//! Persisted deadlines need wall-clock time, while the scheduler sleeps on
//! tokio timers. Anchoring one to the other keeps both views consistent,
//! including under a paused test runtime.

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_ms: i64,
    base: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp_millis())
    }

    /// A clock whose current time is `base_ms` milliseconds since the epoch.
    pub fn starting_at(base_ms: i64) -> Self {
        Self {
            base_ms,
            base: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.base.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.base_ms.saturating_add(elapsed)
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
