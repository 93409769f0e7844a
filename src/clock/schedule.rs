// src/clock/schedule.rs

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::errors::{PipetickError, Result};

/// Longest accepted interval. Keeps fire-time arithmetic far away from the
/// limits of `DateTime<Utc>`.
pub const MAX_INTERVAL: Duration = Duration::from_secs(100 * 366 * 24 * 60 * 60);

/// Fixed-period trigger anchored at `start`.
///
/// Fire times are `start + k * interval` for `k >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSchedule {
    start: DateTime<Utc>,
    interval: TimeDelta,
}

impl IntervalSchedule {
    pub fn new(start: DateTime<Utc>, interval: Duration) -> Result<Self> {
        if interval > MAX_INTERVAL {
            return Err(PipetickError::ConfigError(format!(
                "schedule interval {interval:?} is longer than 100 years"
            )));
        }
        let interval = TimeDelta::from_std(interval)
            .map_err(|e| PipetickError::ConfigError(format!("schedule interval out of range: {e}")))?;
        if interval <= TimeDelta::zero() {
            return Err(PipetickError::ConfigError(
                "schedule interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self { start, interval })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn interval(&self) -> Duration {
        // Positive by construction.
        self.interval.to_std().unwrap_or_default()
    }

    /// The first fire time strictly after `after` (or `start` itself if
    /// `after` precedes it).
    pub fn next_fire_time(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        if after < self.start {
            return self.start;
        }

        let step = self.interval.num_milliseconds().max(1);
        let elapsed = (after - self.start).num_milliseconds();
        let periods = elapsed / step + 1;

        // Only reachable for timestamps near the end of chrono's range.
        periods
            .checked_mul(step)
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|offset| self.start.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
