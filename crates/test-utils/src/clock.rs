use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use pipetick::clock::Clock;
use tokio::time::Instant;

/// Wall clock that follows Tokio's (possibly paused) virtual time.
///
/// `now()` is `anchor + elapsed virtual time since creation`, so with
/// `#[tokio::test(start_paused = true)]` sleeps and timestamps agree.
/// Must be created inside a Tokio runtime. Clones share the same skew, so
/// a test can keep one to [`jump`](Self::jump) the wall clock.
#[derive(Debug, Clone)]
pub struct PausedClock {
    anchor: DateTime<Utc>,
    base: Instant,
    skew: Arc<Mutex<TimeDelta>>,
}

impl PausedClock {
    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            base: Instant::now(),
            skew: Arc::new(Mutex::new(TimeDelta::zero())),
        }
    }

    /// Move wall time forward without moving Tokio time, as a suspended
    /// host or a stalled process would.
    pub fn jump(&self, by: std::time::Duration) {
        *self.skew.lock().unwrap() += TimeDelta::from_std(by).expect("duration in range");
    }

    /// Anchor given as RFC 3339 text.
    pub fn at(anchor: &str) -> Self {
        let anchor = DateTime::parse_from_rfc3339(anchor)
            .expect("valid RFC 3339 anchor")
            .with_timezone(&Utc);
        Self::starting_at(anchor)
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.base.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
        self.anchor + elapsed + *self.skew.lock().unwrap()
    }
}

/// Clock that only moves when told to. For driving the pure core.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += TimeDelta::from_std(by).expect("duration in range");
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
