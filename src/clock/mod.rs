// src/clock/mod.rs

//! Time sources and the interval trigger.
//!
//! - [`schedule`] holds the pure fire-time arithmetic.
//! - [`ticker`] turns a schedule into `RuntimeEvent::Triggered` events.

use std::fmt::Debug;

use chrono::{DateTime, Utc};

pub mod schedule;
pub mod ticker;

pub use schedule::IntervalSchedule;
pub use ticker::spawn_ticker;

/// Wall-clock source. Every timestamp the coordinator records comes from
/// here, so tests can substitute a deterministic clock.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
