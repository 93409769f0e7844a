// src/clock/ticker.rs

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, IntervalSchedule};
use crate::engine::{RuntimeEvent, TriggerReason};

/// Spawn the interval trigger.
///
/// The first fire time is computed from "now", so periods that elapsed
/// before startup never fire (no backfill). After each tick the next fire
/// time is recomputed from `max(fired_at, now)`: if the process stalled past
/// one or more boundaries, those periods are skipped too.
///
/// The ticker stops when the runtime channel closes or the handle is
/// aborted.
pub fn spawn_ticker(
    schedule: IntervalSchedule,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<RuntimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut next = schedule.next_fire_time(clock.now());
        info!(
            first_fire = %next,
            interval = ?schedule.interval(),
            "interval trigger armed"
        );

        loop {
            let now = clock.now();
            if next > now {
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
            }

            let fired_at = next;
            debug!(%fired_at, "clock fired");

            if tx
                .send(RuntimeEvent::Triggered {
                    fired_at,
                    reason: TriggerReason::Schedule,
                })
                .await
                .is_err()
            {
                debug!("runtime channel closed; stopping ticker");
                break;
            }

            let now = clock.now();
            next = schedule.next_fire_time(fired_at.max(now));

            let expected = schedule.next_fire_time(fired_at);
            if next != expected {
                warn!(
                    skipped_from = %expected,
                    resume_at = %next,
                    "missed trigger periods; not backfilling"
                );
            }
        }
    })
}
