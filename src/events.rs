// src/events.rs

//! Structured lifecycle events.
//!
//! The per-run state machine produces a [`LifecycleEvent`] at every state
//! transition; the core runtime hands them, in order and synchronously, to an
//! [`EventSink`]. The default sink renders them through `tracing`; tests plug
//! in a recording sink instead.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::dag::{FailureKind, RunId, RunStatus, TaskName};
use crate::engine::TriggerReason;

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    RunStarted {
        run_id: RunId,
        triggered_at: DateTime<Utc>,
        reason: TriggerReason,
    },
    TaskStarted {
        run_id: RunId,
        task: TaskName,
        attempt: u32,
    },
    TaskRetried {
        run_id: RunId,
        task: TaskName,
        failed_attempt: u32,
        delay: Duration,
        error: String,
    },
    TaskFailed {
        run_id: RunId,
        task: TaskName,
        attempts: u32,
        reason: FailureKind,
        error: Option<String>,
    },
    TaskSucceeded {
        run_id: RunId,
        task: TaskName,
        attempts: u32,
        duration: Duration,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// A trigger arrived while the concurrency limit was reached.
    TriggerDropped {
        fired_at: DateTime<Utc>,
        active_runs: usize,
    },
}

impl LifecycleEvent {
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            LifecycleEvent::RunStarted { run_id, .. }
            | LifecycleEvent::TaskStarted { run_id, .. }
            | LifecycleEvent::TaskRetried { run_id, .. }
            | LifecycleEvent::TaskFailed { run_id, .. }
            | LifecycleEvent::TaskSucceeded { run_id, .. }
            | LifecycleEvent::RunFinished { run_id, .. } => Some(*run_id),
            LifecycleEvent::TriggerDropped { .. } => None,
        }
    }

    /// Short stable name, handy for assertions and log filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::RunStarted { .. } => "run_started",
            LifecycleEvent::TaskStarted { .. } => "task_started",
            LifecycleEvent::TaskRetried { .. } => "task_retried",
            LifecycleEvent::TaskFailed { .. } => "task_failed",
            LifecycleEvent::TaskSucceeded { .. } => "task_succeeded",
            LifecycleEvent::RunFinished { .. } => "run_finished",
            LifecycleEvent::TriggerDropped { .. } => "trigger_dropped",
        }
    }
}

/// Consumer of lifecycle events.
///
/// `emit` is called on the runtime's event loop; implementations must not
/// block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

impl<F> EventSink for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn emit(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Default sink: one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::RunStarted {
                run_id,
                triggered_at,
                reason,
            } => {
                info!(run_id, %triggered_at, ?reason, "run started");
            }
            LifecycleEvent::TaskStarted {
                run_id,
                task,
                attempt,
            } => {
                info!(run_id, task = %task, attempt, "task started");
            }
            LifecycleEvent::TaskRetried {
                run_id,
                task,
                failed_attempt,
                delay,
                error,
            } => {
                warn!(
                    run_id,
                    task = %task,
                    failed_attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "task attempt failed; retrying"
                );
            }
            LifecycleEvent::TaskFailed {
                run_id,
                task,
                attempts,
                reason,
                error,
            } => {
                warn!(
                    run_id,
                    task = %task,
                    attempts,
                    ?reason,
                    error = error.as_deref().unwrap_or(""),
                    "task failed"
                );
            }
            LifecycleEvent::TaskSucceeded {
                run_id,
                task,
                attempts,
                duration,
            } => {
                info!(
                    run_id,
                    task = %task,
                    attempts,
                    duration_ms = duration.as_millis() as u64,
                    "task succeeded"
                );
            }
            LifecycleEvent::RunFinished {
                run_id,
                status,
                started_at,
                finished_at,
            } => {
                let elapsed_ms = (*finished_at - *started_at).num_milliseconds();
                match status {
                    RunStatus::Success => info!(run_id, ?status, elapsed_ms, "run finished"),
                    _ => warn!(run_id, ?status, elapsed_ms, "run finished"),
                }
            }
            LifecycleEvent::TriggerDropped {
                fired_at,
                active_runs,
            } => {
                warn!(
                    %fired_at,
                    active_runs,
                    "concurrent run limit reached; dropping trigger"
                );
            }
        }
    }
}

/// Forwards every event to `inner` and remembers how each run finished.
///
/// One-shot commands use it to report on the run they executed rather than
/// on whatever the history holds last.
#[derive(Debug, Default)]
pub struct FinishedRuns<S> {
    inner: S,
    finished: Mutex<Vec<(RunId, RunStatus)>>,
}

impl<S: EventSink> FinishedRuns<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Finished runs in completion order.
    pub fn finished(&self) -> Vec<(RunId, RunStatus)> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<S: EventSink> EventSink for FinishedRuns<S> {
    fn emit(&self, event: &LifecycleEvent) {
        self.inner.emit(event);
        if let LifecycleEvent::RunFinished { run_id, status, .. } = event {
            self.finished
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((*run_id, *status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_runs_forwards_and_keeps_outcomes() {
        let seen = Mutex::new(Vec::new());
        let forward = |e: &LifecycleEvent| seen.lock().unwrap().push(e.kind());
        let sink = FinishedRuns::new(forward);

        let at = DateTime::<Utc>::UNIX_EPOCH;
        sink.emit(&LifecycleEvent::RunStarted {
            run_id: 4,
            triggered_at: at,
            reason: TriggerReason::Manual,
        });
        sink.emit(&LifecycleEvent::RunFinished {
            run_id: 4,
            status: RunStatus::Failed,
            started_at: at,
            finished_at: at,
        });

        assert_eq!(sink.finished(), [(4, RunStatus::Failed)]);
        drop(sink);
        assert_eq!(seen.into_inner().unwrap(), ["run_started", "run_finished"]);
    }
}
