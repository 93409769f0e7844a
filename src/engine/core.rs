// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state (the set of in-flight runs)
//! - lifecycle events, emitted synchronously to the [`EventSink`]
//! - a list of commands describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledAttempt`s to the executor
//! - retry timers and the run history store
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use std::fmt;
use std::sync::Arc;

use crate::clock::Clock;
use crate::dag::{RunId, RunScheduler, TaskRegistry};
use crate::engine::admission::AdmissionPolicy;
use crate::engine::event_handlers::{
    handle_attempt_finished, handle_cancel, handle_retry_due, handle_shutdown, handle_trigger,
    ActiveRuns, CoreCommand, CoreStep,
};
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::events::EventSink;

/// Pure core runtime state.
///
/// This owns:
/// - the in-flight runs and the run id counter
/// - the admission policy (`max_concurrent_runs`)
/// - runtime options (e.g. `exit_when_idle`)
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
pub struct CoreRuntime {
    runs: ActiveRuns,
    admission: AdmissionPolicy,
    options: RuntimeOptions,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("runs", &self.runs)
            .field("admission", &self.admission)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CoreRuntime {
    /// `first_run_id` lets a restarted process continue after the ids
    /// already present in the history store.
    pub fn new(
        registry: Arc<TaskRegistry>,
        options: RuntimeOptions,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        first_run_id: RunId,
    ) -> Self {
        Self {
            runs: ActiveRuns::new(registry, first_run_id),
            admission: AdmissionPolicy::new(options.max_concurrent_runs),
            options,
            clock,
            sink,
        }
    }

    /// True when no run is in flight.
    pub fn is_idle(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn active_run_ids(&self) -> Vec<RunId> {
        self.runs.ids()
    }

    pub fn run(&self, run_id: RunId) -> Option<&RunScheduler> {
        self.runs.get(run_id)
    }

    pub fn next_run_id(&self) -> RunId {
        self.runs.next_run_id()
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let now = self.clock.now();
        let sink = self.sink.as_ref();

        let mut step = match event {
            RuntimeEvent::Triggered { fired_at, reason } => {
                handle_trigger(&mut self.runs, &self.admission, sink, fired_at, reason, now)
            }
            RuntimeEvent::AttemptFinished {
                run_id,
                task,
                attempt,
                result,
            } => handle_attempt_finished(&mut self.runs, sink, run_id, task, attempt, result, now),
            RuntimeEvent::RetryDue {
                run_id,
                task,
                attempt,
            } => handle_retry_due(&mut self.runs, sink, run_id, task, attempt, now),
            RuntimeEvent::CancelRun { run_id } => handle_cancel(&mut self.runs, sink, run_id, now),
            RuntimeEvent::ShutdownRequested => {
                return handle_shutdown(&mut self.runs, sink, now);
            }
        };

        // In `--once` mode, exit as soon as nothing is in flight.
        if self.options.exit_when_idle && self.runs.is_empty() {
            step.keep_running = false;
            step.commands.push(CoreCommand::RequestExit);
        }

        step
    }
}
