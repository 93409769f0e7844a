// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::{
    RetryRequest, RunId, RunRecord, RunScheduler, ScheduledAttempt, SchedulerStep, TaskRegistry,
};
use crate::engine::admission::{Admission, AdmissionPolicy};
use crate::engine::{AttemptResult, TaskName, TriggerReason};
use crate::events::{EventSink, LifecycleEvent};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these attempts to the executor.
    Dispatch(Vec<ScheduledAttempt>),
    /// Start a timer; when it fires, feed `RetryDue` back into the core.
    ScheduleRetry(RetryRequest),
    /// Drop every in-flight attempt of this run without reporting back.
    AbortRun(RunId),
    /// Persist a finalized run.
    RecordRun(RunRecord),
    /// Request that the process exits (used for `--once` when idle).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn continue_with(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    /// Attempts dispatched by this step, flattened.
    pub fn dispatched(&self) -> Vec<&ScheduledAttempt> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Dispatch(attempts) => Some(attempts.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Runs finalized by this step.
    pub fn recorded(&self) -> Vec<&RunRecord> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::RecordRun(record) => Some(record),
                _ => None,
            })
            .collect()
    }
}

/// In-flight runs keyed by id, plus the id allocator.
///
/// Ids are handed out monotonically and never reused, including for
/// triggers that were dropped by admission (those don't consume an id).
#[derive(Debug)]
pub struct ActiveRuns {
    registry: Arc<TaskRegistry>,
    runs: BTreeMap<RunId, RunScheduler>,
    next_run_id: RunId,
}

impl ActiveRuns {
    pub fn new(registry: Arc<TaskRegistry>, first_run_id: RunId) -> Self {
        Self {
            registry,
            runs: BTreeMap::new(),
            next_run_id: first_run_id.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn get(&self, run_id: RunId) -> Option<&RunScheduler> {
        self.runs.get(&run_id)
    }

    pub fn ids(&self) -> Vec<RunId> {
        self.runs.keys().copied().collect()
    }

    pub fn next_run_id(&self) -> RunId {
        self.next_run_id
    }

    fn allocate_id(&mut self) -> RunId {
        let id = self.next_run_id;
        self.next_run_id += 1;
        id
    }
}

/// Handle a trigger: admit a new run or drop the trigger.
pub fn handle_trigger(
    runs: &mut ActiveRuns,
    admission: &AdmissionPolicy,
    sink: &dyn EventSink,
    fired_at: DateTime<Utc>,
    reason: TriggerReason,
    now: DateTime<Utc>,
) -> CoreStep {
    let mut commands = Vec::new();

    if let Admission::Drop { active } = admission.check(runs.len()) {
        sink.emit(&LifecycleEvent::TriggerDropped {
            fired_at,
            active_runs: active,
        });
        return CoreStep::continue_with(commands);
    }

    let run_id = runs.allocate_id();
    let (scheduler, step) =
        RunScheduler::start(Arc::clone(&runs.registry), run_id, fired_at, reason, now);
    runs.runs.insert(run_id, scheduler);

    apply_step(runs, sink, run_id, step, now, &mut commands);
    CoreStep::continue_with(commands)
}

/// Handle the result of one attempt.
pub fn handle_attempt_finished(
    runs: &mut ActiveRuns,
    sink: &dyn EventSink,
    run_id: RunId,
    task: TaskName,
    attempt: u32,
    result: AttemptResult,
    now: DateTime<Utc>,
) -> CoreStep {
    let mut commands = Vec::new();

    let Some(scheduler) = runs.runs.get_mut(&run_id) else {
        warn!(run_id, task = %task, attempt, "attempt result for a run that is not active; ignoring");
        return CoreStep::continue_with(commands);
    };

    let step = scheduler.step_attempt_finished(&task, attempt, &result, now);
    apply_step(runs, sink, run_id, step, now, &mut commands);
    CoreStep::continue_with(commands)
}

/// Handle an elapsed retry delay.
pub fn handle_retry_due(
    runs: &mut ActiveRuns,
    sink: &dyn EventSink,
    run_id: RunId,
    task: TaskName,
    attempt: u32,
    now: DateTime<Utc>,
) -> CoreStep {
    let mut commands = Vec::new();

    let Some(scheduler) = runs.runs.get_mut(&run_id) else {
        debug!(run_id, task = %task, "retry timer fired for a finished run; ignoring");
        return CoreStep::continue_with(commands);
    };

    let step = scheduler.step_retry_due(&task, attempt);
    apply_step(runs, sink, run_id, step, now, &mut commands);
    CoreStep::continue_with(commands)
}

/// Cancel a single run.
pub fn handle_cancel(
    runs: &mut ActiveRuns,
    sink: &dyn EventSink,
    run_id: RunId,
    now: DateTime<Utc>,
) -> CoreStep {
    let mut commands = Vec::new();
    cancel_run(runs, sink, run_id, now, &mut commands);
    CoreStep::continue_with(commands)
}

/// Cancel every in-flight run and stop.
pub fn handle_shutdown(
    runs: &mut ActiveRuns,
    sink: &dyn EventSink,
    now: DateTime<Utc>,
) -> CoreStep {
    let mut commands = Vec::new();

    let ids = runs.ids();
    if !ids.is_empty() {
        info!(runs = ?ids, "shutdown requested; cancelling in-flight runs");
    }
    for run_id in ids {
        cancel_run(runs, sink, run_id, now, &mut commands);
    }

    commands.push(CoreCommand::RequestExit);
    CoreStep {
        commands,
        keep_running: false,
    }
}

fn cancel_run(
    runs: &mut ActiveRuns,
    sink: &dyn EventSink,
    run_id: RunId,
    now: DateTime<Utc>,
    commands: &mut Vec<CoreCommand>,
) {
    let Some(scheduler) = runs.runs.get_mut(&run_id) else {
        warn!(run_id, "cancel requested for a run that is not active; ignoring");
        return;
    };

    let step = scheduler.step_cancel();
    commands.push(CoreCommand::AbortRun(run_id));
    apply_step(runs, sink, run_id, step, now, commands);
}

/// Emit the step's events in order and translate it into commands.
/// Finalizes the run when the step says it is done.
fn apply_step(
    runs: &mut ActiveRuns,
    sink: &dyn EventSink,
    run_id: RunId,
    step: SchedulerStep,
    now: DateTime<Utc>,
    commands: &mut Vec<CoreCommand>,
) {
    for event in &step.events {
        sink.emit(event);
    }

    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::Dispatch(step.newly_scheduled));
    }
    commands.extend(step.retries.into_iter().map(CoreCommand::ScheduleRetry));

    if step.run_just_finished {
        if let Some(scheduler) = runs.runs.remove(&run_id) {
            let (record, finished) = scheduler.finalize(now);
            sink.emit(&finished);
            commands.push(CoreCommand::RecordRun(record));
        }
    }
}
