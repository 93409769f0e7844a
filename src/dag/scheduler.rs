use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::execution::{FailureKind, TaskExecution, TaskStatus};
use crate::dag::registry::TaskRegistry;
use crate::dag::run::{Run, RunId, RunRecord, RunStatus};
use crate::dag::scheduler_step::{RetryRequest, ScheduledAttempt, SchedulerStep};
use crate::dag::state_manager::StateManager;
use crate::engine::{AttemptResult, TriggerReason};
use crate::events::LifecycleEvent;

/// State machine for a single run.
///
/// It is responsible for:
/// - deciding when a task is ready to run (all dependencies succeeded)
/// - recording attempt outcomes and asking for retries while budget remains
/// - skipping everything downstream of a task that exhausted its retries
/// - cancelling unfinished tasks on request
/// - producing the final [`RunRecord`]
///
/// It performs no IO and never reads the clock: callers pass `now`.
#[derive(Debug)]
pub struct RunScheduler {
    registry: Arc<TaskRegistry>,
    run: Run,
    /// Indexed like `registry.topological_order()`.
    executions: Vec<TaskExecution>,
}

impl RunScheduler {
    /// Create a run in `Pending`, move it to `Running` and schedule its roots.
    pub fn start(
        registry: Arc<TaskRegistry>,
        run_id: RunId,
        triggered_at: DateTime<Utc>,
        reason: TriggerReason,
        now: DateTime<Utc>,
    ) -> (Self, SchedulerStep) {
        let executions = registry
            .topological_order()
            .iter()
            .map(|task| TaskExecution::pending(run_id, task.name.clone()))
            .collect();

        let mut scheduler = Self {
            registry,
            run: Run {
                id: run_id,
                triggered_at,
                reason,
                status: RunStatus::Pending,
                started_at: now,
                finished_at: None,
            },
            executions,
        };

        scheduler.run.status = RunStatus::Running;
        debug!(run_id, %triggered_at, "scheduler: starting new DAG run");

        let mut step = SchedulerStep::default();
        step.events.push(LifecycleEvent::RunStarted {
            run_id,
            triggered_at,
            reason,
        });

        let mut manager = scheduler.manager();
        step.newly_scheduled = manager.collect_new_ready_tasks(now, &mut step.events);
        step.run_just_finished = manager.all_tasks_terminal();

        (scheduler, step)
    }

    pub fn run_id(&self) -> RunId {
        self.run.id
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn executions(&self) -> &[TaskExecution] {
        &self.executions
    }

    pub fn execution(&self, task: &str) -> Option<&TaskExecution> {
        self.registry
            .position(task)
            .map(|pos| &self.executions[pos])
    }

    pub fn status_of(&self, task: &str) -> Option<&TaskStatus> {
        self.execution(task).map(|e| &e.status)
    }

    /// True once every task execution is terminal.
    pub fn is_finished(&self) -> bool {
        self.executions.iter().all(|e| e.status.is_terminal())
    }

    /// Record the result of attempt `attempt` of `task`.
    ///
    /// Results that don't match the current attempt of a `Running` task are
    /// stale (e.g. from a cancelled run) and are ignored.
    pub fn step_attempt_finished(
        &mut self,
        task: &str,
        attempt: u32,
        result: &AttemptResult,
        now: DateTime<Utc>,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let run_id = self.run.id;

        let Some(pos) = self.registry.position(task) else {
            warn!(task = %task, run_id, "completion for unknown task; ignoring");
            return step;
        };

        let descriptor = &self.registry.topological_order()[pos];
        let exec = &mut self.executions[pos];

        if exec.status != TaskStatus::Running || exec.attempts != attempt {
            warn!(
                task = %task,
                run_id,
                attempt,
                current_attempt = exec.attempts,
                status = ?exec.status,
                "stale attempt result; ignoring"
            );
            return step;
        }

        exec.duration = Some(result.duration);

        if result.outcome.is_success() {
            exec.status = TaskStatus::Success;
            exec.error = None;
            debug!(task = %task, run_id, attempt, "task completed successfully");

            step.events.push(LifecycleEvent::TaskSucceeded {
                run_id,
                task: task.to_string(),
                attempts: attempt,
                duration: result.duration,
            });

            let mut manager = self.manager();
            step.newly_scheduled = manager.collect_new_ready_tasks(now, &mut step.events);
        } else if attempt < descriptor.max_attempts() {
            exec.status = TaskStatus::Retrying;
            exec.error = Some(result.describe());

            step.events.push(LifecycleEvent::TaskRetried {
                run_id,
                task: task.to_string(),
                failed_attempt: attempt,
                delay: descriptor.retry_delay,
                error: result.describe(),
            });
            step.retries.push(RetryRequest {
                run_id,
                task: task.to_string(),
                attempt: attempt + 1,
                delay: descriptor.retry_delay,
            });
        } else {
            exec.status = TaskStatus::Failed(FailureKind::Exhausted);
            exec.error = Some(result.describe());

            warn!(
                task = %task,
                run_id,
                attempts = attempt,
                "task exhausted its retries; skipping dependents in this run"
            );

            step.events.push(LifecycleEvent::TaskFailed {
                run_id,
                task: task.to_string(),
                attempts: attempt,
                reason: FailureKind::Exhausted,
                error: exec.error.clone(),
            });
            step.newly_failed.push(task.to_string());

            let mut manager = self.manager();
            let mut skipped = manager.mark_dependents_skipped(task, &mut step.events);
            step.newly_failed.append(&mut skipped);
        }

        step.run_just_finished = self.is_finished();
        step
    }

    /// The retry delay for `task` elapsed: start attempt `attempt`.
    pub fn step_retry_due(&mut self, task: &str, attempt: u32) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let run_id = self.run.id;

        let Some(pos) = self.registry.position(task) else {
            warn!(task = %task, run_id, "retry for unknown task; ignoring");
            return step;
        };

        let descriptor = &self.registry.topological_order()[pos];
        let exec = &mut self.executions[pos];

        if exec.status != TaskStatus::Retrying || exec.attempts + 1 != attempt {
            debug!(
                task = %task,
                run_id,
                attempt,
                status = ?exec.status,
                "retry no longer applicable; ignoring"
            );
            return step;
        }

        exec.status = TaskStatus::Running;
        exec.attempts = attempt;

        info!(task = %task, run_id, attempt, "re-running task after retry delay");

        step.events.push(LifecycleEvent::TaskStarted {
            run_id,
            task: task.to_string(),
            attempt,
        });
        step.newly_scheduled.push(ScheduledAttempt {
            run_id,
            task: descriptor.clone(),
            attempt,
            triggered_at: self.run.triggered_at,
        });

        step
    }

    /// Fail every unfinished task with `Cancelled`. No further retries or
    /// dispatches happen for this run.
    pub fn step_cancel(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let mut manager = self.manager();
        step.newly_failed = manager.cancel_unfinished(&mut step.events);
        step.run_just_finished = true;

        info!(
            run_id = self.run.id,
            cancelled = step.newly_failed.len(),
            "run cancelled"
        );
        step
    }

    /// Compute the final status and hand out the immutable record.
    ///
    /// Success iff every execution succeeded. Any execution that is still not
    /// terminal is recorded as cancelled.
    pub fn finalize(mut self, now: DateTime<Utc>) -> (RunRecord, LifecycleEvent) {
        if !self.is_finished() {
            let mut ignored = Vec::new();
            self.manager().cancel_unfinished(&mut ignored);
        }

        let all_success = self.executions.iter().all(|e| e.status.is_success());
        self.run.status = if all_success {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        self.run.finished_at = Some(now);

        let event = LifecycleEvent::RunFinished {
            run_id: self.run.id,
            status: self.run.status,
            started_at: self.run.started_at,
            finished_at: now,
        };

        let record = RunRecord {
            run: self.run,
            executions: self.executions,
        };

        (record, event)
    }

    fn manager(&mut self) -> StateManager<'_> {
        StateManager::new(
            &self.registry,
            &mut self.executions,
            self.run.id,
            self.run.triggered_at,
        )
    }
}
