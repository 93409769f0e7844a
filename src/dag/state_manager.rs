// src/dag/state_manager.rs

//! Per-run state management for tasks in the scheduler.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::dag::execution::{FailureKind, TaskExecution, TaskStatus};
use crate::dag::registry::TaskRegistry;
use crate::dag::run::RunId;
use crate::dag::scheduler_step::ScheduledAttempt;
use crate::dag::TaskName;
use crate::events::LifecycleEvent;

/// Applies per-task transitions inside one run.
///
/// `executions` is indexed like `registry.topological_order()`.
pub struct StateManager<'a> {
    registry: &'a TaskRegistry,
    executions: &'a mut [TaskExecution],
    run_id: RunId,
    triggered_at: DateTime<Utc>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        registry: &'a TaskRegistry,
        executions: &'a mut [TaskExecution],
        run_id: RunId,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            registry,
            executions,
            run_id,
            triggered_at,
        }
    }

    /// Whether every direct dependency of the task at `pos` has succeeded.
    pub fn deps_satisfied(&self, pos: usize) -> bool {
        let name = &self.registry.topological_order()[pos].name;
        self.registry.dependencies_of(name).iter().all(|dep| {
            self.registry
                .position(dep)
                .map(|dep_pos| self.executions[dep_pos].status.is_success())
                .unwrap_or(false)
        })
    }

    /// Collect tasks that are `Pending` with all dependencies succeeded,
    /// mark them `Running` (attempt 1) and return them for dispatch.
    ///
    /// Candidates are visited in topological order so dispatch order is
    /// deterministic.
    pub fn collect_new_ready_tasks(
        &mut self,
        now: DateTime<Utc>,
        events: &mut Vec<LifecycleEvent>,
    ) -> Vec<ScheduledAttempt> {
        let candidates: Vec<usize> = (0..self.executions.len())
            .filter(|&pos| {
                matches!(self.executions[pos].status, TaskStatus::Pending)
                    && self.deps_satisfied(pos)
            })
            .collect();

        let mut ready = Vec::with_capacity(candidates.len());

        for pos in candidates {
            let descriptor = &self.registry.topological_order()[pos];
            let exec = &mut self.executions[pos];

            debug!(
                task = %exec.task,
                run_id = self.run_id,
                "dependencies satisfied; marking Running"
            );

            exec.status = TaskStatus::Running;
            exec.attempts = 1;
            exec.started_at = Some(now);

            events.push(LifecycleEvent::TaskStarted {
                run_id: self.run_id,
                task: exec.task.clone(),
                attempt: 1,
            });

            ready.push(ScheduledAttempt {
                run_id: self.run_id,
                task: descriptor.clone(),
                attempt: 1,
                triggered_at: self.triggered_at,
            });
        }

        ready
    }

    /// Mark every not-yet-started task downstream of `failed_task` as
    /// `Failed(UpstreamFailed)`, transitively.
    ///
    /// Returns the newly skipped tasks (excluding `failed_task` itself).
    pub fn mark_dependents_skipped(
        &mut self,
        failed_task: &str,
        events: &mut Vec<LifecycleEvent>,
    ) -> Vec<TaskName> {
        let mut stack: Vec<(TaskName, TaskName)> = self
            .registry
            .dependents_of(failed_task)
            .iter()
            .map(|d| (d.clone(), failed_task.to_string()))
            .collect();

        let mut skipped = Vec::new();

        while let Some((name, upstream)) = stack.pop() {
            let Some(pos) = self.registry.position(&name) else {
                continue;
            };
            let exec = &mut self.executions[pos];

            if !matches!(exec.status, TaskStatus::Pending) {
                // Already skipped through another path, or terminal.
                continue;
            }

            debug!(
                task = %name,
                upstream = %upstream,
                run_id = self.run_id,
                "skipping task due to upstream failure"
            );

            let reason = FailureKind::UpstreamFailed {
                upstream: upstream.clone(),
            };
            let error = format!("upstream task '{upstream}' failed");
            exec.status = TaskStatus::Failed(reason.clone());
            exec.error = Some(error.clone());

            events.push(LifecycleEvent::TaskFailed {
                run_id: self.run_id,
                task: name.clone(),
                attempts: 0,
                reason,
                error: Some(error),
            });

            stack.extend(
                self.registry
                    .dependents_of(&name)
                    .iter()
                    .map(|d| (d.clone(), name.clone())),
            );
            skipped.push(name);
        }

        skipped
    }

    /// Fail every non-terminal task with `FailureKind::Cancelled`.
    pub fn cancel_unfinished(&mut self, events: &mut Vec<LifecycleEvent>) -> Vec<TaskName> {
        let mut cancelled = Vec::new();

        for exec in self.executions.iter_mut() {
            if exec.status.is_terminal() {
                continue;
            }

            exec.status = TaskStatus::Failed(FailureKind::Cancelled);
            exec.error = Some("run cancelled".to_string());

            events.push(LifecycleEvent::TaskFailed {
                run_id: self.run_id,
                task: exec.task.clone(),
                attempts: exec.attempts,
                reason: FailureKind::Cancelled,
                error: exec.error.clone(),
            });
            cancelled.push(exec.task.clone());
        }

        cancelled
    }

    /// Check if all tasks are in a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        self.executions.iter().all(|e| e.status.is_terminal())
    }
}
