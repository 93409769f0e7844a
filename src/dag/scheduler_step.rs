// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::dag::descriptor::{TaskDescriptor, TaskName};
use crate::dag::run::RunId;
use crate::events::LifecycleEvent;

/// One attempt the scheduler wants the executor to start now.
#[derive(Debug, Clone)]
pub struct ScheduledAttempt {
    pub run_id: RunId,
    pub task: TaskDescriptor,
    /// 1-based attempt number.
    pub attempt: u32,
    pub triggered_at: DateTime<Utc>,
}

/// A failed attempt that should be tried again after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub run_id: RunId,
    pub task: TaskName,
    /// The attempt number to start once the delay has elapsed.
    pub attempt: u32,
    pub delay: Duration,
}

/// Structured result of a single scheduler "step".
///
/// Useful for tests that want to manually step a run and make assertions
/// about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Attempts that became ready to start as a result of this step.
    pub newly_scheduled: Vec<ScheduledAttempt>,
    /// Attempts waiting on a retry delay.
    pub retries: Vec<RetryRequest>,
    /// Tasks newly marked as failed in this step (the task that failed and
    /// any dependents skipped because of it).
    pub newly_failed: Vec<TaskName>,
    /// Lifecycle events in the order the transitions happened.
    pub events: Vec<LifecycleEvent>,
    /// Whether every task of the run is now terminal.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn scheduled_names(&self) -> Vec<&str> {
        self.newly_scheduled
            .iter()
            .map(|a| a.task.name.as_str())
            .collect()
    }
}
