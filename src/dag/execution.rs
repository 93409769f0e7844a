// src/dag/execution.rs

//! Per-task execution records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::descriptor::TaskName;
use crate::dag::run::RunId;

/// Why a task execution ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every allowed attempt failed or timed out.
    Exhausted,
    /// Never attempted because an upstream task failed.
    UpstreamFailed { upstream: TaskName },
    /// The run was cancelled before this task finished.
    Cancelled,
}

/// State of one task inside one run.
///
/// `Pending -> Running -> {Success, Failed}`, with
/// `Running -> Retrying -> Running` while retries remain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Retrying,
    Success,
    Failed(FailureKind),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success)
    }

    /// True for the "never reached" outcome, as opposed to a real failure.
    pub fn is_upstream_skip(&self) -> bool {
        matches!(self, TaskStatus::Failed(FailureKind::UpstreamFailed { .. }))
    }
}

/// The attempt sequence of one task within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub run_id: RunId,
    pub task: TaskName,
    /// Number of attempts started so far (0 if never attempted).
    pub attempts: u32,
    pub status: TaskStatus,
    /// When the first attempt was dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// Duration of the most recent finished attempt.
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

impl TaskExecution {
    pub fn pending(run_id: RunId, task: impl Into<TaskName>) -> Self {
        Self {
            run_id,
            task: task.into(),
            attempts: 0,
            status: TaskStatus::Pending,
            started_at: None,
            duration: None,
            error: None,
        }
    }

    pub fn was_attempted(&self) -> bool {
        self.attempts > 0
    }
}
