// src/dag/run.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::execution::TaskExecution;
use crate::engine::TriggerReason;

/// Monotonically increasing run identifier.
pub type RunId = u64;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

/// One instantiation of the pipeline for one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// The scheduled fire time (or the original one, for a retrigger).
    pub triggered_at: DateTime<Utc>,
    pub reason: TriggerReason,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Wall time between start and finish, once finished.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// A finalized run together with all of its task executions.
///
/// This is the unit the history store appends atomically. Executions are in
/// the registry's topological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: Run,
    pub executions: Vec<TaskExecution>,
}

impl RunRecord {
    pub fn execution(&self, task: &str) -> Option<&TaskExecution> {
        self.executions.iter().find(|e| e.task == task)
    }
}
