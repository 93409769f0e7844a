// src/dag/descriptor.rs

use std::time::Duration;

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// Static description of one pipeline step.
///
/// Built once from configuration at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub name: TaskName,
    /// Opaque action reference interpreted by the action runner.
    pub action: String,
    /// Direct upstream tasks (names in `after = [...]`).
    pub depends_on: Vec<TaskName>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Per-attempt time limit.
    pub timeout: Option<Duration>,
}

impl TaskDescriptor {
    /// Upper bound on attempts for one execution: the first try plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
