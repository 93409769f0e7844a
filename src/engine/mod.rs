// src/engine/mod.rs

//! Orchestration engine for pipetick.
//!
//! This module ties together:
//! - the per-run state machines ([`crate::dag::RunScheduler`])
//! - admission of new runs (`max_concurrent_runs`)
//! - the main runtime event loop that reacts to:
//!   - clock and manual triggers
//!   - attempt completions reported by the worker pool
//!   - retry timers
//!   - cancellation and shutdown requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::RunId;
use crate::types::ConcurrencyLimit;

/// Canonical task name type used throughout the engine.
pub use crate::dag::TaskName;

/// Outcome of a single attempt, as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure,
    /// The descriptor's timeout elapsed. Retried like `Failure`.
    Timeout,
}

impl ActionOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, ActionOutcome::Success)
    }
}

/// What the action invoker observed for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub outcome: ActionOutcome,
    /// Free-form text from the collaborator (stderr tail, error message).
    pub diagnostic: Option<String>,
    pub duration: Duration,
}

impl AttemptResult {
    pub fn success(duration: Duration) -> Self {
        Self {
            outcome: ActionOutcome::Success,
            diagnostic: None,
            duration,
        }
    }

    pub fn failure(diagnostic: impl Into<String>, duration: Duration) -> Self {
        Self {
            outcome: ActionOutcome::Failure,
            diagnostic: Some(diagnostic.into()),
            duration,
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            outcome: ActionOutcome::Timeout,
            diagnostic: Some(format!("timed out after {limit:?}")),
            duration: limit,
        }
    }

    /// Human-readable error detail stored on the task execution.
    pub fn describe(&self) -> String {
        match (&self.outcome, &self.diagnostic) {
            (_, Some(diag)) if !diag.is_empty() => diag.clone(),
            (ActionOutcome::Timeout, _) => "timed out".to_string(),
            (ActionOutcome::Failure, _) => "action failed".to_string(),
            (ActionOutcome::Success, _) => String::new(),
        }
    }
}

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TriggerReason {
    /// The interval clock fired.
    Schedule,
    /// Operator request (`trigger_now`, `--once`).
    Manual,
    /// Re-execution of an earlier, finalized run.
    Retrigger { of: RunId },
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once no run is in flight (used for
    /// `--once` and `retrigger`).
    pub exit_when_idle: bool,
    pub max_concurrent_runs: ConcurrencyLimit,
}

/// Events flowing into the runtime from the clock, the worker pool and the
/// control handle.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Start a new run for this trigger timestamp.
    Triggered {
        fired_at: DateTime<Utc>,
        reason: TriggerReason,
    },
    /// One attempt of a task finished.
    AttemptFinished {
        run_id: RunId,
        task: TaskName,
        attempt: u32,
        result: AttemptResult,
    },
    /// The retry delay of a task elapsed.
    RetryDue {
        run_id: RunId,
        task: TaskName,
        attempt: u32,
    },
    /// Operator cancellation of one run.
    CancelRun { run_id: RunId },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod admission;
pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use admission::{Admission, AdmissionPolicy};
pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
