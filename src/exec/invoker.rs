// src/exec/invoker.rs

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dag::{RunId, ScheduledAttempt, TaskDescriptor, TaskName};
use crate::engine::{ActionOutcome, AttemptResult};

/// What an action is told about the attempt it is running for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: RunId,
    pub task: TaskName,
    pub attempt: u32,
    pub triggered_at: DateTime<Utc>,
}

impl From<&ScheduledAttempt> for RunContext {
    fn from(attempt: &ScheduledAttempt) -> Self {
        Self {
            run_id: attempt.run_id,
            task: attempt.task.name.clone(),
            attempt: attempt.attempt,
            triggered_at: attempt.triggered_at,
        }
    }
}

/// The collaborator's own verdict on an action.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionReport {
    pub success: bool,
    pub diagnostic: Option<String>,
}

impl ActionReport {
    pub fn ok() -> Self {
        Self {
            success: true,
            diagnostic: None,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// The seam to whatever actually performs an action.
///
/// `Err` means the collaborator itself broke (could not spawn, lost
/// connection, ...). It is treated exactly like a reported failure.
pub trait ActionRunner: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        action: &'a str,
        ctx: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionReport>> + Send + 'a>>;
}

/// Invokes actions, timing each attempt and enforcing the task timeout.
///
/// The outcome is always one of Success, Failure or Timeout; the invoker
/// never fails itself.
#[derive(Debug)]
pub struct ActionInvoker<R> {
    runner: Arc<R>,
}

impl<R> Clone for ActionInvoker<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
        }
    }
}

impl<R: ActionRunner> ActionInvoker<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    pub async fn invoke(&self, task: &TaskDescriptor, ctx: &RunContext) -> AttemptResult {
        let started = Instant::now();
        let action = self.runner.run(&task.action, ctx);

        let report = match task.timeout {
            Some(limit) => match tokio::time::timeout(limit, action).await {
                Ok(report) => report,
                Err(_) => {
                    warn!(
                        run_id = ctx.run_id,
                        task = %ctx.task,
                        attempt = ctx.attempt,
                        timeout = ?limit,
                        "action timed out"
                    );
                    return AttemptResult::timeout(limit);
                }
            },
            None => action.await,
        };

        let duration = started.elapsed();
        let result = match report {
            Ok(report) if report.success => AttemptResult {
                outcome: ActionOutcome::Success,
                diagnostic: report.diagnostic,
                duration,
            },
            Ok(report) => AttemptResult::failure(
                report
                    .diagnostic
                    .unwrap_or_else(|| "action reported failure".to_string()),
                duration,
            ),
            Err(err) => AttemptResult::failure(format!("{err:#}"), duration),
        };

        debug!(
            run_id = ctx.run_id,
            task = %ctx.task,
            attempt = ctx.attempt,
            outcome = ?result.outcome,
            ?duration,
            "attempt finished"
        );
        result
    }
}
