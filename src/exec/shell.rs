// src/exec/shell.rs

//! Production action runner.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::invoker::{ActionReport, ActionRunner, RunContext};

/// Actions starting with this prefix are console log lines, not commands.
pub const LOG_PREFIX: &str = "log:";

/// How many trailing stderr lines make up a failure diagnostic.
const STDERR_TAIL_LINES: usize = 20;

/// Runs actions as shell command lines.
///
/// - `log:<message>` logs `<message>` and succeeds.
/// - Anything else runs via `sh -c` (`cmd /C` on Windows). Exit status 0 is
///   success; otherwise the tail of stderr becomes the diagnostic.
///
/// The child inherits `PIPETICK_RUN_ID`, `PIPETICK_TASK`,
/// `PIPETICK_ATTEMPT` and `PIPETICK_TRIGGERED_AT`. Dropping the future kills
/// the child (timeouts, aborted runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ActionRunner for ShellRunner {
    fn run<'a>(
        &'a self,
        action: &'a str,
        ctx: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = Result<ActionReport>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(message) = action.strip_prefix(LOG_PREFIX) {
                info!(
                    run_id = ctx.run_id,
                    task = %ctx.task,
                    triggered_at = %ctx.triggered_at,
                    "{}",
                    message.trim()
                );
                return Ok(ActionReport::ok());
            }
            run_command(action, ctx).await
        })
    }
}

async fn run_command(action: &str, ctx: &RunContext) -> Result<ActionReport> {
    info!(
        run_id = ctx.run_id,
        task = %ctx.task,
        attempt = ctx.attempt,
        cmd = %action,
        "starting task process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(action);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(action);
        c
    };

    cmd.env("PIPETICK_RUN_ID", ctx.run_id.to_string())
        .env("PIPETICK_TASK", &ctx.task)
        .env("PIPETICK_ATTEMPT", ctx.attempt.to_string())
        .env("PIPETICK_TRIGGERED_AT", ctx.triggered_at.to_rfc3339())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", ctx.task))?;

    if let Some(stdout) = child.stdout.take() {
        let task = ctx.task.clone();
        let run_id = ctx.run_id;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task, run_id, "stdout: {}", line);
            }
        });
    }

    let stderr = child.stderr.take();
    let (status, tail) = tokio::join!(child.wait(), stderr_tail(stderr, ctx));
    let status =
        status.with_context(|| format!("waiting for process of task '{}'", ctx.task))?;

    info!(
        run_id = ctx.run_id,
        task = %ctx.task,
        attempt = ctx.attempt,
        exit_code = status.code().unwrap_or(-1),
        success = status.success(),
        "task process exited"
    );

    if status.success() {
        return Ok(ActionReport::ok());
    }

    let mut diagnostic = match status.code() {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    };
    if !tail.is_empty() {
        diagnostic.push_str(": ");
        diagnostic.push_str(&tail);
    }
    Ok(ActionReport::failed(diagnostic))
}

/// Drain stderr (so the pipe never fills), logging each line and keeping
/// the last few for the diagnostic.
async fn stderr_tail<S>(stderr: Option<S>, ctx: &RunContext) -> String
where
    S: AsyncRead + Unpin,
{
    let Some(stderr) = stderr else {
        return String::new();
    };

    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(task = %ctx.task, run_id = ctx.run_id, "stderr: {}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}
