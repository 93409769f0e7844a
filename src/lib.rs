// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod fs;
pub mod history;
pub mod logging;
pub mod state;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::clock::{Clock, IntervalSchedule, SystemClock};
use crate::config::{load_and_validate, PipelineConfig};
use crate::dag::{RunId, RunRecord, RunStatus, TaskRegistry};
use crate::errors::PipetickError;
use crate::events::{EventSink, FinishedRuns, TracingSink};
use crate::exec::ShellRunner;
use crate::history::RunHistoryStore;
use crate::state::{SchedulerHandle, SchedulerState, StartOptions};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation (fatal on any configuration error)
/// - scheduler state (registry, schedule, history store)
/// - runtime, worker pool and interval ticker
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let root_dir = config_root_dir(&config_path);

    match args.command() {
        Command::Validate => print_validate(&cfg),
        Command::Runs { since } => {
            let state = SchedulerState::init(&cfg, &root_dir)?;
            print_runs(&state, since.unwrap_or(DateTime::<Utc>::MIN_UTC))
        }
        Command::Show { run_id } => {
            let state = SchedulerState::init(&cfg, &root_dir)?;
            let record = state
                .store()
                .get(run_id)?
                .ok_or(PipetickError::RunNotFound(run_id))?;
            print_record(&record);
            Ok(())
        }
        Command::Retrigger { run_id } => {
            let state = SchedulerState::init(&cfg, &root_dir)?;
            let sink = Arc::new(FinishedRuns::new(TracingSink));
            let mut handle = start(&state, sink.clone(), StartOptions::one_shot())?;
            handle.retrigger(run_id).await?;
            handle.wait().await?;
            report_one_shot(&**state.store(), &sink.finished())
        }
        Command::Run { once: true } => {
            let state = SchedulerState::init(&cfg, &root_dir)?;
            let sink = Arc::new(FinishedRuns::new(TracingSink));
            let mut handle = start(&state, sink.clone(), StartOptions::one_shot())?;
            handle.trigger_now().await?;
            handle.wait().await?;
            report_one_shot(&**state.store(), &sink.finished())
        }
        Command::Run { once: false } => {
            let state = SchedulerState::init(&cfg, &root_dir)?;
            let schedule = state.schedule();
            info!(
                interval = ?schedule.interval(),
                next_fire = %schedule.next_fire_time(SystemClock.now()),
                "waiting for the interval clock"
            );
            let mut handle = start(&state, Arc::new(TracingSink), StartOptions::default())?;
            handle.wait().await?;
            Ok(())
        }
    }
}

fn start(
    state: &SchedulerState,
    sink: Arc<dyn EventSink>,
    options: StartOptions,
) -> Result<SchedulerHandle> {
    let handle = state.start(Arc::new(ShellRunner), sink, options)?;
    handle.shutdown_on_ctrl_c();
    Ok(handle)
}

/// Figure out the directory relative paths in the config are resolved
/// against.
///
/// - If the config path has a non-empty parent (e.g. "demos/pipeline.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Pipetick.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// After a one-shot execution: print the run that just finished and fail
/// if it failed or never made it into the history.
fn report_one_shot(store: &dyn RunHistoryStore, finished: &[(RunId, RunStatus)]) -> Result<()> {
    let Some(&(run_id, status)) = finished.last() else {
        bail!("no run was executed");
    };
    let Some(record) = store.get(run_id)? else {
        bail!("run {run_id} finished ({status:?}) but was not recorded in the history");
    };
    print_record(&record);

    if record.run.status == RunStatus::Failed {
        bail!("run {run_id} failed");
    }
    Ok(())
}

/// Print schedule and task order without executing anything.
fn print_validate(cfg: &PipelineConfig) -> Result<()> {
    let schedule = IntervalSchedule::new(cfg.schedule.start, cfg.schedule.interval)?;
    let registry = TaskRegistry::from_config(cfg)?;

    println!("pipetick validate");
    println!("  schedule.interval = {:?}", schedule.interval());
    println!("  schedule.start = {}", schedule.start().to_rfc3339());
    println!(
        "  schedule.next_fire = {}",
        schedule.next_fire_time(Utc::now()).to_rfc3339()
    );
    println!(
        "  schedule.max_concurrent_runs = {:?}",
        cfg.schedule.max_concurrent_runs
    );
    println!("  runtime.worker_pool_size = {}", cfg.runtime.worker_pool_size);
    println!(
        "  runtime.history = {:?} ({})",
        cfg.runtime.history,
        cfg.runtime.history_path.display()
    );
    println!();

    println!("tasks ({}), in execution order:", registry.len());
    for task in registry.topological_order() {
        println!("  - {}", task.name);
        println!("      action: {}", task.action);
        if !task.depends_on.is_empty() {
            println!("      after: {:?}", task.depends_on);
        }
        println!(
            "      retries: {} (delay {:?})",
            task.max_retries, task.retry_delay
        );
        if let Some(timeout) = task.timeout {
            println!("      timeout: {timeout:?}");
        }
    }

    debug!("validate complete (no execution)");
    Ok(())
}

fn print_runs(state: &SchedulerState, since: DateTime<Utc>) -> Result<()> {
    let runs = state.store().list(since)?;
    if runs.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }

    for run in runs {
        let elapsed = run
            .elapsed()
            .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {}  {:<7}  {:>8}  {:?}",
            run.id,
            run.triggered_at.to_rfc3339(),
            format!("{:?}", run.status).to_lowercase(),
            elapsed,
            run.reason
        );
    }
    Ok(())
}

fn print_record(record: &RunRecord) {
    let run = &record.run;
    println!("run {}", run.id);
    println!("  triggered_at: {}", run.triggered_at.to_rfc3339());
    println!("  reason: {:?}", run.reason);
    println!("  status: {:?}", run.status);
    println!("  started_at: {}", run.started_at.to_rfc3339());
    if let Some(finished) = run.finished_at {
        println!("  finished_at: {}", finished.to_rfc3339());
    }
    println!("  tasks:");
    for exec in &record.executions {
        println!(
            "    - {}: {:?} (attempts {}{})",
            exec.task,
            exec.status,
            exec.attempts,
            exec.duration
                .map(|d| format!(", last attempt {d:?}"))
                .unwrap_or_default()
        );
        if let Some(err) = &exec.error {
            println!("        error: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Run, TaskExecution, TaskStatus};
    use crate::engine::TriggerReason;
    use crate::history::MemoryHistory;

    fn finished(id: RunId, status: RunStatus) -> RunRecord {
        let at = DateTime::<Utc>::UNIX_EPOCH;
        let mut exec = TaskExecution::pending(id, "A");
        exec.attempts = 1;
        exec.status = match status {
            RunStatus::Success => TaskStatus::Success,
            _ => TaskStatus::Failed(crate::dag::FailureKind::Exhausted),
        };
        RunRecord {
            run: Run {
                id,
                triggered_at: at,
                reason: TriggerReason::Manual,
                status,
                started_at: at,
                finished_at: Some(at),
            },
            executions: vec![exec],
        }
    }

    #[test]
    fn one_shot_reports_the_run_it_executed() {
        let store = MemoryHistory::new();
        store.append(&finished(1, RunStatus::Success)).unwrap();
        store.append(&finished(2, RunStatus::Failed)).unwrap();

        assert!(report_one_shot(&store, &[(1, RunStatus::Success)]).is_ok());
        assert!(report_one_shot(&store, &[(2, RunStatus::Failed)]).is_err());
    }

    #[test]
    fn unrecorded_run_fails_even_if_an_older_run_succeeded() {
        let store = MemoryHistory::new();
        store.append(&finished(1, RunStatus::Success)).unwrap();

        // Run 2 executed but its history append failed.
        let err = report_one_shot(&store, &[(2, RunStatus::Success)]).unwrap_err();
        assert!(err.to_string().contains("not recorded"), "{err}");
    }

    #[test]
    fn nothing_executed_is_an_error() {
        let store = MemoryHistory::new();
        assert!(report_one_shot(&store, &[]).is_err());
    }
}
