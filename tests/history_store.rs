// tests/history_store.rs

//! History persistence on a real filesystem.

use std::error::Error;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use pipetick::dag::{Run, RunId, RunRecord, RunStatus, TaskExecution, TaskStatus};
use pipetick::engine::TriggerReason;
use pipetick::fs::RealFileSystem;
use pipetick::history::{open_store, FileHistory, RunHistoryStore};
use pipetick::state::{SchedulerState, StartOptions};
use pipetick::types::HistoryStorageMode;
use pipetick_test_utils::{
    init_tracing, PausedClock, PipelineConfigBuilder, RecordingSink, ScriptedRunner,
    TaskConfigBuilder,
};

type TestResult = Result<(), Box<dyn Error>>;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn record(id: RunId, triggered_at: DateTime<Utc>) -> RunRecord {
    let mut exec = TaskExecution::pending(id, "A");
    exec.attempts = 1;
    exec.status = TaskStatus::Success;
    exec.started_at = Some(triggered_at);
    exec.duration = Some(Duration::from_secs(2));

    RunRecord {
        run: Run {
            id,
            triggered_at,
            reason: TriggerReason::Schedule,
            status: RunStatus::Success,
            started_at: triggered_at,
            finished_at: Some(triggered_at + TimeDelta::seconds(2)),
        },
        executions: vec![exec],
    }
}

#[test]
fn records_survive_reopen() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state/history.jsonl");

    {
        let store = FileHistory::open(Arc::new(RealFileSystem), path.clone())?;
        assert_eq!(store.last_run_id()?, None);
        store.append(&record(1, t0()))?;
        store.append(&record(2, t0() + TimeDelta::minutes(5)))?;
    }

    // Parent directories are created on first append.
    assert!(path.exists());
    assert_eq!(fs::read_to_string(&path)?.lines().count(), 2);

    let reopened = FileHistory::open(Arc::new(RealFileSystem), path)?;
    assert_eq!(reopened.last_run_id()?, Some(2));
    assert_eq!(reopened.get(1)?, Some(record(1, t0())));

    let since = reopened.list(t0() + TimeDelta::minutes(1))?;
    assert_eq!(since.iter().map(|r| r.id).collect::<Vec<_>>(), [2]);
    Ok(())
}

#[test]
fn half_written_last_line_is_ignored_on_reopen() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.jsonl");

    let store = FileHistory::open(Arc::new(RealFileSystem), path.clone())?;
    store.append(&record(1, t0()))?;
    drop(store);

    // Simulate a crash in the middle of writing run 2.
    let full = serde_json::to_string(&record(2, t0() + TimeDelta::minutes(5)))?;
    let mut file = fs::OpenOptions::new().append(true).open(&path)?;
    file.write_all(&full.as_bytes()[..full.len() / 2])?;
    drop(file);

    let store = FileHistory::open(Arc::new(RealFileSystem), path.clone())?;
    assert_eq!(store.last_run_id()?, Some(1));
    assert_eq!(store.get(2)?, None);

    // The next append lands on its own line and both records read back.
    store.append(&record(2, t0() + TimeDelta::minutes(5)))?;
    let store = FileHistory::open(Arc::new(RealFileSystem), path)?;
    assert_eq!(store.list(DateTime::<Utc>::MIN_UTC)?.len(), 2);
    Ok(())
}

#[test]
fn unfinished_and_duplicate_records_are_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = open_store(HistoryStorageMode::File, &dir.path().join("h.jsonl"))?;

    store.append(&record(1, t0()))?;
    assert!(store.append(&record(1, t0())).is_err());

    let mut running = record(2, t0());
    running.run.status = RunStatus::Running;
    running.run.finished_at = None;
    assert!(store.append(&running).is_err());
    assert_eq!(store.last_run_id()?, Some(1));
    Ok(())
}

#[test]
fn memory_mode_never_touches_disk() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("h.jsonl");
    let store = open_store(HistoryStorageMode::Memory, &path)?;

    store.append(&record(1, t0()))?;
    assert_eq!(store.get(1)?.map(|r| r.run.id), Some(1));
    assert!(!path.exists());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn run_ids_resume_after_restart() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let mut config = PipelineConfigBuilder::new()
        .with_task(TaskConfigBuilder::new("A", "noop").build())
        .raw();
    config.runtime.history = HistoryStorageMode::File;
    let config = pipetick::config::PipelineConfig::try_from(config)?;

    for expected in [1, 2] {
        let state = SchedulerState::init(&config, dir.path())?;
        let mut handle = state.start(
            Arc::new(ScriptedRunner::new()),
            Arc::new(RecordingSink::new()),
            StartOptions {
                run_ticker: false,
                exit_when_idle: true,
                clock: Arc::new(PausedClock::at("2024-01-01T00:00:00Z")),
            },
        )?;
        handle.trigger_now().await?;
        handle.wait().await?;

        assert_eq!(state.store().last_run_id()?, Some(expected));
    }

    let reopened = SchedulerState::init(&config, dir.path())?;
    let ids: Vec<_> = reopened
        .store()
        .list(DateTime::<Utc>::MIN_UTC)?
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, [1, 2]);
    assert!(dir.path().join(".pipetick/history.jsonl").exists());
    Ok(())
}

#[test]
fn torn_record_between_complete_ones_is_skipped() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.jsonl");
    let line = |id| serde_json::to_string(&record(id, t0() + TimeDelta::minutes(5 * id as i64)));

    let torn = line(2)?;
    fs::write(
        &path,
        format!("{}\n{}\n{}\n", line(1)?, &torn[..torn.len() / 2], line(3)?),
    )?;

    let store = FileHistory::open(Arc::new(RealFileSystem), path.clone())?;
    let ids: Vec<_> = store
        .list(DateTime::<Utc>::MIN_UTC)?
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, [1, 3]);

    // Garbage that was never a record is still refused.
    fs::write(&path, format!("{}\nnot a record\n{}\n", line(1)?, line(3)?))?;
    assert!(FileHistory::open(Arc::new(RealFileSystem), path).is_err());
    Ok(())
}
