// tests/shell_pipeline.rs

//! Real `sh -c` actions through the whole scheduler.

#![cfg(unix)]

use std::error::Error;
use std::fs;
use std::sync::Arc;

use pipetick::config::PipelineConfig;
use pipetick::dag::{RunStatus, TaskStatus};
use pipetick::exec::ShellRunner;
use pipetick::history::{MemoryHistory, RunHistoryStore};
use pipetick::state::{SchedulerState, StartOptions};
use pipetick_test_utils::{
    init_tracing, with_timeout, PipelineConfigBuilder, RecordingSink, TaskConfigBuilder,
};

type TestResult = Result<(), Box<dyn Error>>;

async fn run_once(config: &PipelineConfig) -> Result<SchedulerState, Box<dyn Error>> {
    let store: Arc<dyn RunHistoryStore> = Arc::new(MemoryHistory::new());
    let state = SchedulerState::with_store(config, store)?;
    let mut handle = state.start(
        Arc::new(ShellRunner),
        Arc::new(RecordingSink::new()),
        StartOptions::one_shot(),
    )?;
    handle.trigger_now().await?;
    handle.wait().await?;
    Ok(state)
}

#[tokio::test]
async fn tasks_see_run_context_in_environment() -> TestResult {
    with_timeout(async {
        init_tracing();

        let dir = tempfile::tempdir()?;
        let out = dir.path().join("out.txt");
        let cmd = format!(
            "echo \"$PIPETICK_TASK $PIPETICK_RUN_ID $PIPETICK_ATTEMPT\" >> {}",
            out.display()
        );

        let config = PipelineConfigBuilder::new()
            .with_task(TaskConfigBuilder::new("start", "log:pipeline started").build())
            .with_task(TaskConfigBuilder::new("work", &cmd).after("start").build())
            .with_task(TaskConfigBuilder::new("more", &cmd).after("work").build())
            .build();

        let state = run_once(&config).await?;
        let record = state.store().get(1)?.expect("run recorded");
        assert_eq!(record.run.status, RunStatus::Success);
        assert_eq!(fs::read_to_string(&out)?, "work 1 1\nmore 1 1\n");
        Ok(())
    })
    .await
}

#[tokio::test]
async fn failing_command_reports_stderr_and_skips_downstream() -> TestResult {
    with_timeout(async {
        init_tracing();

        let config = PipelineConfigBuilder::new()
            .default_retries(0)
            .with_task(TaskConfigBuilder::new("broken", "echo 'disk full' >&2; exit 3").build())
            .with_task(TaskConfigBuilder::new("after", "log:never").after("broken").build())
            .build();

        let state = run_once(&config).await?;
        let record = state.store().get(1)?.expect("run recorded");
        assert_eq!(record.run.status, RunStatus::Failed);

        let broken = record.execution("broken").unwrap();
        let error = broken.error.as_deref().unwrap_or_default();
        assert!(error.contains("exit status 3"), "{error}");
        assert!(error.contains("disk full"), "{error}");
        assert!(record.execution("after").unwrap().status.is_upstream_skip());
        assert_ne!(broken.status, TaskStatus::Success);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn hung_command_is_killed_at_timeout() -> TestResult {
    with_timeout(async {
        init_tracing();

        let config = PipelineConfigBuilder::new()
            .default_retries(0)
            .with_task(TaskConfigBuilder::new("hang", "sleep 30").timeout("200ms").build())
            .build();

        let state = run_once(&config).await?;
        let record = state.store().get(1)?.expect("run recorded");
        assert_eq!(record.run.status, RunStatus::Failed);
        assert_eq!(
            record.execution("hang").unwrap().error.as_deref(),
            Some("timed out after 200ms")
        );
        Ok(())
    })
    .await
}
