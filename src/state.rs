// src/state.rs

//! Process-wide scheduler state and the manual control surface.
//!
//! [`SchedulerState::init`] builds everything that can fail on bad
//! configuration (schedule, registry, history store) without starting any
//! task. [`SchedulerState::start`] spawns the runtime loop and, optionally,
//! the interval ticker, and hands back a [`SchedulerHandle`].

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{spawn_ticker, Clock, IntervalSchedule, SystemClock};
use crate::config::{PipelineConfig, RuntimeSettings};
use crate::dag::{Run, RunId, RunRecord, TaskRegistry};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, TriggerReason};
use crate::errors::{PipetickError, Result};
use crate::events::EventSink;
use crate::exec::{ActionRunner, WorkerPool};
use crate::history::{open_store, RunHistoryStore};
use crate::types::ConcurrencyLimit;

/// Capacity of the runtime event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How a scheduler instance should behave once started.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Spawn the interval ticker. Off for one-shot commands.
    pub run_ticker: bool,
    /// Stop as soon as no run is in flight (`--once`, `retrigger`).
    pub exit_when_idle: bool,
    pub clock: Arc<dyn Clock>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            run_ticker: true,
            exit_when_idle: false,
            clock: Arc::new(SystemClock),
        }
    }
}

impl StartOptions {
    /// No ticker; exit once the manually triggered runs are recorded.
    pub fn one_shot() -> Self {
        Self {
            run_ticker: false,
            exit_when_idle: true,
            ..Self::default()
        }
    }
}

/// Everything the scheduler needs, constructed once at startup.
#[derive(Debug)]
pub struct SchedulerState {
    schedule: IntervalSchedule,
    registry: Arc<TaskRegistry>,
    store: Arc<dyn RunHistoryStore>,
    runtime: RuntimeSettings,
    max_concurrent_runs: ConcurrencyLimit,
}

impl SchedulerState {
    /// Build state from validated config. A relative `history_path` is
    /// resolved against `config_root`.
    pub fn init(config: &PipelineConfig, config_root: &Path) -> Result<Self> {
        let history_path = if config.runtime.history_path.is_absolute() {
            config.runtime.history_path.clone()
        } else {
            config_root.join(&config.runtime.history_path)
        };
        let store = open_store(config.runtime.history, &history_path)?;
        Self::with_store(config, store)
    }

    /// Build state around an existing store.
    pub fn with_store(config: &PipelineConfig, store: Arc<dyn RunHistoryStore>) -> Result<Self> {
        let schedule = IntervalSchedule::new(config.schedule.start, config.schedule.interval)?;
        let registry = Arc::new(TaskRegistry::from_config(config)?);

        Ok(Self {
            schedule,
            registry,
            store,
            runtime: config.runtime.clone(),
            max_concurrent_runs: config.schedule.max_concurrent_runs,
        })
    }

    pub fn schedule(&self) -> &IntervalSchedule {
        &self.schedule
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RunHistoryStore> {
        &self.store
    }

    /// Spawn the runtime (and ticker) on the current Tokio runtime.
    pub fn start<R: ActionRunner>(
        &self,
        runner: Arc<R>,
        sink: Arc<dyn EventSink>,
        options: StartOptions,
    ) -> Result<SchedulerHandle> {
        let first_run_id = self.store.last_run_id()?.map_or(1, |id| id + 1);
        let (tx, rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);

        let pool = WorkerPool::new(runner, self.runtime.worker_pool_size, tx.clone());
        let core = CoreRuntime::new(
            Arc::clone(&self.registry),
            RuntimeOptions {
                exit_when_idle: options.exit_when_idle,
                max_concurrent_runs: self.max_concurrent_runs,
            },
            Arc::clone(&options.clock),
            sink,
            first_run_id,
        );
        let runtime = Runtime::new(core, tx.clone(), rx, pool, Arc::clone(&self.store));
        let runtime = tokio::spawn(runtime.run());

        let ticker = options
            .run_ticker
            .then(|| spawn_ticker(self.schedule, Arc::clone(&options.clock), tx.clone()));

        info!(
            tasks = self.registry.len(),
            first_run_id,
            worker_pool_size = self.runtime.worker_pool_size,
            ticker = options.run_ticker,
            "scheduler started"
        );

        Ok(SchedulerHandle {
            tx,
            store: Arc::clone(&self.store),
            clock: options.clock,
            ticker,
            runtime: Some(runtime),
        })
    }
}

/// Control surface of a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<RuntimeEvent>,
    store: Arc<dyn RunHistoryStore>,
    clock: Arc<dyn Clock>,
    ticker: Option<JoinHandle<()>>,
    runtime: Option<JoinHandle<Result<()>>>,
}

impl SchedulerHandle {
    /// Start a run now, outside the interval schedule.
    pub async fn trigger_now(&self) -> Result<()> {
        self.send(RuntimeEvent::Triggered {
            fired_at: self.clock.now(),
            reason: TriggerReason::Manual,
        })
        .await
    }

    /// Re-execute a finalized run under a new run id, keeping its original
    /// trigger timestamp. The original record is left untouched.
    pub async fn retrigger(&self, run_id: RunId) -> Result<()> {
        let record = self
            .store
            .get(run_id)?
            .ok_or(PipetickError::RunNotFound(run_id))?;

        info!(
            run_id,
            triggered_at = %record.run.triggered_at,
            status = ?record.run.status,
            "retriggering run"
        );

        self.send(RuntimeEvent::Triggered {
            fired_at: record.run.triggered_at,
            reason: TriggerReason::Retrigger { of: run_id },
        })
        .await
    }

    /// Cancel an in-flight run. Unknown or already finished runs are
    /// ignored by the runtime.
    pub async fn cancel(&self, run_id: RunId) -> Result<()> {
        self.send(RuntimeEvent::CancelRun { run_id }).await
    }

    pub fn list_runs(&self, since: DateTime<Utc>) -> Result<Vec<Run>> {
        self.store.list(since)
    }

    pub fn get_run(&self, run_id: RunId) -> Result<RunRecord> {
        self.store
            .get(run_id)?
            .ok_or(PipetickError::RunNotFound(run_id))
    }

    /// Cancel the runtime on Ctrl-C.
    pub fn shutdown_on_ctrl_c(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; shutting down");
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    /// Wait until the runtime loop exits on its own (idle exit or shutdown).
    pub async fn wait(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.as_mut() else {
            return Ok(());
        };
        let joined = runtime.await;
        self.runtime = None;
        self.stop_ticker();

        match joined {
            Ok(result) => result,
            Err(e) => Err(PipetickError::Other(anyhow::anyhow!("runtime task failed: {e}"))),
        }
    }

    /// Teardown: stop the ticker, cancel in-flight runs (recording them as
    /// failed) and wait for the runtime to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop_ticker();
        if self.tx.send(RuntimeEvent::ShutdownRequested).await.is_err() {
            debug!("runtime already stopped");
        }
        self.wait().await
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PipetickError::SchedulerStopped)
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
