// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::dag::{RetryRequest, RunRecord, ScheduledAttempt};
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::history::RunHistoryStore;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the run coordinator in response to `RuntimeEvent`s, delegates
/// attempt execution to an `ExecutorBackend` and persists finished runs.
///
/// Every decision about runs (admission, skips, retries, outcomes) is made by
/// `CoreRuntime`. This type only performs the side effects it asks for: worker
/// dispatch, retry timers and history appends.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    /// Used by retry timers to feed `RetryDue` back into the loop.
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    store: Arc<dyn RunHistoryStore>,
    timers: JoinSet<()>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_tx: mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        store: Arc<dyn RunHistoryStore>,
    ) -> Self {
        Self {
            core,
            event_tx,
            event_rx,
            executor,
            store,
            timers: JoinSet::new(),
        }
    }

    /// Processes triggers, attempt outcomes and retry deadlines until the
    /// coordinator asks to stop or every sender has gone away.
    pub async fn run(mut self) -> Result<()> {
        info!("pipetick runtime started");

        loop {
            // Reap finished timers so the set doesn't grow without bound.
            while self.timers.try_join_next().is_some() {}

            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("no more triggers or outcomes can arrive; stopping coordinator");
                    break;
                }
            };

            debug!(?event, "coordinator event");

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!(in_flight = self.core.active_runs(), "coordinator finished its work");
                break;
            }
        }

        self.timers.abort_all();
        info!("coordinator stopped");
        Ok(())
    }

    /// Applies one side effect requested by the coordinator.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(attempts) => {
                self.spawn_ready(attempts).await?;
            }
            CoreCommand::ScheduleRetry(request) => {
                self.arm_retry(request);
            }
            CoreCommand::AbortRun(run_id) => {
                debug!(run_id, "aborting in-flight attempts");
                self.executor.abort_run(run_id);
            }
            CoreCommand::RecordRun(record) => {
                self.record(record);
            }
            CoreCommand::RequestExit => {
                debug!("exit requested after the last run");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, attempts: Vec<ScheduledAttempt>) -> Result<()> {
        if attempts.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = attempts.iter().map(|a| a.task.name.as_str()).collect();
        let run_ids: Vec<_> = attempts.iter().map(|a| a.run_id).collect();
        debug!(?names, ?run_ids, "dispatching ready attempts");

        self.executor.spawn_ready_tasks(attempts).await
    }

    fn arm_retry(&mut self, request: RetryRequest) {
        let tx = self.event_tx.clone();
        debug!(
            run_id = request.run_id,
            task = %request.task,
            attempt = request.attempt,
            delay = ?request.delay,
            "arming retry timer"
        );

        self.timers.spawn(async move {
            tokio::time::sleep(request.delay).await;
            let _ = tx
                .send(RuntimeEvent::RetryDue {
                    run_id: request.run_id,
                    task: request.task,
                    attempt: request.attempt,
                })
                .await;
        });
    }

    fn record(&self, record: RunRecord) {
        let run_id = record.run.id;
        let status = record.run.status;
        match self.store.append(&record) {
            Ok(()) => debug!(run_id, ?status, "run recorded in history"),
            Err(err) => error!(run_id, error = %err, "failed to record run in history"),
        }
    }
}
