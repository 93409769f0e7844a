use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipetick::dag::{RunId, ScheduledAttempt};
use pipetick::engine::{AttemptResult, RuntimeEvent};
use pipetick::errors::Result;
use pipetick::exec::ExecutorBackend;
use tokio::sync::mpsc;

/// A fake executor that:
/// - records which tasks were "run"
/// - immediately reports a successful attempt for each of them.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self { runtime_tx, executed }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        attempts: Vec<ScheduledAttempt>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            for a in attempts {
                executed.lock().unwrap().push(a.task.name.clone());

                // Report from a separate task: the runtime loop is the one
                // awaiting us and must stay free to drain the channel.
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx
                        .send(RuntimeEvent::AttemptFinished {
                            run_id: a.run_id,
                            task: a.task.name.clone(),
                            attempt: a.attempt,
                            result: AttemptResult::success(Duration::ZERO),
                        })
                        .await;
                });
            }
            Ok(())
        })
    }
}

/// Executor that only records what it was asked to do. Tests decide when
/// (and whether) attempts finish by sending events themselves.
#[derive(Clone, Default)]
pub struct ManualExecutor {
    dispatched: Arc<Mutex<Vec<ScheduledAttempt>>>,
    aborted: Arc<Mutex<Vec<RunId>>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<ScheduledAttempt> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<RunId> {
        self.aborted.lock().unwrap().clone()
    }
}

impl ExecutorBackend for ManualExecutor {
    fn spawn_ready_tasks(
        &mut self,
        attempts: Vec<ScheduledAttempt>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.dispatched.lock().unwrap().extend(attempts);
        Box::pin(std::future::ready(Ok(())))
    }

    fn abort_run(&mut self, run_id: RunId) {
        self.aborted.lock().unwrap().push(run_id);
    }
}
