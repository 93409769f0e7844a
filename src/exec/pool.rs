// src/exec/pool.rs

//! Bounded worker pool.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info};

use crate::dag::{RunId, ScheduledAttempt, TaskName};
use crate::engine::RuntimeEvent;
use crate::errors::Result;

use super::backend::ExecutorBackend;
use super::invoker::{ActionInvoker, ActionRunner, RunContext};

type ActiveMap = HashMap<(RunId, TaskName), oneshot::Sender<()>>;

/// Runs every dispatched attempt on its own Tokio task. At most
/// `worker_pool_size` actions execute at once; the rest wait for a permit.
///
/// Independent branches of a run, and separate runs, share the same pool.
pub struct WorkerPool<R: ActionRunner> {
    invoker: ActionInvoker<R>,
    permits: Arc<Semaphore>,
    size: usize,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    /// Cancel handles of in-flight attempts. At most one attempt per task
    /// and run is in flight at any time.
    active: Arc<Mutex<ActiveMap>>,
}

impl<R: ActionRunner> fmt::Debug for WorkerPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl<R: ActionRunner> WorkerPool<R> {
    pub fn new(runner: Arc<R>, size: usize, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let size = size.max(1);
        Self {
            invoker: ActionInvoker::new(runner),
            permits: Arc::new(Semaphore::new(size)),
            size,
            runtime_tx,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of attempts dispatched and not yet finished or aborted.
    pub fn in_flight(&self) -> usize {
        lock(&self.active).len()
    }

    fn dispatch(&self, attempt: ScheduledAttempt) {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let key = (attempt.run_id, attempt.task.name.clone());
        lock(&self.active).insert(key.clone(), cancel_tx);

        let invoker = self.invoker.clone();
        let permits = Arc::clone(&self.permits);
        let runtime_tx = self.runtime_tx.clone();
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            let ctx = RunContext::from(&attempt);

            // Either the attempt finishes (normal case), or its run is
            // aborted. Aborting drops the action future, which kills any
            // child process (kill_on_drop).
            let result = tokio::select! {
                _ = &mut cancel_rx => None,
                result = async {
                    let _permit = permits.acquire_owned().await.ok()?;
                    Some(invoker.invoke(&attempt.task, &ctx).await)
                } => result,
            };

            let Some(result) = result else {
                info!(
                    run_id = ctx.run_id,
                    task = %ctx.task,
                    attempt = ctx.attempt,
                    "attempt aborted; not reporting"
                );
                return;
            };

            lock(&active).remove(&key);

            let _ = runtime_tx
                .send(RuntimeEvent::AttemptFinished {
                    run_id: ctx.run_id,
                    task: ctx.task,
                    attempt: ctx.attempt,
                    result,
                })
                .await;
        });
    }
}

impl<R: ActionRunner> ExecutorBackend for WorkerPool<R> {
    fn spawn_ready_tasks(
        &mut self,
        attempts: Vec<ScheduledAttempt>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        for attempt in attempts {
            debug!(
                run_id = attempt.run_id,
                task = %attempt.task.name,
                attempt = attempt.attempt,
                "queueing attempt on worker pool"
            );
            self.dispatch(attempt);
        }
        Box::pin(std::future::ready(Ok(())))
    }

    fn abort_run(&mut self, run_id: RunId) {
        let mut active = lock(&self.active);
        let keys: Vec<_> = active
            .keys()
            .filter(|(id, _)| *id == run_id)
            .cloned()
            .collect();

        for key in keys {
            if let Some(cancel) = active.remove(&key) {
                if cancel.send(()).is_err() {
                    debug!(run_id, task = %key.1, "attempt already finished while aborting");
                }
            }
        }
    }
}

fn lock(active: &Mutex<ActiveMap>) -> MutexGuard<'_, ActiveMap> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
