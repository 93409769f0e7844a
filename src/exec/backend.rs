// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production implementation in [`super::pool`].
//!
//! - `WorkerPool` is the default implementation used by `pipetick`. It runs
//!   each attempt on its own Tokio task, gated by a semaphore.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which attempts were scheduled and directly emits `AttemptFinished`
//!   events.

use std::future::Future;
use std::pin::Pin;

use crate::dag::{RunId, ScheduledAttempt};
use crate::errors::Result;

/// Trait abstracting how scheduled attempts are executed.
///
/// Implementations report every attempt they were given exactly once via
/// `RuntimeEvent::AttemptFinished`, unless the attempt's run is aborted.
pub trait ExecutorBackend: Send {
    /// Dispatch the given attempts for execution.
    fn spawn_ready_tasks(
        &mut self,
        attempts: Vec<ScheduledAttempt>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop every in-flight attempt of `run_id` without reporting it.
    fn abort_run(&mut self, run_id: RunId) {
        let _ = run_id;
    }
}
