// src/dag/mod.rs

//! Task DAG, registry and the per-run state machine.
//!
//! - [`descriptor`] holds the immutable task description loaded from config.
//! - [`graph`] keeps adjacency information and detects cycles.
//! - [`registry`] validates descriptors and fixes a stable topological order.
//! - [`execution`] and [`run`] are the records produced by each run.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   tasks are ready, retried, skipped or finished.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] implements the per-task transitions inside a run.

pub mod descriptor;
pub mod execution;
pub mod graph;
pub mod registry;
pub mod run;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use descriptor::{TaskDescriptor, TaskName};
pub use execution::{FailureKind, TaskExecution, TaskStatus};
pub use graph::DagGraph;
pub use registry::TaskRegistry;
pub use run::{Run, RunId, RunRecord, RunStatus};
pub use scheduler::RunScheduler;
pub use scheduler_step::{RetryRequest, ScheduledAttempt, SchedulerStep};
