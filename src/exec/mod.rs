// src/exec/mod.rs

//! Action execution layer.
//!
//! This module is responsible for running task actions and reporting each
//! attempt back to the orchestration runtime via `RuntimeEvent`s.
//!
//! - [`invoker`] defines the collaborator seam ([`ActionRunner`]) and the
//!   [`ActionInvoker`] that times attempts and enforces timeouts.
//! - [`shell`] is the production collaborator: `sh -c <action>`, plus the
//!   built-in `log:` console logger.
//! - [`pool`] runs attempts concurrently, bounded by `worker_pool_size`.
//! - [`backend`] provides the `ExecutorBackend` trait the runtime talks to,
//!   which tests can replace with a fake implementation.

pub mod backend;
pub mod invoker;
pub mod pool;
pub mod shell;

pub use backend::ExecutorBackend;
pub use invoker::{ActionInvoker, ActionReport, ActionRunner, RunContext};
pub use pool::WorkerPool;
pub use shell::ShellRunner;
