// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::RunId;

#[derive(Error, Debug)]
pub enum PipetickError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("History error: {0}")]
    HistoryError(String),

    #[error("Scheduler is not running")]
    SchedulerStopped,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipetickError {
    /// Whether this error belongs to the startup-fatal configuration class
    /// (bad DAG, unknown references, invalid settings).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipetickError::ConfigError(_) | PipetickError::DagCycle(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipetickError>;
