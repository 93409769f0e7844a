// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::dag::TaskDescriptor;
use crate::types::{ConcurrencyLimit, HistoryStorageMode};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [schedule]
/// interval = "5m"
/// start = "2024-01-01T00:00:00Z"
/// catchup = false
/// max_concurrent_runs = 1
///
/// [runtime]
/// worker_pool_size = 4
/// history = "file"
///
/// [default]
/// retries = 1
/// retry_delay = "2m"
///
/// [[task]]
/// name = "A"
/// action = "echo A"
///
/// [[task]]
/// name = "B"
/// action = "echo B"
/// after = ["A"]
/// ```
///
/// Tasks are an array of tables so that declaration order survives
/// deserialization; it is the tie-break order of the topological sort.
///
/// `RawConfigFile` is unvalidated. Convert it with
/// `PipelineConfig::try_from(raw)` before using it.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Trigger configuration from `[schedule]`.
    #[serde(default)]
    pub schedule: ScheduleSection,

    /// Process-level knobs from `[runtime]`.
    #[serde(default)]
    pub runtime: RuntimeSection,

    /// Retry/timeout defaults from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// All tasks from `[[task]]`, in declaration order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// `[schedule]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    /// Fixed period between two triggers (e.g. `"5m"`).
    #[serde(default = "default_interval")]
    pub interval: String,

    /// RFC 3339 start boundary. Fire times are `start + k * interval`.
    #[serde(default)]
    pub start: Option<String>,

    /// Backfill of periods missed while the process was down. Only `false`
    /// is supported.
    #[serde(default)]
    pub catchup: bool,

    /// Maximum number of runs in flight. Omit for no limit.
    #[serde(default)]
    pub max_concurrent_runs: Option<usize>,
}

fn default_interval() -> String {
    "5m".to_string()
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            start: None,
            catchup: false,
            max_concurrent_runs: None,
        }
    }
}

/// `[runtime]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    /// Number of task attempts that may execute at the same time across all
    /// runs.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// `"file"` (default) or `"memory"`.
    #[serde(default)]
    pub history: HistoryStorageMode,

    /// Location of the JSON Lines history file, relative to the config file.
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_history_path() -> PathBuf {
    PathBuf::from(".pipetick/history.jsonl")
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            history: HistoryStorageMode::default(),
            history_path: default_history_path(),
        }
    }
}

/// `[default]` section, applied to tasks that don't override a field.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    /// Default retry count; if `None`, the global default is 1.
    #[serde(default)]
    pub retries: Option<u32>,

    /// Default delay between attempts; if `None`, the global default is 2m.
    #[serde(default)]
    pub retry_delay: Option<String>,

    /// Default per-attempt timeout; if `None`, attempts may run forever.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Unique task name.
    pub name: String,

    /// Opaque action reference handed to the action runner (a shell command,
    /// or `log:<message>` for the built-in console logger).
    pub action: String,

    /// Upstream tasks that must succeed first.
    #[serde(default, alias = "depends_on")]
    pub after: Vec<String>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub retry_delay: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,
}

impl TaskConfig {
    /// A task with no overrides.
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            after: Vec::new(),
            retries: None,
            retry_delay: None,
            timeout: None,
        }
    }
}

/// Validated trigger configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSettings {
    pub interval: Duration,
    pub start: DateTime<Utc>,
    pub max_concurrent_runs: ConcurrencyLimit,
}

/// Validated `[runtime]` configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub worker_pool_size: usize,
    pub history: HistoryStorageMode,
    pub history_path: PathBuf,
}

/// Fully validated configuration.
///
/// Construct via `PipelineConfig::try_from(RawConfigFile)` (see
/// `validate.rs`); the task list is guaranteed to form a DAG.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub schedule: ScheduleSettings,
    pub runtime: RuntimeSettings,
    /// Task descriptors in declaration order.
    pub tasks: Vec<TaskDescriptor>,
}
