// src/history/mod.rs

//! Run history: the append-only record of finalized runs.
//!
//! - [`memory`] keeps records in process memory.
//! - [`file`] appends one JSON line per run to a history file.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dag::{Run, RunId, RunRecord};
use crate::errors::{PipetickError, Result};
use crate::fs::RealFileSystem;
use crate::types::HistoryStorageMode;

pub mod file;
pub mod memory;

pub use file::FileHistory;
pub use memory::MemoryHistory;

/// Append-only store of finalized runs.
///
/// `append` is atomic per run: readers see either the whole record (run and
/// every task execution) or nothing. There is no update or delete.
pub trait RunHistoryStore: Send + Sync + Debug {
    fn append(&self, record: &RunRecord) -> Result<()>;

    fn get(&self, run_id: RunId) -> Result<Option<RunRecord>>;

    /// Runs triggered at or after `since`, by trigger timestamp ascending
    /// (run id breaks ties).
    fn list(&self, since: DateTime<Utc>) -> Result<Vec<Run>>;

    /// Largest recorded run id, used to resume the id counter.
    fn last_run_id(&self) -> Result<Option<RunId>>;
}

/// Open the store selected by `[runtime].history`.
pub fn open_store(mode: HistoryStorageMode, path: &Path) -> Result<Arc<dyn RunHistoryStore>> {
    match mode {
        HistoryStorageMode::Memory => Ok(Arc::new(MemoryHistory::new())),
        HistoryStorageMode::File => Ok(Arc::new(FileHistory::open(
            Arc::new(RealFileSystem),
            path.to_path_buf(),
        )?)),
    }
}

/// Reject records that could still change.
pub(crate) fn ensure_finalized(record: &RunRecord) -> Result<()> {
    if !record.run.status.is_terminal() || record.run.finished_at.is_none() {
        return Err(PipetickError::HistoryError(format!(
            "run {} is not finalized (status {:?})",
            record.run.id, record.run.status
        )));
    }
    if let Some(open) = record.executions.iter().find(|e| !e.status.is_terminal()) {
        return Err(PipetickError::HistoryError(format!(
            "run {} has unfinished task '{}' ({:?})",
            record.run.id, open.task, open.status
        )));
    }
    Ok(())
}

pub(crate) fn duplicate_run(run_id: RunId) -> PipetickError {
    PipetickError::HistoryError(format!("run {run_id} is already recorded"))
}

pub(crate) fn sorted_since<'a>(
    records: impl Iterator<Item = &'a RunRecord>,
    since: DateTime<Utc>,
) -> Vec<Run> {
    let mut runs: Vec<Run> = records
        .filter(|r| r.run.triggered_at >= since)
        .map(|r| r.run.clone())
        .collect();
    runs.sort_by_key(|run| (run.triggered_at, run.id));
    runs
}
