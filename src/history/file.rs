// src/history/file.rs

//! JSON Lines history file.
//!
//! One finalized [`RunRecord`] per line. Each append is a single write of a
//! complete line, so a reader never sees half a run. A process killed in
//! the middle of a write can leave a truncated last line, and a failed
//! append can leave a truncated line that later records follow. Both are
//! skipped with a warning when the file is loaded; any other unreadable line
//! is an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{duplicate_run, ensure_finalized, sorted_since, RunHistoryStore};
use crate::dag::{Run, RunId, RunRecord};
use crate::errors::{PipetickError, Result};
use crate::fs::FileSystem;

#[derive(Debug)]
struct Loaded {
    records: BTreeMap<RunId, RunRecord>,
    /// The file doesn't end with a newline (truncated tail); the next
    /// append must start a fresh line.
    needs_newline: bool,
}

#[derive(Debug)]
pub struct FileHistory {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    state: Mutex<Loaded>,
}

impl FileHistory {
    /// Open (or lazily create) the history file at `path`.
    pub fn open(fs: Arc<dyn FileSystem>, path: PathBuf) -> Result<Self> {
        let loaded = if fs.exists(&path) {
            let text = fs.read_to_string(&path)?;
            parse_history(&path, &text)?
        } else {
            debug!(path = %path.display(), "history file does not exist yet");
            Loaded {
                records: BTreeMap::new(),
                needs_newline: false,
            }
        };

        debug!(
            path = %path.display(),
            runs = loaded.records.len(),
            "history loaded"
        );

        Ok(Self {
            fs,
            path,
            state: Mutex::new(loaded),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Loaded>> {
        self.state
            .lock()
            .map_err(|_| PipetickError::HistoryError("history lock poisoned".to_string()))
    }
}

impl RunHistoryStore for FileHistory {
    fn append(&self, record: &RunRecord) -> Result<()> {
        ensure_finalized(record)?;

        let mut state = self.lock()?;
        if state.records.contains_key(&record.run.id) {
            return Err(duplicate_run(record.run.id));
        }

        let mut line = Vec::new();
        if state.needs_newline {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record)?;
        line.push(b'\n');

        if let Err(e) = self.fs.append(&self.path, &line) {
            // Part of the line may have reached the file.
            state.needs_newline = true;
            return Err(PipetickError::HistoryError(format!(
                "appending run {} to {}: {e:#}",
                record.run.id,
                self.path.display()
            )));
        }

        state.needs_newline = false;
        state.records.insert(record.run.id, record.clone());
        Ok(())
    }

    fn get(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        Ok(self.lock()?.records.get(&run_id).cloned())
    }

    fn list(&self, since: DateTime<Utc>) -> Result<Vec<Run>> {
        Ok(sorted_since(self.lock()?.records.values(), since))
    }

    fn last_run_id(&self) -> Result<Option<RunId>> {
        Ok(self.lock()?.records.keys().next_back().copied())
    }
}

fn parse_history(path: &Path, text: &str) -> Result<Loaded> {
    let complete = text.is_empty() || text.ends_with('\n');
    let lines: Vec<&str> = text.lines().collect();
    let mut records = BTreeMap::new();
    let needs_newline = !complete;

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let is_tail = idx + 1 == lines.len() && !complete;
        let record: RunRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            // A failed or interrupted append leaves a prefix of a record:
            // at the end of the file, or followed by later records once
            // writing resumed on a fresh line.
            Err(err) if is_tail || err.is_eof() => {
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %err,
                    "skipping truncated history line"
                );
                continue;
            }
            Err(err) => {
                return Err(PipetickError::HistoryError(format!(
                    "{}:{}: corrupt history line: {err}",
                    path.display(),
                    idx + 1
                )));
            }
        };

        if records.contains_key(&record.run.id) {
            warn!(
                path = %path.display(),
                run_id = record.run.id,
                "duplicate run id in history; keeping the first record"
            );
            continue;
        }
        records.insert(record.run.id, record);
    }

    Ok(Loaded {
        records,
        needs_newline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{RunStatus, TaskExecution, TaskStatus};
    use crate::engine::TriggerReason;
    use crate::fs::mock::MockFileSystem;

    fn record(id: RunId) -> RunRecord {
        let at = DateTime::<Utc>::UNIX_EPOCH;
        let mut exec = TaskExecution::pending(id, "A");
        exec.status = TaskStatus::Success;
        exec.attempts = 1;
        RunRecord {
            run: Run {
                id,
                triggered_at: at,
                reason: TriggerReason::Manual,
                status: RunStatus::Success,
                started_at: at,
                finished_at: Some(at),
            },
            executions: vec![exec],
        }
    }

    fn path() -> PathBuf {
        PathBuf::from("/state/history.jsonl")
    }

    #[test]
    fn appends_one_line_per_run() {
        let fs = MockFileSystem::new();
        let store = FileHistory::open(Arc::new(fs.clone()), path()).unwrap();

        store.append(&record(1)).unwrap();
        store.append(&record(2)).unwrap();

        let text = fs.contents(path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));

        let reopened = FileHistory::open(Arc::new(fs), path()).unwrap();
        assert_eq!(reopened.get(2).unwrap(), Some(record(2)));
        assert_eq!(reopened.last_run_id().unwrap(), Some(2));
    }

    #[test]
    fn truncated_tail_is_skipped_and_next_append_starts_new_line() {
        let fs = MockFileSystem::new();
        let full = serde_json::to_string(&record(1)).unwrap();
        let partial = &serde_json::to_string(&record(2)).unwrap()[..20];
        fs.add_file(path(), format!("{full}\n{partial}"));

        let store = FileHistory::open(Arc::new(fs.clone()), path()).unwrap();
        assert_eq!(store.last_run_id().unwrap(), Some(1));

        store.append(&record(3)).unwrap();

        let reopened = FileHistory::open(Arc::new(fs), path()).unwrap();
        let ids: Vec<_> = reopened
            .list(DateTime::<Utc>::MIN_UTC)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, [1, 3]);
    }

    #[test]
    fn corruption_in_the_middle_is_an_error() {
        let fs = MockFileSystem::new();
        let full = serde_json::to_string(&record(1)).unwrap();
        fs.add_file(path(), format!("not json\n{full}\n"));

        let err = FileHistory::open(Arc::new(fs), path()).unwrap_err();
        assert!(matches!(err, PipetickError::HistoryError(_)));
    }

    #[test]
    fn failed_write_leaves_nothing_visible() {
        let fs = MockFileSystem::new();
        let store = FileHistory::open(Arc::new(fs.clone()), path()).unwrap();

        fs.fail_appends(true);
        assert!(store.append(&record(1)).is_err());
        assert_eq!(store.get(1).unwrap(), None);

        fs.fail_appends(false);
        store.append(&record(1)).unwrap();
        assert!(store.get(1).unwrap().is_some());
    }

    #[test]
    fn torn_write_does_not_corrupt_the_next_record() {
        let fs = MockFileSystem::new();
        let store = FileHistory::open(Arc::new(fs.clone()), path()).unwrap();
        store.append(&record(1)).unwrap();

        fs.tear_appends(true);
        assert!(store.append(&record(2)).is_err());
        assert_eq!(store.get(2).unwrap(), None);

        fs.tear_appends(false);
        store.append(&record(3)).unwrap();

        let reopened = FileHistory::open(Arc::new(fs), path()).unwrap();
        let ids: Vec<_> = reopened
            .list(DateTime::<Utc>::MIN_UTC)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, [1, 3]);
    }

    #[test]
    fn failed_write_then_success_reads_back() {
        let fs = MockFileSystem::new();
        let store = FileHistory::open(Arc::new(fs.clone()), path()).unwrap();

        fs.fail_appends(true);
        assert!(store.append(&record(1)).is_err());
        fs.fail_appends(false);
        store.append(&record(2)).unwrap();

        let reopened = FileHistory::open(Arc::new(fs), path()).unwrap();
        assert_eq!(reopened.last_run_id().unwrap(), Some(2));
    }
}
