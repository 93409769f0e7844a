// src/history/memory.rs

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::{duplicate_run, ensure_finalized, sorted_since, RunHistoryStore};
use crate::dag::{Run, RunId, RunRecord};
use crate::errors::{PipetickError, Result};

/// Records kept in memory; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: RwLock<BTreeMap<RunId, RunRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<RunId, RunRecord>>> {
        self.records
            .read()
            .map_err(|_| PipetickError::HistoryError("history lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<RunId, RunRecord>>> {
        self.records
            .write()
            .map_err(|_| PipetickError::HistoryError("history lock poisoned".to_string()))
    }
}

impl RunHistoryStore for MemoryHistory {
    fn append(&self, record: &RunRecord) -> Result<()> {
        ensure_finalized(record)?;

        let mut records = self.write()?;
        if records.contains_key(&record.run.id) {
            return Err(duplicate_run(record.run.id));
        }
        records.insert(record.run.id, record.clone());
        Ok(())
    }

    fn get(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        Ok(self.read()?.get(&run_id).cloned())
    }

    fn list(&self, since: DateTime<Utc>) -> Result<Vec<Run>> {
        Ok(sorted_since(self.read()?.values(), since))
    }

    fn last_run_id(&self) -> Result<Option<RunId>> {
        Ok(self.read()?.keys().next_back().copied())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::dag::{RunStatus, TaskExecution, TaskStatus};
    use crate::engine::TriggerReason;

    fn record(id: RunId, minutes: i64) -> RunRecord {
        let at = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::minutes(minutes);
        let mut exec = TaskExecution::pending(id, "A");
        exec.status = TaskStatus::Success;
        exec.attempts = 1;
        RunRecord {
            run: Run {
                id,
                triggered_at: at,
                reason: TriggerReason::Schedule,
                status: RunStatus::Success,
                started_at: at,
                finished_at: Some(at),
            },
            executions: vec![exec],
        }
    }

    #[test]
    fn list_orders_by_trigger_time() {
        let store = MemoryHistory::new();
        store.append(&record(1, 10)).unwrap();
        store.append(&record(2, 5)).unwrap();
        store.append(&record(3, 15)).unwrap();

        let ids: Vec<_> = store
            .list(DateTime::<Utc>::UNIX_EPOCH + TimeDelta::minutes(5))
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, [2, 1, 3]);

        let later: Vec<_> = store
            .list(DateTime::<Utc>::UNIX_EPOCH + TimeDelta::minutes(11))
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(later, [3]);
        assert_eq!(store.last_run_id().unwrap(), Some(3));
    }

    #[test]
    fn records_are_immutable_once_appended() {
        let store = MemoryHistory::new();
        store.append(&record(1, 0)).unwrap();

        let mut changed = record(1, 0);
        changed.run.status = RunStatus::Failed;
        assert!(matches!(
            store.append(&changed),
            Err(PipetickError::HistoryError(_))
        ));
        assert_eq!(store.get(1).unwrap().unwrap().run.status, RunStatus::Success);
    }

    #[test]
    fn unfinished_runs_are_rejected() {
        let store = MemoryHistory::new();
        let mut running = record(1, 0);
        running.run.status = RunStatus::Running;
        assert!(store.append(&running).is_err());

        let mut open_task = record(2, 0);
        open_task.executions[0].status = TaskStatus::Retrying;
        assert!(store.append(&open_task).is_err());

        assert!(store.get(1).unwrap().is_none());
        assert_eq!(store.last_run_id().unwrap(), None);
    }
}
