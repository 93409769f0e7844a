use std::str::FromStr;
use serde::Deserialize;

/// Where finished runs are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStorageMode {
    /// Append run records to a JSON Lines file (`.pipetick/history.jsonl`).
    File,
    /// Keep run records in memory only (lost on restart).
    Memory,
}

impl Default for HistoryStorageMode {
    fn default() -> Self {
        HistoryStorageMode::File
    }
}

impl FromStr for HistoryStorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(HistoryStorageMode::File),
            "memory" => Ok(HistoryStorageMode::Memory),
            other => Err(format!(
                "invalid history mode: {other} (expected \"file\" or \"memory\")"
            )),
        }
    }
}

/// How many runs may be in flight at the same time.
///
/// - `Unbounded`: every clock tick starts a new run, even if earlier runs are
///   still executing.
/// - `AtMost(n)`: a trigger that arrives while `n` runs are active is dropped
///   and logged. It is never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyLimit {
    Unbounded,
    AtMost(usize),
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        ConcurrencyLimit::Unbounded
    }
}

impl From<Option<usize>> for ConcurrencyLimit {
    fn from(value: Option<usize>) -> Self {
        match value {
            Some(n) => ConcurrencyLimit::AtMost(n),
            None => ConcurrencyLimit::Unbounded,
        }
    }
}
