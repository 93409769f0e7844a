// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum AppendFault {
    #[default]
    None,
    /// Write nothing and fail.
    Fail,
    /// Write the first half of the data, then fail.
    Tear,
}

/// In-memory filesystem for tests. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    fault: Arc<Mutex<AppendFault>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.lock_files()
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    /// Current contents of a file, if it exists.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock_files()
            .get(path.as_ref())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Make every subsequent `append` fail, as a full disk would.
    pub fn fail_appends(&self, fail: bool) {
        self.set_fault(if fail { AppendFault::Fail } else { AppendFault::None });
    }

    /// Make every subsequent `append` write half of its data and then fail,
    /// as a crash or a full disk in the middle of a write would.
    pub fn tear_appends(&self, tear: bool) {
        self.set_fault(if tear { AppendFault::Tear } else { AppendFault::None });
    }

    fn set_fault(&self, fault: AppendFault) {
        *self
            .fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fault;
    }

    fn lock_files(&self) -> MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        self.files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        match self.lock_files().get(path) {
            Some(content) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock_files().contains_key(path)
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let fault = *self
            .fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let written = match fault {
            AppendFault::None => contents,
            AppendFault::Fail => &contents[..0],
            AppendFault::Tear => &contents[..contents.len() / 2],
        };
        self.lock_files()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(written);

        match fault {
            AppendFault::None => Ok(()),
            _ => Err(anyhow!("No space left on device: {:?}", path)),
        }
    }
}
