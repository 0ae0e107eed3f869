use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Serialize, Deserialize};

use crate::report::ParsingResult;

/// Lifecycle state of a watched report file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    /// Never seen, or forgotten after an I/O fault
    Unknown,

    /// Detected and enqueued or being parsed
    OnProcessing,

    /// Fully parsed; terminal
    Processed,

    /// Abandoned after an unrecoverable parse failure
    Error,

    /// Modification time precedes build start and out-of-date parsing is off
    OutOfDate,
}

#[derive(Debug)]
struct FileEntry {
    state: FileState,
    last_modified: SystemTime,
    length: u64,
    result: Option<ParsingResult>,
}

/// Thread-safe per-file state machine shared by the watcher and
/// processor threads.
///
/// State transitions that violate the machine's contract panic: they mean
/// the watcher/processor pairing has a logic bug, not that the input data
/// is bad.
#[derive(Debug, Default)]
pub struct FileStateTracker {
    files: Mutex<HashMap<PathBuf, FileEntry>>,
}

impl FileStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a path; Unknown when never seen
    pub fn file_state(&self, path: impl AsRef<Path>) -> FileState {
        let files = self.lock();
        match files.get(path.as_ref()) {
            Some(entry) => entry.state,
            None => FileState::Unknown,
        }
    }

    /// Start tracking a newly detected file.
    ///
    /// Panics if the file is already present.
    pub fn add_file(&self, path: impl AsRef<Path>, modified: SystemTime, length: u64) {
        let path = path.as_ref();
        let mut files = self.lock();
        if files.contains_key(path) {
            panic!("File {} is already present", path.display());
        }
        files.insert(path.to_path_buf(), FileEntry {
            state: FileState::OnProcessing,
            last_modified: modified,
            length,
            result: None,
        });
    }

    /// Record a successfully parsed file and its final result.
    ///
    /// Panics if the file is not on processing or already has a result.
    pub fn set_file_processed(&self, path: impl AsRef<Path>, result: ParsingResult) {
        let path = path.as_ref();
        let mut files = self.lock();
        let entry = files.get_mut(path)
            .unwrap_or_else(|| panic!("File {} is not present", path.display()));
        if entry.state != FileState::OnProcessing {
            panic!("File {} is not on processing", path.display());
        }
        if entry.result.is_some() {
            panic!("File {} is already processed", path.display());
        }
        entry.state = FileState::Processed;
        entry.result = Some(result);
    }

    /// Record a file abandoned after an unrecoverable parse failure,
    /// keeping whatever partial result had accumulated.
    ///
    /// Panics if the file is not on processing.
    pub fn set_file_error(&self, path: impl AsRef<Path>, result: ParsingResult) {
        let path = path.as_ref();
        let mut files = self.lock();
        let entry = files.get_mut(path)
            .unwrap_or_else(|| panic!("File {} is not present", path.display()));
        if entry.state != FileState::OnProcessing {
            panic!("File {} is not on processing", path.display());
        }
        entry.state = FileState::Error;
        entry.result = Some(result);
    }

    /// Record a file skipped by the freshness gate. Never clobbers a file
    /// that is already being processed or finished.
    pub fn mark_out_of_date(&self, path: impl AsRef<Path>, modified: SystemTime, length: u64) {
        let path = path.as_ref();
        let mut files = self.lock();
        match files.get_mut(path) {
            None => {
                files.insert(path.to_path_buf(), FileEntry {
                    state: FileState::OutOfDate,
                    last_modified: modified,
                    length,
                    result: None,
                });
            }
            Some(entry) if entry.state == FileState::OutOfDate => {
                entry.last_modified = modified;
                entry.length = length;
            }
            Some(_) => {}
        }
    }

    /// Forget a file so it can be re-detected from scratch (used after
    /// I/O faults such as the file disappearing mid-parse).
    ///
    /// Panics if the file is not present.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut files = self.lock();
        if files.remove(path).is_none() {
            panic!("File {} is not present", path.display());
        }
    }

    /// Last observation (modification time, byte length) recorded for a path
    pub fn observed(&self, path: impl AsRef<Path>) -> Option<(SystemTime, u64)> {
        let files = self.lock();
        files.get(path.as_ref()).map(|entry| (entry.last_modified, entry.length))
    }

    /// Re-enter processing from a terminal-for-now Error or OutOfDate state
    /// when the file has visibly grown since last observed.
    ///
    /// Returns true when the file was moved back to OnProcessing.
    pub fn reactivate_if_grown(&self, path: impl AsRef<Path>, modified: SystemTime, length: u64) -> bool {
        let path = path.as_ref();
        let mut files = self.lock();
        let Some(entry) = files.get_mut(path) else {
            return false;
        };
        if entry.state != FileState::Error && entry.state != FileState::OutOfDate {
            return false;
        }
        if modified > entry.last_modified || length > entry.length {
            entry.state = FileState::OnProcessing;
            entry.last_modified = modified;
            entry.length = length;
            entry.result = None;
            true
        } else {
            false
        }
    }

    /// Final result stored for a processed or abandoned file
    pub fn result(&self, path: impl AsRef<Path>) -> Option<ParsingResult> {
        let files = self.lock();
        files.get(path.as_ref()).and_then(|entry| entry.result)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, FileEntry>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
