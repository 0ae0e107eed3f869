use std::sync::{Arc, Mutex};

use super::{TestReporter, InspectionReporter, DuplicationReporter, InspectionInstance, DuplicationInfo};

/// Shared append-only journal of reporter calls, preserving the global
/// emission order across reporter kinds. Used to assert exactly-once
/// behavior in tests.
#[derive(Debug, Default, Clone)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push(entry);
    }

    /// Snapshot of all recorded entries, in emission order
    pub fn events(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.clone()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Test reporter that journals every call
#[derive(Debug)]
pub struct RecordingTestReporter {
    journal: Journal,
}

impl RecordingTestReporter {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl TestReporter for RecordingTestReporter {
    fn suite_started(&mut self, name: &str) {
        self.journal.push(format!("suiteStarted {name}"));
    }

    fn suite_finished(&mut self, name: &str) {
        self.journal.push(format!("suiteFinished {name}"));
    }

    fn test_started(&mut self, name: &str) {
        self.journal.push(format!("testStarted {name}"));
    }

    fn test_ignored(&mut self, name: &str, reason: &str) {
        self.journal.push(format!("testIgnored {name} {reason}").trim_end().to_string());
    }

    fn test_failed(&mut self, name: &str, message: &str, trace: &str) {
        self.journal.push(format!("testFailed {name}: {message} | {trace}"));
    }

    fn test_std_out(&mut self, name: &str, out: &str) {
        self.journal.push(format!("testStdOut {name}: {out}"));
    }

    fn test_std_err(&mut self, name: &str, err: &str) {
        self.journal.push(format!("testStdErr {name}: {err}"));
    }

    fn test_finished(&mut self, name: &str, duration_millis: u64) {
        self.journal.push(format!("testFinished {name} {duration_millis}"));
    }

    fn info(&mut self, message: &str) {
        self.journal.push(format!("info {message}"));
    }

    fn warning(&mut self, message: &str) {
        self.journal.push(format!("warning {message}"));
    }

    fn error(&mut self, message: &str) {
        self.journal.push(format!("error {message}"));
    }
}

/// Inspection reporter that journals every call
#[derive(Debug)]
pub struct RecordingInspectionReporter {
    journal: Journal,
}

impl RecordingInspectionReporter {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl InspectionReporter for RecordingInspectionReporter {
    fn report_inspection_type(&mut self, id: &str, name: &str, category: &str, description: &str) {
        self.journal.push(format!("inspectionType {id} ({name}) category={category}: {description}"));
    }

    fn report_inspection(&mut self, inspection: &InspectionInstance) {
        self.journal.push(format!(
            "inspection {} [{}] {} at {}:{}",
            inspection.inspection_id,
            inspection.severity.as_str(),
            inspection.message,
            inspection.file_path,
            inspection.line
        ));
    }
}

/// Duplication reporter that journals every call
#[derive(Debug)]
pub struct RecordingDuplicationReporter {
    journal: Journal,
}

impl RecordingDuplicationReporter {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl DuplicationReporter for RecordingDuplicationReporter {
    fn start_duplicates(&mut self) {
        self.journal.push("startDuplicates".to_string());
    }

    fn report_duplicate(&mut self, duplicate: &DuplicationInfo) {
        let fragments = duplicate
            .fragments
            .iter()
            .map(|fragment| format!("{}:{}", fragment.path, fragment.line))
            .collect::<Vec<_>>()
            .join(", ");
        self.journal.push(format!(
            "duplicate lines={} tokens={} [{}]",
            duplicate.lines, duplicate.tokens, fragments
        ));
    }

    fn finish_duplicates(&mut self) {
        self.journal.push("finishDuplicates".to_string());
    }
}
