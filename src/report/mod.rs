mod result;
mod log_reporters;
mod recording;

use serde::{Serialize, Deserialize};

pub use result::{ParsingResult, TestCounts, InspectionCounts, DuplicateCounts};
pub use log_reporters::{BuildLogTestReporter, BuildLogInspectionReporter, BuildLogDuplicationReporter};
pub use recording::{Journal, RecordingTestReporter, RecordingInspectionReporter, RecordingDuplicationReporter};

/// Severity of a reported inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InspectionSeverity {
    Error,
    Warning,
    Info,
}

impl InspectionSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionSeverity::Error => "ERROR",
            InspectionSeverity::Warning => "WARNING",
            InspectionSeverity::Info => "INFO",
        }
    }
}

/// One static-analysis finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionInstance {
    /// Inspection type id, e.g. a bug pattern name
    pub inspection_id: String,

    /// Human-readable finding message
    pub message: String,

    /// Source path the finding points at, relative to the checkout dir
    /// where possible
    pub file_path: String,

    /// 1-based source line, 0 when the report did not carry one
    pub line: u32,

    pub severity: InspectionSeverity,
}

/// One fragment of duplicated code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateFragment {
    pub path: String,
    pub line: u32,
}

/// One duplicate-code block spanning two or more fragments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicationInfo {
    pub lines: u32,
    pub tokens: u32,
    pub fragments: Vec<DuplicateFragment>,
}

/// Sink for test suite/case lifecycle events.
///
/// Called from exactly one thread at a time; implementations do not need
/// to be thread-safe beyond being movable across threads.
pub trait TestReporter: Send {
    fn suite_started(&mut self, name: &str);
    fn suite_finished(&mut self, name: &str);
    fn test_started(&mut self, name: &str);
    fn test_ignored(&mut self, name: &str, reason: &str);
    fn test_failed(&mut self, name: &str, message: &str, trace: &str);
    fn test_std_out(&mut self, name: &str, out: &str);
    fn test_std_err(&mut self, name: &str, err: &str);
    fn test_finished(&mut self, name: &str, duration_millis: u64);

    /// Free-form diagnostics attached to the test log
    fn info(&mut self, message: &str);
    fn warning(&mut self, message: &str);
    fn error(&mut self, message: &str);
}

/// Sink for static-analysis findings
pub trait InspectionReporter: Send {
    /// Announces an inspection type before any finding of that type.
    /// The parser guarantees at most one announcement per type id per file.
    fn report_inspection_type(&mut self, id: &str, name: &str, category: &str, description: &str);

    fn report_inspection(&mut self, inspection: &InspectionInstance);
}

/// Sink for duplicate-code blocks
pub trait DuplicationReporter: Send {
    fn start_duplicates(&mut self);
    fn report_duplicate(&mut self, duplicate: &DuplicationInfo);
    fn finish_duplicates(&mut self);
}

/// The full set of downstream sinks handed to the processor thread
pub struct ReporterSet {
    pub tests: Box<dyn TestReporter>,
    pub inspections: Box<dyn InspectionReporter>,
    pub duplicates: Box<dyn DuplicationReporter>,
}

impl ReporterSet {
    /// Reporters that render everything through the `log` facade
    pub fn build_log() -> Self {
        Self {
            tests: Box::new(BuildLogTestReporter::default()),
            inspections: Box::new(BuildLogInspectionReporter::default()),
            duplicates: Box::new(BuildLogDuplicationReporter::default()),
        }
    }

    /// Reporters that append every call to a shared journal, preserving
    /// global event order
    pub fn recording(journal: &Journal) -> Self {
        Self {
            tests: Box::new(RecordingTestReporter::new(journal.clone())),
            inspections: Box::new(RecordingInspectionReporter::new(journal.clone())),
            duplicates: Box::new(RecordingDuplicationReporter::new(journal.clone())),
        }
    }
}

impl std::fmt::Debug for ReporterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReporterSet").finish_non_exhaustive()
    }
}
