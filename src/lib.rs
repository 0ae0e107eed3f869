pub mod rules;
pub mod state;
pub mod watch;
pub mod parse;
pub mod process;
pub mod report;
pub mod engine;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export main types and functions for easier access
pub use engine::{ReportEngine, EngineConfig, EngineSummary, WatchSpec};
pub use parse::{ParseCursor, ParseOutcome, ParseStatus, ReportParser, ParserFactory, Parsers};
pub use report::{
    ParsingResult, TestCounts, InspectionCounts, DuplicateCounts,
    ReporterSet, TestReporter, InspectionReporter, DuplicationReporter,
    InspectionInstance, InspectionSeverity, DuplicationInfo, DuplicateFragment,
    Journal,
};
pub use rules::PathRules;
pub use state::{FileState, FileStateTracker};
pub use watch::{DirectoryWatcher, ReportTask, WatchRules, WatchSummary};

// Re-export utility functions
pub use utils::file_utils;
