use std::path::Path;

use log::{info, error};
use serde::{Serialize, Deserialize};

/// Suite/test totals for one test report file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub suites: usize,
    pub tests: usize,
}

/// Finding totals for one static-analysis report file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionCounts {
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

/// Duplicate-block totals for one duplication report file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCounts {
    pub duplicates: usize,
}

/// Summary counters accumulated while parsing one report file, foldable
/// into a build-wide total per report type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParsingResult {
    Tests(TestCounts),
    Inspections(InspectionCounts),
    Duplicates(DuplicateCounts),
}

impl ParsingResult {
    /// Fold another result of the same kind into this one.
    ///
    /// Panics on mismatched kinds: results are accumulated per report
    /// type, so a mismatch is a processor logic bug.
    pub fn accumulate(&mut self, other: &ParsingResult) {
        match (self, other) {
            (ParsingResult::Tests(mine), ParsingResult::Tests(theirs)) => {
                mine.suites += theirs.suites;
                mine.tests += theirs.tests;
            }
            (ParsingResult::Inspections(mine), ParsingResult::Inspections(theirs)) => {
                mine.errors += theirs.errors;
                mine.warnings += theirs.warnings;
                mine.infos += theirs.infos;
            }
            (ParsingResult::Duplicates(mine), ParsingResult::Duplicates(theirs)) => {
                mine.duplicates += theirs.duplicates;
            }
            (mine, theirs) => {
                panic!("Cannot accumulate {:?} into {:?}", theirs, mine);
            }
        }
    }

    /// The counts gained since an earlier snapshot of the same file.
    ///
    /// A re-parse after a file regrows re-derives the whole file, so its
    /// result supersedes (not adds to) the partial result recorded when
    /// the file was abandoned earlier.
    pub fn delta_since(&self, earlier: &ParsingResult) -> ParsingResult {
        match (self, earlier) {
            (ParsingResult::Tests(now), ParsingResult::Tests(before)) => {
                ParsingResult::Tests(TestCounts {
                    suites: now.suites.saturating_sub(before.suites),
                    tests: now.tests.saturating_sub(before.tests),
                })
            }
            (ParsingResult::Inspections(now), ParsingResult::Inspections(before)) => {
                ParsingResult::Inspections(InspectionCounts {
                    errors: now.errors.saturating_sub(before.errors),
                    warnings: now.warnings.saturating_sub(before.warnings),
                    infos: now.infos.saturating_sub(before.infos),
                })
            }
            (ParsingResult::Duplicates(now), ParsingResult::Duplicates(before)) => {
                ParsingResult::Duplicates(DuplicateCounts {
                    duplicates: now.duplicates.saturating_sub(before.duplicates),
                })
            }
            (now, before) => {
                panic!("Cannot diff {:?} against {:?}", now, before);
            }
        }
    }

    /// One summary log line for a finished file
    pub fn log_file_result(&self, file: &Path) {
        info!("{} report processed: {}", file.display(), self.describe());
    }

    /// One summary log line for all processed files of a type
    pub fn log_total_result(&self, type_name: &str) {
        info!("{} reports total: {}", type_name, self.describe());
    }

    /// Check configured limits against accumulated inspection totals,
    /// logging a build-status style failure line when exceeded.
    ///
    /// Returns true when a limit was exceeded.
    pub fn check_limits(&self, max_errors: Option<usize>, max_warnings: Option<usize>) -> bool {
        let ParsingResult::Inspections(counts) = self else {
            return false;
        };
        let mut limit_reached = false;
        if let Some(limit) = max_errors {
            if counts.errors > limit {
                error!("Errors limit reached: found {} errors, limit {}", counts.errors, limit);
                limit_reached = true;
            }
        }
        if let Some(limit) = max_warnings {
            if counts.warnings > limit {
                error!("Warnings limit reached: found {} warnings, limit {}", counts.warnings, limit);
                limit_reached = true;
            }
        }
        if limit_reached {
            error!(
                "Build status: FAILURE (errors: {}, warnings: {}, information: {})",
                counts.errors, counts.warnings, counts.infos
            );
        }
        limit_reached
    }

    fn describe(&self) -> String {
        match self {
            ParsingResult::Tests(counts) => {
                format!("{} suite(s), {} test(s)", counts.suites, counts.tests)
            }
            ParsingResult::Inspections(counts) => format!(
                "{} error(s), {} warning(s), {} info message(s)",
                counts.errors, counts.warnings, counts.infos
            ),
            ParsingResult::Duplicates(counts) => {
                format!("{} duplicate(s)", counts.duplicates)
            }
        }
    }
}
