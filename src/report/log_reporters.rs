use log::{info, warn, error};

use super::{TestReporter, InspectionReporter, DuplicationReporter, InspectionInstance, DuplicationInfo};

/// Test reporter that renders lifecycle events into the build log via the
/// `log` facade. The concrete wire format of a real build server stays
/// behind that facade.
#[derive(Debug, Default)]
pub struct BuildLogTestReporter {}

impl TestReporter for BuildLogTestReporter {
    fn suite_started(&mut self, name: &str) {
        info!("Test suite started: {name}");
    }

    fn suite_finished(&mut self, name: &str) {
        info!("Test suite finished: {name}");
    }

    fn test_started(&mut self, name: &str) {
        info!("Test started: {name}");
    }

    fn test_ignored(&mut self, name: &str, reason: &str) {
        info!("Test ignored: {name} {reason}");
    }

    fn test_failed(&mut self, name: &str, message: &str, trace: &str) {
        warn!("Test failed: {name}: {message}\n{trace}");
    }

    fn test_std_out(&mut self, name: &str, out: &str) {
        info!("System out from test {name}: {out}");
    }

    fn test_std_err(&mut self, name: &str, err: &str) {
        warn!("System error from test {name}: {err}");
    }

    fn test_finished(&mut self, name: &str, duration_millis: u64) {
        info!("Test finished: {name} ({duration_millis} ms)");
    }

    fn info(&mut self, message: &str) {
        info!("{message}");
    }

    fn warning(&mut self, message: &str) {
        warn!("{message}");
    }

    fn error(&mut self, message: &str) {
        error!("{message}");
    }
}

#[derive(Debug, Default)]
pub struct BuildLogInspectionReporter {}

impl InspectionReporter for BuildLogInspectionReporter {
    fn report_inspection_type(&mut self, id: &str, name: &str, category: &str, description: &str) {
        info!("Inspection type {id} ({name}), category {category}: {description}");
    }

    fn report_inspection(&mut self, inspection: &InspectionInstance) {
        info!(
            "[{}] {}: {} at {}:{}",
            inspection.severity.as_str(),
            inspection.inspection_id,
            inspection.message,
            inspection.file_path,
            inspection.line
        );
    }
}

#[derive(Debug, Default)]
pub struct BuildLogDuplicationReporter {}

impl DuplicationReporter for BuildLogDuplicationReporter {
    fn start_duplicates(&mut self) {
        info!("Duplicates block started");
    }

    fn report_duplicate(&mut self, duplicate: &DuplicationInfo) {
        let fragments = duplicate
            .fragments
            .iter()
            .map(|fragment| format!("{}:{}", fragment.path, fragment.line))
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            "Duplicate of {} line(s), {} token(s): {}",
            duplicate.lines, duplicate.tokens, fragments
        );
    }

    fn finish_duplicates(&mut self) {
        info!("Duplicates block finished");
    }
}
