#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};

    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use tempfile::tempdir;

    use crate::parse::{ParseCursor, EmissionGate, seconds_to_millis, qualified_name};
    use crate::report::{ParsingResult, TestCounts, InspectionCounts};
    use crate::rules::PathRules;
    use crate::state::{FileState, FileStateTracker};
    use crate::utils::mtime_seconds;

    #[test]
    fn test_root_paths_prune_nested_roots() -> Result<()> {
        let rules = PathRules::new(&["a/b", "a/b/c"], "/base")?;

        let roots: Vec<PathBuf> = rules.root_paths().iter().cloned().collect();
        assert_eq!(roots, vec![PathBuf::from("/base/a/b")], "Nested root should be pruned");
        Ok(())
    }

    #[test]
    fn test_root_paths_keep_sibling_roots() -> Result<()> {
        let rules = PathRules::new(&["a/b", "a/d"], "/base")?;

        let roots: Vec<PathBuf> = rules.root_paths().iter().cloned().collect();
        assert_eq!(
            roots,
            vec![PathBuf::from("/base/a/b"), PathBuf::from("/base/a/d")],
            "Sibling roots should both be kept"
        );
        Ok(())
    }

    #[test]
    fn test_root_paths_drop_excluded_roots() -> Result<()> {
        let rules = PathRules::new(&["a/b", "a/b/c", "-:a/b"], "/base")?;

        assert!(rules.root_paths().is_empty(), "Excluded roots should be pruned");
        Ok(())
    }

    #[test]
    fn test_glob_rules_use_prefix_root() -> Result<()> {
        let rules = PathRules::new(&["reports/**/*.xml"], "/base")?;

        let roots: Vec<PathBuf> = rules.root_paths().iter().cloned().collect();
        assert_eq!(roots, vec![PathBuf::from("/base/reports")]);
        Ok(())
    }

    #[test_case("reports/a/ok.xml", true ; "matching include glob")]
    #[test_case("reports/tmp/skip.xml", false ; "excluded subtree")]
    #[test_case("elsewhere/foo.xml", false ; "outside all roots")]
    fn test_should_include(path: &str, expected: bool) {
        let rules = PathRules::new(&["reports/**/*.xml", "-:reports/tmp/**"], "/base")
            .expect("rules should parse");

        assert_eq!(rules.should_include(Path::new("/base").join(path)), expected);
    }

    #[test]
    fn test_collect_files_expands_globs_live() -> Result<()> {
        let temp_dir = tempdir()?;
        let base = temp_dir.path();
        fs::create_dir_all(base.join("reports/sub"))?;
        fs::create_dir_all(base.join("reports/tmp"))?;
        fs::write(base.join("reports/one.xml"), "<x/>")?;
        fs::write(base.join("reports/sub/two.xml"), "<x/>")?;
        fs::write(base.join("reports/sub/notes.txt"), "text")?;
        fs::write(base.join("reports/tmp/three.xml"), "<x/>")?;

        let rules = PathRules::new(&["reports/**/*.xml", "-:reports/tmp/**"], base)?;
        let files = rules.collect_files();

        assert_eq!(
            files,
            vec![base.join("reports/one.xml"), base.join("reports/sub/two.xml")],
            "Collection should honor globs and excludes"
        );
        Ok(())
    }

    #[test]
    fn test_collect_files_with_no_rules_is_empty() -> Result<()> {
        let no_rules: [&str; 0] = [];
        let rules = PathRules::new(&no_rules, "/base")?;

        assert!(rules.root_paths().is_empty());
        assert!(rules.collect_files().is_empty());
        Ok(())
    }

    #[test]
    fn test_plain_file_rule_collects_single_file() -> Result<()> {
        let temp_dir = tempdir()?;
        let base = temp_dir.path();
        fs::write(base.join("report.xml"), "<x/>")?;

        let rules = PathRules::new(&["report.xml"], base)?;
        let files = rules.collect_files();

        assert_eq!(files, vec![base.join("report.xml")]);
        Ok(())
    }

    #[test]
    fn test_tracker_happy_path() {
        let tracker = FileStateTracker::new();
        let path = Path::new("/tmp/report.xml");
        let now = SystemTime::now();

        assert_eq!(tracker.file_state(path), FileState::Unknown);

        tracker.add_file(path, now, 10);
        assert_eq!(tracker.file_state(path), FileState::OnProcessing);

        tracker.set_file_processed(path, ParsingResult::Tests(TestCounts { suites: 1, tests: 2 }));
        assert_eq!(tracker.file_state(path), FileState::Processed);
        assert_eq!(
            tracker.result(path),
            Some(ParsingResult::Tests(TestCounts { suites: 1, tests: 2 }))
        );

        tracker.remove_file(path);
        assert_eq!(tracker.file_state(path), FileState::Unknown);
    }

    #[test]
    #[should_panic(expected = "already present")]
    fn test_tracker_rejects_double_add() {
        let tracker = FileStateTracker::new();
        let now = SystemTime::now();
        tracker.add_file("/tmp/report.xml", now, 1);
        tracker.add_file("/tmp/report.xml", now, 1);
    }

    #[test]
    #[should_panic(expected = "not on processing")]
    fn test_tracker_rejects_processing_a_processed_file() {
        let tracker = FileStateTracker::new();
        let now = SystemTime::now();
        tracker.add_file("/tmp/report.xml", now, 1);
        tracker.set_file_processed("/tmp/report.xml", ParsingResult::Tests(TestCounts::default()));
        tracker.set_file_processed("/tmp/report.xml", ParsingResult::Tests(TestCounts::default()));
    }

    #[test]
    #[should_panic(expected = "not present")]
    fn test_tracker_rejects_removing_unknown_file() {
        let tracker = FileStateTracker::new();
        tracker.remove_file("/tmp/report.xml");
    }

    #[test]
    fn test_tracker_reactivates_grown_error_file() {
        let tracker = FileStateTracker::new();
        let path = Path::new("/tmp/report.xml");
        let then = SystemTime::now();

        tracker.add_file(path, then, 10);
        tracker.set_file_error(path, ParsingResult::Tests(TestCounts { suites: 1, tests: 0 }));
        assert_eq!(tracker.file_state(path), FileState::Error);

        assert!(!tracker.reactivate_if_grown(path, then, 10), "Unchanged file must stay abandoned");
        assert_eq!(tracker.file_state(path), FileState::Error);

        assert!(tracker.reactivate_if_grown(path, then + Duration::from_secs(1), 20));
        assert_eq!(tracker.file_state(path), FileState::OnProcessing);
    }

    #[test]
    fn test_tracker_never_reactivates_processed_file() {
        let tracker = FileStateTracker::new();
        let path = Path::new("/tmp/report.xml");
        let then = SystemTime::now();

        tracker.add_file(path, then, 10);
        tracker.set_file_processed(path, ParsingResult::Tests(TestCounts::default()));

        assert!(!tracker.reactivate_if_grown(path, then + Duration::from_secs(5), 50));
        assert_eq!(tracker.file_state(path), FileState::Processed);
    }

    #[test]
    fn test_emission_gate_suppresses_reported_prefix() {
        // First pass: one suite-started event from a still-open unit.
        let mut gate = EmissionGate::new(ParseCursor::start());
        let mut emitted = Vec::new();
        gate.emit(|| emitted.push("suiteStarted"));
        assert_eq!(emitted, vec!["suiteStarted"]);
        let resume = gate.cursor();

        // Second pass re-derives the suite-started event, then sees the
        // rest of the unit.
        let mut gate = EmissionGate::new(resume);
        let mut emitted = Vec::new();
        gate.emit(|| emitted.push("suiteStarted"));
        gate.emit(|| emitted.push("testStarted"));
        gate.emit(|| emitted.push("testFinished"));
        gate.emit(|| emitted.push("suiteFinished"));
        gate.unit_closed();
        assert_eq!(emitted, vec!["testStarted", "testFinished", "suiteFinished"]);
        assert_eq!(gate.emitted(), 3);
        assert!(gate.cursor() > resume, "Cursor must advance as units close");

        // Third pass over the unchanged file emits nothing.
        let resume = gate.cursor();
        let mut gate = EmissionGate::new(resume);
        let mut emitted: Vec<&str> = Vec::new();
        gate.emit(|| emitted.push("suiteStarted"));
        gate.emit(|| emitted.push("testStarted"));
        gate.emit(|| emitted.push("testFinished"));
        gate.emit(|| emitted.push("suiteFinished"));
        gate.unit_closed();
        assert!(emitted.is_empty(), "Replay of a reported unit must stay silent");
        assert_eq!(gate.cursor(), resume);
    }

    #[test]
    fn test_emission_gate_skips_whole_units() {
        let mut gate = EmissionGate::new(ParseCursor::start());
        for _ in 0..3 {
            gate.emit(|| {});
            gate.emit(|| {});
            gate.unit_closed();
        }
        let resume = gate.cursor();

        let mut gate = EmissionGate::new(resume);
        let mut emitted = Vec::new();
        for unit in 0..4 {
            gate.emit(|| emitted.push(format!("open {unit}")));
            gate.emit(|| emitted.push(format!("close {unit}")));
            gate.unit_closed();
        }
        assert_eq!(emitted, vec!["open 3", "close 3"], "Only the new unit may emit");
    }

    #[test_case(None, Some("test1"), Some("test1") ; "bare name")]
    #[test_case(Some("org.Demo"), Some("test1"), Some("org.Demo.test1") ; "prefixed")]
    #[test_case(Some("org.Demo"), Some("org.Demo.test1"), Some("org.Demo.test1") ; "already prefixed")]
    #[test_case(Some("org.Demo"), None, None ; "missing name")]
    fn test_qualified_name(prefix: Option<&str>, name: Option<&str>, expected: Option<&str>) {
        assert_eq!(qualified_name(prefix, name), expected.map(str::to_string));
    }

    #[test_case(Some("0.031"), 31 ; "fractional seconds")]
    #[test_case(Some("2"), 2000 ; "whole seconds")]
    #[test_case(Some("garbage"), 0 ; "unparseable")]
    #[test_case(None, 0 ; "absent")]
    fn test_seconds_to_millis(input: Option<&str>, expected: u64) {
        assert_eq!(seconds_to_millis(input), expected);
    }

    #[test]
    fn test_mtime_seconds_truncates() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(12_999);
        assert_eq!(mtime_seconds(time), 12);
    }

    #[test]
    fn test_parsing_result_accumulate() {
        let mut total = ParsingResult::Inspections(InspectionCounts { errors: 1, warnings: 2, infos: 0 });
        total.accumulate(&ParsingResult::Inspections(InspectionCounts { errors: 2, warnings: 0, infos: 5 }));

        assert_eq!(
            total,
            ParsingResult::Inspections(InspectionCounts { errors: 3, warnings: 2, infos: 5 })
        );
    }

    #[test]
    fn test_parsing_result_delta_since() {
        let before = ParsingResult::Tests(TestCounts { suites: 1, tests: 3 });
        let after = ParsingResult::Tests(TestCounts { suites: 2, tests: 7 });

        assert_eq!(
            after.delta_since(&before),
            ParsingResult::Tests(TestCounts { suites: 1, tests: 4 })
        );
    }

    #[test]
    #[should_panic(expected = "Cannot accumulate")]
    fn test_parsing_result_accumulate_rejects_mismatched_kinds() {
        let mut total = ParsingResult::Tests(TestCounts::default());
        total.accumulate(&ParsingResult::Duplicates(crate::report::DuplicateCounts::default()));
    }

    #[test]
    fn test_cursor_ordering_is_lexicographic() {
        let early = ParseCursor::start();
        let mut gate = EmissionGate::new(early);
        gate.emit(|| {});
        let mid = gate.cursor();
        gate.unit_closed();
        let late = gate.cursor();

        assert!(early < mid && mid < late);
        assert!(late.max(early) == late);
    }
}
