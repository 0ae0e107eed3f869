#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use report_watcher::parse::inspections::{Catalog, FindBugsReportParser};
    use report_watcher::parse::duplicates::PmdCpdReportParser;
    use report_watcher::{
        DuplicateCounts, InspectionCounts, Journal, ParseCursor, ParseStatus, ParsingResult,
        ReportParser, ReporterSet,
    };

    fn write_report(dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    fn findbugs_parser(base_dir: &Path) -> FindBugsReportParser {
        FindBugsReportParser::new(Catalog::builtin(), base_dir.to_path_buf())
    }

    const BUG_REPORT: &str = r#"<BugCollection version="1.3.9">
  <BugCategory category="MY_CAT">
    <Description>My category</Description>
  </BugCategory>
  <BugPattern type="MY_BUG" category="MY_CAT">
    <ShortDescription>My bug</ShortDescription>
    <Details>Pattern details</Details>
  </BugPattern>
  <BugInstance type="MY_BUG" priority="1">
    <LongMessage>Something bad happened</LongMessage>
    <Class classname="org.demo.Foo">
      <SourceLine start="10" sourcepath="org/demo/Foo.java"/>
    </Class>
  </BugInstance>
  <BugInstance type="MY_BUG" priority="2">
    <SourceLine start="20" sourcepath="org/demo/Bar.java"/>
  </BugInstance>
  <BugInstance type="MY_BUG" priority="3">
    <SourceLine start="30" sourcepath="org/demo/Baz.java"/>
  </BugInstance>
</BugCollection>
"#;

    #[test]
    fn test_findbugs_report_emits_types_once() -> Result<()> {
        let temp_dir = tempdir()?;
        let file = write_report(temp_dir.path(), "bugs.xml", BUG_REPORT)?;

        let journal = Journal::new();
        let mut reporters = ReporterSet::recording(&journal);
        let mut parser = findbugs_parser(temp_dir.path());

        let outcome = parser.parse(&file, ParseCursor::start(), &mut reporters)?;
        assert_eq!(outcome.status, ParseStatus::Done);

        assert_eq!(journal.events(), vec![
            "inspectionType MY_BUG (My bug) category=My category: Pattern details".to_string(),
            "inspection MY_BUG [ERROR] Something bad happened at org/demo/Foo.java:10".to_string(),
            "inspection MY_BUG [WARNING] My bug at org/demo/Bar.java:20".to_string(),
            "inspection MY_BUG [INFO] My bug at org/demo/Baz.java:30".to_string(),
        ]);
        assert_eq!(
            parser.result(),
            ParsingResult::Inspections(InspectionCounts { errors: 1, warnings: 1, infos: 1 })
        );
        Ok(())
    }

    #[test]
    fn test_findbugs_builtin_catalog_resolves_known_patterns() -> Result<()> {
        let report = r#"<BugCollection>
  <BugInstance type="DLS_DEAD_LOCAL_STORE" priority="2">
    <ShortMessage>Dead store to x</ShortMessage>
    <SourceLine start="42" sourcepath="org/demo/Calc.java"/>
  </BugInstance>
</BugCollection>
"#;
        let temp_dir = tempdir()?;
        let file = write_report(temp_dir.path(), "bugs.xml", report)?;

        let journal = Journal::new();
        let mut reporters = ReporterSet::recording(&journal);
        let mut parser = findbugs_parser(temp_dir.path());

        let outcome = parser.parse(&file, ParseCursor::start(), &mut reporters)?;
        assert_eq!(outcome.status, ParseStatus::Done);

        let events = journal.events();
        assert_eq!(events.len(), 2);
        assert!(
            events[0].starts_with("inspectionType DLS_DEAD_LOCAL_STORE (Dead store to local variable) category=Dodgy code"),
            "{events:?}"
        );
        assert_eq!(events[1], "inspection DLS_DEAD_LOCAL_STORE [WARNING] Dead store to x at org/demo/Calc.java:42");
        Ok(())
    }

    #[test]
    fn test_unknown_bug_category_is_malformed_with_no_type_events() -> Result<()> {
        let report = r#"<BugCollection>
  <BugInstance type="SOME_BUG" priority="1" category="NO_SUCH_CATEGORY">
    <SourceLine start="1" sourcepath="a.java"/>
  </BugInstance>
</BugCollection>
"#;
        let temp_dir = tempdir()?;
        let file = write_report(temp_dir.path(), "bugs.xml", report)?;

        let journal = Journal::new();
        let mut reporters = ReporterSet::recording(&journal);
        let mut parser = findbugs_parser(temp_dir.path());

        let outcome = parser.parse(&file, ParseCursor::start(), &mut reporters)?;
        match outcome.status {
            ParseStatus::Malformed(reason) => {
                assert!(reason.contains("unknown bug category"), "Unexpected reason: {reason}");
                assert!(reason.contains("NO_SUCH_CATEGORY"), "Unexpected reason: {reason}");
            }
            status => panic!("Expected Malformed, got {status:?}"),
        }
        assert!(journal.is_empty(), "No inspection events may be emitted for an unknown category");
        Ok(())
    }

    #[test]
    fn test_findbugs_incremental_parse_is_exactly_once() -> Result<()> {
        let temp_dir = tempdir()?;
        let file = temp_dir.path().join("bugs.xml");

        // Stop after the second bug instance closes.
        let boundary = BUG_REPORT.rfind("  <BugInstance").unwrap();

        let journal = Journal::new();
        let mut reporters = ReporterSet::recording(&journal);
        let mut parser = findbugs_parser(temp_dir.path());

        fs::write(&file, &BUG_REPORT[..boundary])?;
        let first = parser.parse(&file, ParseCursor::start(), &mut reporters)?;
        assert_eq!(first.status, ParseStatus::NeedsMore);
        assert_eq!(first.events_emitted, 3);

        fs::write(&file, BUG_REPORT)?;
        let second = parser.parse(&file, first.cursor, &mut reporters)?;
        assert_eq!(second.status, ParseStatus::Done);
        assert_eq!(second.events_emitted, 1, "Only the third instance is new");

        assert_eq!(journal.events(), vec![
            "inspectionType MY_BUG (My bug) category=My category: Pattern details".to_string(),
            "inspection MY_BUG [ERROR] Something bad happened at org/demo/Foo.java:10".to_string(),
            "inspection MY_BUG [WARNING] My bug at org/demo/Bar.java:20".to_string(),
            "inspection MY_BUG [INFO] My bug at org/demo/Baz.java:30".to_string(),
        ]);
        Ok(())
    }

    const CPD_REPORT: &str = r#"<pmd-cpd>
  <duplication lines="4" tokens="75">
    <file line="1" path="src/A.java"/>
    <file line="10" path="src/B.java"/>
    <codefragment><![CDATA[int a = 1;]]></codefragment>
  </duplication>
  <duplication lines="2" tokens="30">
    <file line="5" path="src/C.java"/>
    <file line="6" path="src/C.java"/>
  </duplication>
</pmd-cpd>
"#;

    #[test]
    fn test_cpd_report_brackets_duplicates() -> Result<()> {
        let temp_dir = tempdir()?;
        let file = write_report(temp_dir.path(), "cpd.xml", CPD_REPORT)?;

        let journal = Journal::new();
        let mut reporters = ReporterSet::recording(&journal);
        let mut parser = PmdCpdReportParser::new();

        let outcome = parser.parse(&file, ParseCursor::start(), &mut reporters)?;
        assert_eq!(outcome.status, ParseStatus::Done);

        assert_eq!(journal.events(), vec![
            "startDuplicates".to_string(),
            "duplicate lines=4 tokens=75 [src/A.java:1, src/B.java:10]".to_string(),
            "duplicate lines=2 tokens=30 [src/C.java:5, src/C.java:6]".to_string(),
            "finishDuplicates".to_string(),
        ]);
        assert_eq!(parser.result(), ParsingResult::Duplicates(DuplicateCounts { duplicates: 2 }));
        Ok(())
    }

    #[test]
    fn test_cpd_incremental_parse_is_exactly_once() -> Result<()> {
        let temp_dir = tempdir()?;
        let file = temp_dir.path().join("cpd.xml");

        let boundary = CPD_REPORT.rfind("  <duplication").unwrap();

        let journal = Journal::new();
        let mut reporters = ReporterSet::recording(&journal);
        let mut parser = PmdCpdReportParser::new();

        fs::write(&file, &CPD_REPORT[..boundary])?;
        let first = parser.parse(&file, ParseCursor::start(), &mut reporters)?;
        assert_eq!(first.status, ParseStatus::NeedsMore);
        assert_eq!(first.events_emitted, 2, "Block start plus the first duplicate");

        fs::write(&file, CPD_REPORT)?;
        let second = parser.parse(&file, first.cursor, &mut reporters)?;
        assert_eq!(second.status, ParseStatus::Done);

        assert_eq!(journal.events(), vec![
            "startDuplicates".to_string(),
            "duplicate lines=4 tokens=75 [src/A.java:1, src/B.java:10]".to_string(),
            "duplicate lines=2 tokens=30 [src/C.java:5, src/C.java:6]".to_string(),
            "finishDuplicates".to_string(),
        ]);
        Ok(())
    }

    #[test]
    fn test_cpd_wrong_root_is_malformed() -> Result<()> {
        let temp_dir = tempdir()?;
        let file = write_report(temp_dir.path(), "cpd.xml", "<duplications/>")?;

        let journal = Journal::new();
        let mut reporters = ReporterSet::recording(&journal);
        let mut parser = PmdCpdReportParser::new();

        let outcome = parser.parse(&file, ParseCursor::start(), &mut reporters)?;
        match outcome.status {
            ParseStatus::Malformed(reason) => {
                assert!(reason.contains("pmd-cpd"), "Unexpected reason: {reason}");
            }
            status => panic!("Expected Malformed, got {status:?}"),
        }
        assert!(journal.is_empty());
        Ok(())
    }
}
