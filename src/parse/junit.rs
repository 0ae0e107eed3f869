use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Result, Context};
use log::debug;
use quick_xml::Reader;
use quick_xml::events::{Event, BytesStart};

use crate::report::{ParsingResult, TestCounts, ReporterSet, TestReporter};
use super::{
    ParseCursor, ParseOutcome, ParseStatus, ReportParser, ParserFactory, EmissionGate,
    attr_value, seconds_to_millis, qualified_name,
};

const ROOT_EXPECTED: &str = "\"testsuites\" or \"testsuite\" root element expected";

/// Test statuses that still count as an executed test
const EXECUTED_STATUSES: [&str; 6] = ["run", "passed", "success", "failure", "failed", "error"];

/// Factory for Ant JUnit style test report parsers
#[derive(Debug, Default)]
pub struct JUnitFactory {}

impl JUnitFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl ParserFactory for JUnitFactory {
    fn type_tag(&self) -> &str {
        "junit"
    }

    fn display_name(&self) -> &str {
        "Ant JUnit"
    }

    fn create(&self) -> Box<dyn ReportParser> {
        Box::new(JUnitReportParser::new())
    }
}

/// Resumable parser for `<testsuites>`/`<testsuite>` test result files.
///
/// A top-level unit is one outermost `<testsuite>` subtree; suite-started
/// events stream out as soon as the opening tag is complete, test events
/// as each `<testcase>` closes.
#[derive(Debug, Default)]
pub struct JUnitReportParser {
    counts: TestCounts,
}

impl JUnitReportParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportParser for JUnitReportParser {
    fn parse(&mut self, file: &Path, cursor: ParseCursor, reporters: &mut ReporterSet) -> Result<ParseOutcome> {
        let handle = File::open(file)
            .with_context(|| format!("Failed to open report file {}", file.display()))?;
        let mut reader = Reader::from_reader(BufReader::new(handle));
        reader.trim_text(true);

        self.counts = TestCounts::default();
        let mut scan = SuiteScan::new(cursor, file);
        let status = scan.run(&mut reader, reporters.tests.as_mut(), &mut self.counts);
        debug!(
            "Parsed {} ({} suite(s), {} test(s) seen): {:?}",
            file.display(), self.counts.suites, self.counts.tests, status
        );

        Ok(ParseOutcome {
            cursor: scan.gate.cursor().max(cursor),
            events_emitted: scan.gate.emitted(),
            status,
        })
    }

    fn result(&self) -> ParsingResult {
        ParsingResult::Tests(self.counts)
    }
}

/// One `<testcase>` under construction
#[derive(Debug, Default)]
struct TestCase {
    name: Option<String>,
    duration_millis: u64,
    executed: bool,
    failure_type: Option<String>,
    failure_message: Option<String>,
    failure_trace: String,
    std_out: String,
    std_err: String,
}

impl TestCase {
    fn has_failure(&self) -> bool {
        self.failure_type.is_some() || self.failure_message.is_some()
    }
}

/// Which element's character data is currently being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    None,
    TestFailure,
    TestSystemOut,
    TestSystemErr,
    TestTime,
    SuiteFailure,
    SuiteSystemOut,
    SuiteSystemErr,
}

/// Suite-level `<failure>`/`<error>` under construction
#[derive(Debug)]
struct SuiteProblem {
    is_error: bool,
    kind: Option<String>,
    message: Option<String>,
}

/// Explicit scan state threaded through the event loop, replacing
/// callback-mutated ambient fields with one state machine object
struct SuiteScan {
    gate: EmissionGate,
    file_label: String,
    depth: usize,
    saw_root: bool,
    suite_stack: Vec<Option<String>>,
    current_test: Option<TestCase>,
    suite_problem: Option<SuiteProblem>,
    text_target: TextTarget,
    text_buf: String,
    skip_until: Option<usize>,
}

impl SuiteScan {
    fn new(cursor: ParseCursor, file: &Path) -> Self {
        Self {
            gate: EmissionGate::new(cursor),
            file_label: file.display().to_string(),
            depth: 0,
            saw_root: false,
            suite_stack: Vec::new(),
            current_test: None,
            suite_problem: None,
            text_target: TextTarget::None,
            text_buf: String::new(),
            skip_until: None,
        }
    }

    fn run(
        &mut self,
        reader: &mut Reader<BufReader<File>>,
        tests: &mut dyn TestReporter,
        counts: &mut TestCounts,
    ) -> ParseStatus {
        let mut buf = Vec::new();
        loop {
            let event = reader.read_event_into(&mut buf);
            let step = match event {
                // Structural errors are indistinguishable from a producer
                // caught mid-write; the processor's retry budget escalates.
                Err(_) => return ParseStatus::NeedsMore,
                Ok(Event::Eof) => {
                    return if self.saw_root && self.depth == 0 {
                        ParseStatus::Done
                    } else {
                        ParseStatus::NeedsMore
                    };
                }
                Ok(Event::Start(ref element)) => self.on_start(element, false, tests, counts),
                Ok(Event::Empty(ref element)) => self.on_start(element, true, tests, counts),
                Ok(Event::End(ref element)) => {
                    let name = element.name().as_ref().to_vec();
                    self.on_end(&name, tests, counts);
                    Ok(None)
                }
                Ok(Event::Text(ref text)) => {
                    if self.skip_until.is_none() && self.text_target != TextTarget::None {
                        match text.unescape() {
                            Ok(value) => self.text_buf.push_str(&value),
                            Err(_) => return ParseStatus::NeedsMore,
                        }
                    } else if self.skip_until.is_none() && self.depth == 0 {
                        // Character data outside any element: not XML at all
                        return ParseStatus::Malformed(ROOT_EXPECTED.to_string());
                    }
                    Ok(None)
                }
                Ok(Event::CData(ref data)) => {
                    if self.skip_until.is_none() && self.text_target != TextTarget::None {
                        self.text_buf.push_str(&String::from_utf8_lossy(data));
                    }
                    Ok(None)
                }
                Ok(_) => Ok(None),
            };

            match step {
                Ok(None) => {}
                Ok(Some(terminal)) => return terminal,
                Err(err) => return err,
            }
            buf.clear();
        }
    }

    /// Handle an opening (or self-closing) tag. Returns a terminal status
    /// when the document can never become valid.
    fn on_start(
        &mut self,
        element: &BytesStart<'_>,
        empty: bool,
        tests: &mut dyn TestReporter,
        counts: &mut TestCounts,
    ) -> std::result::Result<Option<ParseStatus>, ParseStatus> {
        if self.skip_until.is_some() {
            if !empty {
                self.depth += 1;
            }
            return Ok(None);
        }

        let name = element.name().as_ref().to_vec();

        if !self.saw_root {
            self.saw_root = true;
            match name.as_slice() {
                b"testsuites" => {
                    if !empty {
                        self.depth += 1;
                    }
                    return Ok(None);
                }
                b"testsuite" => {
                    // fall through to the regular suite handling below
                }
                _ => return Err(ParseStatus::Malformed(ROOT_EXPECTED.to_string())),
            }
        }

        match name.as_slice() {
            b"testsuite" if self.current_test.is_none() => {
                let suite_name = self.suite_name(element, tests, counts)?;
                if !empty {
                    self.depth += 1;
                    self.suite_stack.push(suite_name);
                } else if let Some(suite_name) = suite_name {
                    self.gate.emit(|| tests.suite_finished(&suite_name));
                    if self.suite_stack.is_empty() {
                        self.gate.unit_closed();
                    }
                }
            }
            b"testcase" if !self.suite_stack.is_empty() && self.current_test.is_none() => {
                let test = self.read_testcase(element)?;
                if empty {
                    finish_test(&mut self.gate, test, &self.file_label, tests, counts);
                } else {
                    self.depth += 1;
                    self.current_test = Some(test);
                }
            }
            b"failure" | b"error" if self.current_test.is_some() => {
                if self.current_test.as_ref().unwrap().has_failure() {
                    // only the first failure/error of a test is reported
                    if !empty {
                        self.depth += 1;
                        self.skip_until = Some(self.depth - 1);
                    }
                    return Ok(None);
                }
                let is_error = name.as_slice() == b"error";
                let failure_type = self.attr(element, b"type")?;
                let failure_message = self.attr(element, b"message")?;
                let test = self.current_test.as_mut().unwrap();
                if !is_error {
                    test.executed = true;
                }
                test.failure_type = failure_type;
                test.failure_message = failure_message;
                if !empty {
                    self.depth += 1;
                    self.begin_text(TextTarget::TestFailure);
                }
            }
            b"failure" | b"error" if !self.suite_stack.is_empty() => {
                let problem = SuiteProblem {
                    is_error: name.as_slice() == b"error",
                    kind: self.attr(element, b"type")?,
                    message: self.attr(element, b"message")?,
                };
                if empty {
                    self.emit_suite_problem(problem, "", tests);
                } else {
                    self.depth += 1;
                    self.suite_problem = Some(problem);
                    self.begin_text(TextTarget::SuiteFailure);
                }
            }
            b"skipped" if self.current_test.is_some() => {
                self.current_test.as_mut().unwrap().executed = false;
                if !empty {
                    self.depth += 1;
                    self.skip_until = Some(self.depth - 1);
                }
            }
            b"system-out" => {
                let target = if self.current_test.is_some() {
                    TextTarget::TestSystemOut
                } else {
                    TextTarget::SuiteSystemOut
                };
                if !empty {
                    self.depth += 1;
                    self.begin_text(target);
                }
            }
            b"system-err" => {
                let target = if self.current_test.is_some() {
                    TextTarget::TestSystemErr
                } else {
                    TextTarget::SuiteSystemErr
                };
                if !empty {
                    self.depth += 1;
                    self.begin_text(target);
                }
            }
            b"time" if self.current_test.is_some() => {
                if !empty {
                    self.depth += 1;
                    self.begin_text(TextTarget::TestTime);
                }
            }
            _ => {
                // properties and anything else this dialect does not know
                if !empty {
                    self.depth += 1;
                    self.skip_until = Some(self.depth - 1);
                }
            }
        }
        Ok(None)
    }

    fn on_end(&mut self, name: &[u8], tests: &mut dyn TestReporter, counts: &mut TestCounts) {
        self.depth = self.depth.saturating_sub(1);

        if let Some(resume_depth) = self.skip_until {
            if self.depth <= resume_depth {
                self.skip_until = None;
            }
            return;
        }

        match name {
            b"testcase" => {
                if let Some(test) = self.current_test.take() {
                    finish_test(&mut self.gate, test, &self.file_label, tests, counts);
                }
            }
            b"testsuite" => {
                if let Some(suite_name) = self.suite_stack.pop().flatten() {
                    self.gate.emit(|| tests.suite_finished(&suite_name));
                }
                if self.suite_stack.is_empty() {
                    self.gate.unit_closed();
                }
            }
            b"failure" | b"error" => {
                if self.text_target == TextTarget::TestFailure {
                    let trace = self.take_text();
                    if let Some(test) = self.current_test.as_mut() {
                        test.failure_trace = trace;
                    }
                } else if self.text_target == TextTarget::SuiteFailure {
                    let trace = self.take_text();
                    if let Some(problem) = self.suite_problem.take() {
                        self.emit_suite_problem(problem, &trace, tests);
                    }
                }
            }
            b"system-out" => {
                if self.text_target == TextTarget::TestSystemOut {
                    let out = self.take_text();
                    if let Some(test) = self.current_test.as_mut() {
                        test.std_out = out;
                    }
                } else if self.text_target == TextTarget::SuiteSystemOut {
                    let out = self.take_text();
                    self.emit_suite_output(false, &out, tests);
                }
            }
            b"system-err" => {
                if self.text_target == TextTarget::TestSystemErr {
                    let err = self.take_text();
                    if let Some(test) = self.current_test.as_mut() {
                        test.std_err = err;
                    }
                } else if self.text_target == TextTarget::SuiteSystemErr {
                    let err = self.take_text();
                    self.emit_suite_output(true, &err, tests);
                }
            }
            b"time" => {
                if self.text_target == TextTarget::TestTime {
                    let text = self.take_text();
                    if let Some(test) = self.current_test.as_mut() {
                        test.duration_millis = seconds_to_millis(Some(text.trim()));
                    }
                }
            }
            _ => {}
        }
    }

    /// Suite name qualified by its package attribute; an unnamed suite is
    /// reported as a warning and yields no suite events
    fn suite_name(
        &mut self,
        element: &BytesStart<'_>,
        tests: &mut dyn TestReporter,
        counts: &mut TestCounts,
    ) -> std::result::Result<Option<String>, ParseStatus> {
        let name = self.attr(element, b"name")?;
        let package = self.attr(element, b"package")?;
        match qualified_name(package.as_deref(), name.as_deref()) {
            Some(suite_name) => {
                counts.suites += 1;
                self.gate.emit(|| tests.suite_started(&suite_name));
                Ok(Some(suite_name))
            }
            None => {
                let message = format!("File {} contains unnamed suite", self.file_label);
                self.gate.emit(|| tests.warning(&message));
                Ok(None)
            }
        }
    }

    fn read_testcase(&mut self, element: &BytesStart<'_>) -> std::result::Result<TestCase, ParseStatus> {
        let name = self.attr(element, b"name")?;
        let class_name = self.attr(element, b"classname")?;
        let time = self.attr(element, b"time")?;

        let executed = match self.attr(element, b"executed")? {
            Some(value) => value.trim().eq_ignore_ascii_case("true"),
            None => match self.attr(element, b"status")? {
                Some(status) if !status.trim().is_empty() => EXECUTED_STATUSES
                    .iter()
                    .any(|executed| status.trim().eq_ignore_ascii_case(executed)),
                _ => true,
            },
        };

        Ok(TestCase {
            name: qualified_name(class_name.as_deref(), name.as_deref()),
            duration_millis: seconds_to_millis(time.as_deref()),
            executed,
            ..TestCase::default()
        })
    }

    fn emit_suite_problem(&mut self, problem: SuiteProblem, trace: &str, tests: &mut dyn TestReporter) {
        let suite = self.open_suite_name();
        let message = failure_message(problem.kind.as_deref(), problem.message.as_deref());
        let rendered = if problem.is_error {
            format!("Error from suite {suite}: {message}\n{trace}")
        } else {
            format!("Failure from suite {suite}: {message}\n{trace}")
        };
        self.gate.emit(|| tests.error(&rendered));
    }

    fn emit_suite_output(&mut self, is_err: bool, text: &str, tests: &mut dyn TestReporter) {
        if text.trim().is_empty() {
            return;
        }
        let suite = self.open_suite_name();
        if is_err {
            let message = format!("System error from suite {suite}: {}", text.trim());
            self.gate.emit(|| tests.warning(&message));
        } else {
            let message = format!("System out from suite {suite}: {}", text.trim());
            self.gate.emit(|| tests.info(&message));
        }
    }

    fn open_suite_name(&self) -> String {
        self.suite_stack
            .iter()
            .rev()
            .find_map(|name| name.clone())
            .unwrap_or_else(|| "<unnamed>".to_string())
    }

    fn begin_text(&mut self, target: TextTarget) {
        self.text_target = target;
        self.text_buf.clear();
    }

    fn take_text(&mut self) -> String {
        self.text_target = TextTarget::None;
        std::mem::take(&mut self.text_buf).trim().to_string()
    }

    fn attr(
        &self,
        element: &BytesStart<'_>,
        name: &[u8],
    ) -> std::result::Result<Option<String>, ParseStatus> {
        // A garbled attribute means the tag itself was caught mid-write
        attr_value(element, name).map_err(|_| ParseStatus::NeedsMore)
    }
}

/// Emit the full event sequence for one closed `<testcase>`
fn finish_test(
    gate: &mut EmissionGate,
    test: TestCase,
    file_label: &str,
    tests: &mut dyn TestReporter,
    counts: &mut TestCounts,
) {
    counts.tests += 1;

    let Some(name) = test.name.as_deref() else {
        let message = format!("File {file_label} contains unnamed test");
        gate.emit(|| tests.warning(&message));
        return;
    };

    gate.emit(|| tests.test_started(name));
    if !test.executed {
        gate.emit(|| tests.test_ignored(name, ""));
    }
    if test.has_failure() {
        let message = failure_message(test.failure_type.as_deref(), test.failure_message.as_deref());
        gate.emit(|| tests.test_failed(name, &message, &test.failure_trace));
    }
    if !test.std_err.is_empty() {
        gate.emit(|| tests.test_std_err(name, &test.std_err));
    }
    if !test.std_out.is_empty() {
        gate.emit(|| tests.test_std_out(name, &test.std_out));
    }
    gate.emit(|| tests.test_finished(name, test.duration_millis));
}

/// "type: message" with either part optional
fn failure_message(kind: Option<&str>, message: Option<&str>) -> String {
    match (kind, message) {
        (Some(kind), Some(message)) => format!("{kind}: {message}"),
        (Some(kind), None) => kind.to_string(),
        (None, Some(message)) => message.to_string(),
        (None, None) => String::new(),
    }
}
