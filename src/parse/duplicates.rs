use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Result, Context};
use log::debug;
use quick_xml::Reader;
use quick_xml::events::{Event, BytesStart};

use crate::report::{ParsingResult, DuplicateCounts, DuplicationInfo, DuplicateFragment, ReporterSet, DuplicationReporter};
use super::{
    ParseCursor, ParseOutcome, ParseStatus, ReportParser, ParserFactory, EmissionGate,
    attr_value, attr_u32,
};

const ROOT_EXPECTED: &str = "\"pmd-cpd\" root element expected";

/// Factory for PMD CPD duplicate-code report parsers
#[derive(Debug, Default)]
pub struct PmdCpdFactory {}

impl PmdCpdFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl ParserFactory for PmdCpdFactory {
    fn type_tag(&self) -> &str {
        "pmdCpd"
    }

    fn display_name(&self) -> &str {
        "PMD CPD"
    }

    fn create(&self) -> Box<dyn ReportParser> {
        Box::new(PmdCpdReportParser::new())
    }
}

/// Resumable parser for `<pmd-cpd>` duplicate-code reports.
///
/// A top-level unit is one `<duplication>` element; the duplicates block
/// is bracketed by start/finish events tied to the root element.
#[derive(Debug, Default)]
pub struct PmdCpdReportParser {
    counts: DuplicateCounts,
}

impl PmdCpdReportParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportParser for PmdCpdReportParser {
    fn parse(&mut self, file: &Path, cursor: ParseCursor, reporters: &mut ReporterSet) -> Result<ParseOutcome> {
        let handle = File::open(file)
            .with_context(|| format!("Failed to open report file {}", file.display()))?;
        let mut reader = Reader::from_reader(BufReader::new(handle));
        reader.trim_text(true);

        self.counts = DuplicateCounts::default();
        let mut scan = DuplicateScan::new(cursor);
        let status = scan.run(&mut reader, reporters.duplicates.as_mut(), &mut self.counts);
        debug!("Parsed {} ({} duplicate(s) seen): {:?}", file.display(), self.counts.duplicates, status);

        Ok(ParseOutcome {
            cursor: scan.gate.cursor().max(cursor),
            events_emitted: scan.gate.emitted(),
            status,
        })
    }

    fn result(&self) -> ParsingResult {
        ParsingResult::Duplicates(self.counts)
    }
}

struct DuplicateScan {
    gate: EmissionGate,
    depth: usize,
    saw_root: bool,
    current: Option<DuplicationInfo>,
    skip_until: Option<usize>,
}

impl DuplicateScan {
    fn new(cursor: ParseCursor) -> Self {
        Self {
            gate: EmissionGate::new(cursor),
            depth: 0,
            saw_root: false,
            current: None,
            skip_until: None,
        }
    }

    fn run(
        &mut self,
        reader: &mut Reader<BufReader<File>>,
        duplicates: &mut dyn DuplicationReporter,
        counts: &mut DuplicateCounts,
    ) -> ParseStatus {
        let mut buf = Vec::new();
        loop {
            let step = match reader.read_event_into(&mut buf) {
                Err(_) => return ParseStatus::NeedsMore,
                Ok(Event::Eof) => {
                    return if self.saw_root && self.depth == 0 {
                        ParseStatus::Done
                    } else {
                        ParseStatus::NeedsMore
                    };
                }
                Ok(Event::Start(ref element)) => self.on_start(element, false, duplicates, counts),
                Ok(Event::Empty(ref element)) => self.on_start(element, true, duplicates, counts),
                Ok(Event::End(ref element)) => {
                    let name = element.name().as_ref().to_vec();
                    self.on_end(&name, duplicates, counts);
                    Ok(())
                }
                Ok(Event::Text(_)) if self.skip_until.is_none() && self.depth == 0 => {
                    return ParseStatus::Malformed(ROOT_EXPECTED.to_string());
                }
                Ok(_) => Ok(()),
            };

            if let Err(terminal) = step {
                return terminal;
            }
            buf.clear();
        }
    }

    fn on_start(
        &mut self,
        element: &BytesStart<'_>,
        empty: bool,
        duplicates: &mut dyn DuplicationReporter,
        counts: &mut DuplicateCounts,
    ) -> std::result::Result<(), ParseStatus> {
        if self.skip_until.is_some() {
            if !empty {
                self.depth += 1;
            }
            return Ok(());
        }

        let name = element.name().as_ref().to_vec();

        if !self.saw_root {
            self.saw_root = true;
            return match name.as_slice() {
                b"pmd-cpd" => {
                    self.gate.emit(|| duplicates.start_duplicates());
                    if !empty {
                        self.depth += 1;
                    } else {
                        self.gate.emit(|| duplicates.finish_duplicates());
                    }
                    Ok(())
                }
                _ => Err(ParseStatus::Malformed(ROOT_EXPECTED.to_string())),
            };
        }

        match name.as_slice() {
            b"duplication" if self.current.is_none() => {
                let info = DuplicationInfo {
                    lines: attr_u32(element, b"lines").map_err(|_| ParseStatus::NeedsMore)?,
                    tokens: attr_u32(element, b"tokens").map_err(|_| ParseStatus::NeedsMore)?,
                    fragments: Vec::new(),
                };
                if empty {
                    self.finish_duplication(info, duplicates, counts);
                } else {
                    self.depth += 1;
                    self.current = Some(info);
                }
            }
            b"file" if self.current.is_some() => {
                let path = attr_value(element, b"path")
                    .map_err(|_| ParseStatus::NeedsMore)?
                    .unwrap_or_default();
                let line = attr_u32(element, b"line").map_err(|_| ParseStatus::NeedsMore)?;
                self.current.as_mut().unwrap().fragments.push(DuplicateFragment { path, line });
                if !empty {
                    self.depth += 1;
                    self.skip_until = Some(self.depth - 1);
                }
            }
            _ => {
                // codefragment text and anything unknown
                if !empty {
                    self.depth += 1;
                    self.skip_until = Some(self.depth - 1);
                }
            }
        }
        Ok(())
    }

    fn on_end(
        &mut self,
        name: &[u8],
        duplicates: &mut dyn DuplicationReporter,
        counts: &mut DuplicateCounts,
    ) {
        self.depth = self.depth.saturating_sub(1);

        if let Some(resume_depth) = self.skip_until {
            if self.depth <= resume_depth {
                self.skip_until = None;
            }
            return;
        }

        match name {
            b"duplication" => {
                if let Some(info) = self.current.take() {
                    self.finish_duplication(info, duplicates, counts);
                }
            }
            b"pmd-cpd" => {
                self.gate.emit(|| duplicates.finish_duplicates());
            }
            _ => {}
        }
    }

    fn finish_duplication(
        &mut self,
        info: DuplicationInfo,
        duplicates: &mut dyn DuplicationReporter,
        counts: &mut DuplicateCounts,
    ) {
        counts.duplicates += 1;
        self.gate.emit(|| duplicates.report_duplicate(&info));
        self.gate.unit_closed();
    }
}
