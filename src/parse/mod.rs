pub mod junit;
pub mod inspections;
pub mod duplicates;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Result, Context};
use quick_xml::events::BytesStart;
use serde::{Serialize, Deserialize};

use crate::report::ReporterSet;

/// Resume position within a growing report file.
///
/// Opaque to callers; internally it counts the fully closed top-level
/// units already reported plus the reporter events already emitted from
/// the unit that is still open. Ordering is lexicographic, so the cursor
/// is monotone across successive parse attempts on an append-only file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParseCursor {
    units: usize,
    events: usize,
}

impl ParseCursor {
    /// The position before anything has been reported
    pub fn start() -> Self {
        Self::default()
    }

    pub fn is_start(&self) -> bool {
        self.units == 0 && self.events == 0
    }
}

/// Terminal signal of one parse attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// The document is complete and fully reported
    Done,

    /// The trailing bytes are an incomplete element; retry once the file
    /// has grown
    NeedsMore,

    /// The document can never become valid for this dialect, no matter
    /// how many bytes are appended
    Malformed(String),
}

/// Result of one parse attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Resume position for the next attempt; never regresses
    pub cursor: ParseCursor,

    /// Reporter events emitted during this attempt
    pub events_emitted: usize,

    pub status: ParseStatus,
}

/// A resumable report parser for one dialect.
///
/// Each call re-reads the file from byte 0, re-derives the events already
/// reported (per the cursor) without emitting them, and emits the rest in
/// document order.
pub trait ReportParser: Send {
    fn parse(&mut self, file: &Path, cursor: ParseCursor, reporters: &mut ReporterSet) -> Result<ParseOutcome>;

    /// Summary counters re-derived by the most recent parse attempt
    fn result(&self) -> crate::report::ParsingResult;
}

/// Creates parser instances for one report type tag
pub trait ParserFactory: Send {
    /// The type tag used in watch configuration, e.g. "junit"
    fn type_tag(&self) -> &str;

    /// Human-readable parser name for log messages
    fn display_name(&self) -> &str;

    fn create(&self) -> Box<dyn ReportParser>;
}

/// Registry of parser factories keyed by report type tag
#[derive(Default)]
pub struct Parsers {
    factories: HashMap<String, Box<dyn ParserFactory>>,
}

impl Parsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in dialect registered
    pub fn with_builtin(base_dir: impl AsRef<Path>) -> Self {
        let mut parsers = Self::new();
        parsers.register(Box::new(junit::JUnitFactory::new()));
        parsers.register(Box::new(inspections::FindBugsFactory::new(
            inspections::Catalog::builtin(),
            base_dir.as_ref(),
        )));
        parsers.register(Box::new(duplicates::PmdCpdFactory::new()));
        parsers
    }

    pub fn register(&mut self, factory: Box<dyn ParserFactory>) {
        self.factories.insert(factory.type_tag().to_string(), factory);
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    pub fn get(&self, type_tag: &str) -> Option<&dyn ParserFactory> {
        self.factories.get(type_tag).map(|factory| factory.as_ref())
    }

    pub fn display_name<'a>(&'a self, type_tag: &'a str) -> &'a str {
        self.get(type_tag).map(|factory| factory.display_name()).unwrap_or(type_tag)
    }
}

impl std::fmt::Debug for Parsers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parsers")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Suppression bookkeeping for a single parse pass.
///
/// Every reporter event flows through [`EmissionGate::emit`] in document
/// order; the gate swallows events the cursor marks as already reported
/// and counts the rest.
pub(crate) struct EmissionGate {
    skip_units: usize,
    skip_events: usize,
    units_closed: usize,
    events_seen: usize,
    emitted: usize,
}

impl EmissionGate {
    pub(crate) fn new(cursor: ParseCursor) -> Self {
        Self {
            skip_units: cursor.units,
            skip_events: cursor.events,
            units_closed: 0,
            events_seen: 0,
            emitted: 0,
        }
    }

    /// Run the emission unless the cursor says it already happened
    pub(crate) fn emit<F: FnOnce()>(&mut self, action: F) {
        let seen = self.events_seen;
        self.events_seen += 1;

        if self.units_closed < self.skip_units {
            return;
        }
        if self.units_closed == self.skip_units && seen < self.skip_events {
            return;
        }
        self.emitted += 1;
        action();
    }

    /// A top-level unit just fully closed; events that follow belong to
    /// the next unit
    pub(crate) fn unit_closed(&mut self) {
        self.units_closed += 1;
        self.events_seen = 0;
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }

    /// Resume position reflecting everything reported up to now
    pub(crate) fn cursor(&self) -> ParseCursor {
        ParseCursor {
            units: self.units_closed,
            events: self.events_seen,
        }
    }
}

/// Unescaped UTF-8 value of an attribute, if present
pub(crate) fn attr_value(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.context("Malformed XML attribute")?;
        if attr.key.as_ref() == name {
            let value = attr.unescape_value().context("Malformed XML attribute value")?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Attribute parsed as an integer, tolerating absent or garbled values
pub(crate) fn attr_u32(element: &BytesStart<'_>, name: &[u8]) -> Result<u32> {
    Ok(attr_value(element, name)?
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0))
}

/// Parse a fractional-seconds duration attribute into milliseconds.
/// Garbled values count as zero rather than failing the file.
pub(crate) fn seconds_to_millis(value: Option<&str>) -> u64 {
    value
        .and_then(|text| text.trim().replace(',', "").parse::<f64>().ok())
        .map(|seconds| (seconds * 1000.0).round().max(0.0) as u64)
        .unwrap_or(0)
}

/// Qualify a name with a package/class prefix the way JUnit-style reports
/// expect: the prefix is prepended unless the name already carries it.
pub(crate) fn qualified_name(prefix: Option<&str>, name: Option<&str>) -> Option<String> {
    match (prefix, name) {
        (Some(prefix), Some(name)) if !name.starts_with(prefix) => {
            Some(format!("{prefix}.{name}"))
        }
        (_, Some(name)) => Some(name.to_string()),
        (_, None) => None,
    }
}
