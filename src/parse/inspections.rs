use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, Context};
use log::debug;
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::{Event, BytesStart};

use crate::report::{
    ParsingResult, InspectionCounts, InspectionInstance, InspectionSeverity,
    ReporterSet, InspectionReporter,
};
use super::{
    ParseCursor, ParseOutcome, ParseStatus, ReportParser, ParserFactory, EmissionGate,
    attr_value, attr_u32,
};

const ROOT_EXPECTED: &str = "\"BugCollection\" root element expected";

/// Name and description of a bug category or pattern
#[derive(Debug, Clone, Default)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
}

/// A bug pattern with the category it belongs to
#[derive(Debug, Clone, Default)]
pub struct PatternEntry {
    pub name: String,
    pub description: String,
    pub category: String,
}

/// Immutable lookup table of known bug categories and patterns.
///
/// Built once at startup and passed by reference into every parser
/// instance; reports may extend it per-file with in-document
/// `<BugCategory>`/`<BugPattern>` declarations.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    categories: HashMap<String, CatalogEntry>,
    patterns: HashMap<String, PatternEntry>,
}

static BUILTIN_CATALOG: Lazy<Arc<Catalog>> = Lazy::new(|| Arc::new(Catalog::with_builtin_entries()));

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundled table of categories and patterns FindBugs-style tools
    /// emit without declaring them in-document
    pub fn builtin() -> Arc<Catalog> {
        BUILTIN_CATALOG.clone()
    }

    pub fn add_category(&mut self, id: &str, name: &str, description: &str) {
        self.categories.insert(id.to_string(), CatalogEntry {
            name: name.to_string(),
            description: description.to_string(),
        });
    }

    pub fn add_pattern(&mut self, id: &str, category: &str, name: &str, description: &str) {
        self.patterns.insert(id.to_string(), PatternEntry {
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
        });
    }

    pub fn category(&self, id: &str) -> Option<&CatalogEntry> {
        self.categories.get(id)
    }

    pub fn pattern(&self, id: &str) -> Option<&PatternEntry> {
        self.patterns.get(id)
    }

    fn with_builtin_entries() -> Self {
        let mut catalog = Self::new();
        catalog.add_category("CORRECTNESS", "Correctness bug",
            "Probable bug - an apparent coding mistake resulting in code that was probably not what the developer intended.");
        catalog.add_category("BAD_PRACTICE", "Bad practice",
            "Violations of recommended and essential coding practice, such as hash code and equals problems or dropped exceptions.");
        catalog.add_category("DODGY", "Dodgy code",
            "Code that is confusing, anomalous, or written in a way that leads itself to errors.");
        catalog.add_category("STYLE", "Dodgy code",
            "Code that is confusing, anomalous, or written in a way that leads itself to errors. Older reports use STYLE for the DODGY category.");
        catalog.add_category("PERFORMANCE", "Performance",
            "Code that is not necessarily incorrect but may be inefficient.");
        catalog.add_category("SECURITY", "Security",
            "A use of untrusted input in a way that could create a remotely exploitable security vulnerability.");
        catalog.add_category("MALICIOUS_CODE", "Malicious code vulnerability",
            "Code that is vulnerable to attacks from untrusted code.");
        catalog.add_category("MT_CORRECTNESS", "Multithreaded correctness",
            "Code flaws having to do with threads, locks, and volatiles.");
        catalog.add_category("I18N", "Internationalization",
            "Code flaws having to do with internationalization and locale.");
        catalog.add_category("EXPERIMENTAL", "Experimental",
            "Experimental and not fully vetted bug patterns.");
        catalog.add_category("NOISE", "Bogus random noise",
            "Intended to be useful as a control in data mining experiments, not in finding actual bugs in software.");

        catalog.add_pattern("DLS_DEAD_LOCAL_STORE", "STYLE", "Dead store to local variable",
            "This instruction assigns a value to a local variable, but the value is not read or used in any subsequent instruction.");
        catalog.add_pattern("NP_NULL_ON_SOME_PATH", "CORRECTNESS", "Possible null pointer dereference",
            "There is a branch of statement that, if executed, guarantees that a null value will be dereferenced.");
        catalog.add_pattern("RCN_REDUNDANT_NULLCHECK_OF_NONNULL_VALUE", "STYLE", "Redundant nullcheck of value known to be non-null",
            "This method contains a redundant check of a known non-null value against the constant null.");
        catalog.add_pattern("SE_NO_SERIALVERSIONID", "BAD_PRACTICE", "Class is Serializable, but doesn't define serialVersionUID",
            "This class implements the Serializable interface, but does not define a serialVersionUID field.");
        catalog.add_pattern("URF_UNREAD_FIELD", "PERFORMANCE", "Unread field",
            "This field is never read. Consider removing it from the class.");
        catalog.add_pattern("EI_EXPOSE_REP", "MALICIOUS_CODE", "May expose internal representation by returning reference to mutable object",
            "Returning a reference to a mutable object value stored in one of the object's fields exposes the internal representation of the object.");
        catalog.add_pattern("DM_DEFAULT_ENCODING", "I18N", "Reliance on default encoding",
            "Found a call to a method which will perform a byte to String (or String to byte) conversion, and will assume that the default platform encoding is suitable.");
        catalog.add_pattern("UW_UNCOND_WAIT", "MT_CORRECTNESS", "Unconditional wait",
            "This method contains a call to java.lang.Object.wait() which is not guarded by conditional control flow.");
        catalog
    }
}

/// Factory for FindBugs-style static analysis report parsers
pub struct FindBugsFactory {
    catalog: Arc<Catalog>,
    base_dir: PathBuf,
}

impl FindBugsFactory {
    pub fn new(catalog: Arc<Catalog>, base_dir: impl AsRef<Path>) -> Self {
        Self {
            catalog,
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }
}

impl ParserFactory for FindBugsFactory {
    fn type_tag(&self) -> &str {
        "findBugs"
    }

    fn display_name(&self) -> &str {
        "FindBugs"
    }

    fn create(&self) -> Box<dyn ReportParser> {
        Box::new(FindBugsReportParser::new(self.catalog.clone(), self.base_dir.clone()))
    }
}

/// Resumable parser for `<BugCollection>` inspection reports.
///
/// A top-level unit is one `<BugInstance>` element; in-document category
/// and pattern declarations extend the catalog for the current file only.
pub struct FindBugsReportParser {
    catalog: Arc<Catalog>,
    base_dir: PathBuf,
    counts: InspectionCounts,
}

impl FindBugsReportParser {
    pub fn new(catalog: Arc<Catalog>, base_dir: PathBuf) -> Self {
        Self {
            catalog,
            base_dir,
            counts: InspectionCounts::default(),
        }
    }
}

impl ReportParser for FindBugsReportParser {
    fn parse(&mut self, file: &Path, cursor: ParseCursor, reporters: &mut ReporterSet) -> Result<ParseOutcome> {
        let handle = File::open(file)
            .with_context(|| format!("Failed to open report file {}", file.display()))?;
        let mut reader = Reader::from_reader(BufReader::new(handle));
        reader.trim_text(true);

        self.counts = InspectionCounts::default();
        let mut scan = BugScan::new(cursor, &self.catalog, &self.base_dir);
        let status = scan.run(&mut reader, reporters.inspections.as_mut(), &mut self.counts);
        debug!(
            "Parsed {} ({} error(s), {} warning(s), {} info(s) seen): {:?}",
            file.display(), self.counts.errors, self.counts.warnings, self.counts.infos, status
        );

        Ok(ParseOutcome {
            cursor: scan.gate.cursor().max(cursor),
            events_emitted: scan.gate.emitted(),
            status,
        })
    }

    fn result(&self) -> ParsingResult {
        ParsingResult::Inspections(self.counts)
    }
}

/// One `<BugInstance>` under construction
#[derive(Debug, Default)]
struct BugInstance {
    bug_type: Option<String>,
    category: Option<String>,
    priority: u32,
    message: String,
    source_path: Option<String>,
    line: u32,
    class_name: Option<String>,
}

/// One in-document `<BugCategory>` or `<BugPattern>` declaration
#[derive(Debug, Default)]
struct Declaration {
    id: Option<String>,
    category: Option<String>,
    name: String,
    description: String,
    is_pattern: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    None,
    BugMessage,
    DeclarationName,
    DeclarationDescription,
}

struct BugScan<'a> {
    gate: EmissionGate,
    catalog: &'a Catalog,
    base_dir: &'a Path,
    depth: usize,
    saw_root: bool,
    current_bug: Option<BugInstance>,
    declaration: Option<Declaration>,
    doc_categories: HashMap<String, CatalogEntry>,
    doc_patterns: HashMap<String, PatternEntry>,
    announced_types: HashSet<String>,
    text_target: TextTarget,
    text_buf: String,
    skip_until: Option<usize>,
}

impl<'a> BugScan<'a> {
    fn new(cursor: ParseCursor, catalog: &'a Catalog, base_dir: &'a Path) -> Self {
        Self {
            gate: EmissionGate::new(cursor),
            catalog,
            base_dir,
            depth: 0,
            saw_root: false,
            current_bug: None,
            declaration: None,
            doc_categories: HashMap::new(),
            doc_patterns: HashMap::new(),
            announced_types: HashSet::new(),
            text_target: TextTarget::None,
            text_buf: String::new(),
            skip_until: None,
        }
    }

    fn run(
        &mut self,
        reader: &mut Reader<BufReader<File>>,
        inspections: &mut dyn InspectionReporter,
        counts: &mut InspectionCounts,
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
                Ok(Event::Start(ref element)) => self.on_start(element, false, inspections, counts),
                Ok(Event::Empty(ref element)) => self.on_start(element, true, inspections, counts),
                Ok(Event::End(ref element)) => {
                    let name = element.name().as_ref().to_vec();
                    self.on_end(&name, inspections, counts)
                }
                Ok(Event::Text(ref text)) => {
                    if self.skip_until.is_none() && self.text_target != TextTarget::None {
                        match text.unescape() {
                            Ok(value) => self.text_buf.push_str(&value),
                            Err(_) => return ParseStatus::NeedsMore,
                        }
                    } else if self.skip_until.is_none() && self.depth == 0 {
                        return ParseStatus::Malformed(ROOT_EXPECTED.to_string());
                    }
                    Ok(())
                }
                Ok(Event::CData(ref data)) => {
                    if self.skip_until.is_none() && self.text_target != TextTarget::None {
                        self.text_buf.push_str(&String::from_utf8_lossy(data));
                    }
                    Ok(())
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
        inspections: &mut dyn InspectionReporter,
        counts: &mut InspectionCounts,
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
                b"BugCollection" => {
                    if !empty {
                        self.depth += 1;
                    }
                    Ok(())
                }
                _ => Err(ParseStatus::Malformed(ROOT_EXPECTED.to_string())),
            };
        }

        match name.as_slice() {
            b"BugInstance" if self.current_bug.is_none() && self.declaration.is_none() => {
                let bug = BugInstance {
                    bug_type: self.attr(element, b"type")?,
                    category: self.attr(element, b"category")?,
                    priority: attr_u32(element, b"priority").map_err(|_| ParseStatus::NeedsMore)?,
                    ..BugInstance::default()
                };
                if empty {
                    self.report_bug(bug, inspections, counts)?;
                } else {
                    self.depth += 1;
                    self.current_bug = Some(bug);
                }
            }
            b"BugCategory" if self.current_bug.is_none() && self.declaration.is_none() => {
                let declaration = Declaration {
                    id: self.attr(element, b"category")?,
                    is_pattern: false,
                    ..Declaration::default()
                };
                if !empty {
                    self.depth += 1;
                    self.declaration = Some(declaration);
                } else {
                    self.store_declaration(declaration);
                }
            }
            b"BugPattern" if self.current_bug.is_none() && self.declaration.is_none() => {
                let declaration = Declaration {
                    id: self.attr(element, b"type")?,
                    category: self.attr(element, b"category")?,
                    is_pattern: true,
                    ..Declaration::default()
                };
                if !empty {
                    self.depth += 1;
                    self.declaration = Some(declaration);
                } else {
                    self.store_declaration(declaration);
                }
            }
            b"ShortMessage" | b"LongMessage" if self.current_bug.is_some() => {
                if !empty {
                    self.depth += 1;
                    self.begin_text(TextTarget::BugMessage);
                }
            }
            b"Description" | b"ShortDescription" if self.declaration.is_some() => {
                if !empty {
                    self.depth += 1;
                    self.begin_text(TextTarget::DeclarationName);
                }
            }
            b"Details" if self.declaration.is_some() => {
                if !empty {
                    self.depth += 1;
                    self.begin_text(TextTarget::DeclarationDescription);
                }
            }
            b"Class" if self.current_bug.is_some() => {
                let class_name = self.attr(element, b"classname")?;
                let bug = self.current_bug.as_mut().unwrap();
                if bug.class_name.is_none() {
                    bug.class_name = class_name;
                }
                if !empty {
                    self.depth += 1;
                }
            }
            b"SourceLine" if self.current_bug.is_some() => {
                let source_path = self.attr(element, b"sourcepath")?;
                let start = attr_u32(element, b"start").map_err(|_| ParseStatus::NeedsMore)?;
                let bug = self.current_bug.as_mut().unwrap();
                if bug.source_path.is_none() {
                    bug.source_path = source_path;
                    bug.line = start;
                }
                if !empty {
                    self.depth += 1;
                    self.skip_until = Some(self.depth - 1);
                }
            }
            _ => {
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
        inspections: &mut dyn InspectionReporter,
        counts: &mut InspectionCounts,
    ) -> std::result::Result<(), ParseStatus> {
        self.depth = self.depth.saturating_sub(1);

        if let Some(resume_depth) = self.skip_until {
            if self.depth <= resume_depth {
                self.skip_until = None;
            }
            return Ok(());
        }

        match name {
            b"BugInstance" => {
                if let Some(bug) = self.current_bug.take() {
                    self.report_bug(bug, inspections, counts)?;
                }
            }
            b"BugCategory" | b"BugPattern" => {
                if let Some(declaration) = self.declaration.take() {
                    self.store_declaration(declaration);
                }
            }
            b"ShortMessage" | b"LongMessage" => {
                if self.text_target == TextTarget::BugMessage {
                    let message = self.take_text();
                    if let Some(bug) = self.current_bug.as_mut() {
                        // LongMessage overrides an earlier ShortMessage
                        if !message.is_empty() {
                            bug.message = message;
                        }
                    }
                }
            }
            b"Description" | b"ShortDescription" => {
                if self.text_target == TextTarget::DeclarationName {
                    let text = self.take_text();
                    if let Some(declaration) = self.declaration.as_mut() {
                        declaration.name = text;
                    }
                }
            }
            b"Details" => {
                if self.text_target == TextTarget::DeclarationDescription {
                    let text = self.take_text();
                    if let Some(declaration) = self.declaration.as_mut() {
                        declaration.description = text;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Emit events for one fully closed `<BugInstance>`
    fn report_bug(
        &mut self,
        bug: BugInstance,
        inspections: &mut dyn InspectionReporter,
        counts: &mut InspectionCounts,
    ) -> std::result::Result<(), ParseStatus> {
        let bug_type = bug.bug_type.clone().unwrap_or_else(|| "UNKNOWN_BUG_TYPE".to_string());

        let pattern = self.doc_patterns.get(&bug_type).cloned()
            .or_else(|| self.catalog.pattern(&bug_type).cloned());

        let category_id = bug.category.clone()
            .or_else(|| pattern.as_ref().map(|pattern| pattern.category.clone()));

        let Some(category_id) = category_id else {
            return Err(ParseStatus::Malformed(format!(
                "unknown bug category for bug {bug_type}"
            )));
        };

        let category = self.doc_categories.get(&category_id).cloned()
            .or_else(|| self.catalog.category(&category_id).cloned());
        let Some(category) = category else {
            return Err(ParseStatus::Malformed(format!(
                "unknown bug category {category_id}"
            )));
        };

        let severity = match bug.priority {
            1 => {
                counts.errors += 1;
                InspectionSeverity::Error
            }
            2 => {
                counts.warnings += 1;
                InspectionSeverity::Warning
            }
            _ => {
                counts.infos += 1;
                InspectionSeverity::Info
            }
        };

        if self.announced_types.insert(bug_type.clone()) {
            let (type_name, type_description) = match &pattern {
                Some(pattern) => (pattern.name.clone(), pattern.description.clone()),
                None => (bug_type.clone(), String::new()),
            };
            let category_name = category.name.clone();
            self.gate.emit(|| {
                inspections.report_inspection_type(&bug_type, &type_name, &category_name, &type_description)
            });
        }

        let message = if bug.message.is_empty() {
            pattern.as_ref().map(|pattern| pattern.name.clone()).unwrap_or_default()
        } else {
            bug.message.clone()
        };

        let file_path = bug.source_path.clone()
            .or_else(|| bug.class_name.as_ref().map(|class| class.replace('.', "/") + ".java"))
            .map(|path| crate::utils::relative_display(self.base_dir, Path::new(&path)))
            .unwrap_or_default();

        let instance = InspectionInstance {
            inspection_id: bug_type,
            message,
            file_path,
            line: bug.line,
            severity,
        };
        self.gate.emit(|| inspections.report_inspection(&instance));
        self.gate.unit_closed();
        Ok(())
    }

    fn store_declaration(&mut self, declaration: Declaration) {
        let Some(id) = declaration.id.clone() else {
            return;
        };
        if declaration.is_pattern {
            self.doc_patterns.insert(id, PatternEntry {
                name: declaration.name,
                description: declaration.description,
                category: declaration.category.unwrap_or_default(),
            });
        } else {
            self.doc_categories.insert(id, CatalogEntry {
                name: declaration.name,
                description: declaration.description,
            });
        }
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
        attr_value(element, name).map_err(|_| ParseStatus::NeedsMore)
    }
}
