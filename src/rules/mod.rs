use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Result, Context, bail};
use glob::Pattern;
use log::{debug, trace};
use walkdir::WalkDir;

/// A single include or exclude path rule
#[derive(Debug, Clone)]
pub struct Rule {
    /// Whether matching paths are included (true) or excluded (false)
    include: bool,

    /// The glob pattern, resolved against the base directory
    pattern: Pattern,

    /// The original rule text as the user wrote it
    body: String,
}

impl Rule {
    /// Parse a rule string of the form `path`, `+:path` or `-:path`
    fn parse(body: &str, base_dir: &Path) -> Result<Self> {
        let (include, raw) = match body.split_once(':') {
            Some(("+", rest)) => (true, rest),
            Some(("-", rest)) => (false, rest),
            _ => (true, body),
        };
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("Empty path rule: {:?}", body);
        }

        let resolved = resolve(base_dir, raw);
        let pattern = Pattern::new(&resolved.to_string_lossy())
            .with_context(|| format!("Invalid path rule pattern {:?}", body))?;

        Ok(Self {
            include,
            pattern,
            body: body.to_string(),
        })
    }

    /// Whether this rule applies to the given path.
    ///
    /// A rule matches when its pattern matches the path itself, or when the
    /// pattern is a glob-free directory prefix of the path.
    fn matches(&self, path: &Path) -> bool {
        if self.pattern.matches_path(path) {
            return true;
        }
        let prefix = glob_free_prefix(self.pattern.as_str());
        if prefix.as_os_str().is_empty() || prefix != Path::new(self.pattern.as_str()) {
            return false;
        }
        path.starts_with(&prefix)
    }

    /// The part of this rule's pattern before the first glob segment
    fn root(&self) -> PathBuf {
        glob_free_prefix(self.pattern.as_str())
    }
}

/// An ordered set of include/exclude rules over filesystem paths.
///
/// The rule set answers which paths are eligible for watching and which
/// directories have to be scanned to find them.
#[derive(Debug, Clone)]
pub struct PathRules {
    rules: Vec<Rule>,
    root_paths: BTreeSet<PathBuf>,
}

impl PathRules {
    /// Build a rule set from rule strings, resolving relative rules
    /// against the given base directory
    pub fn new<S: AsRef<str>>(bodies: &[S], base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let mut rules = Vec::with_capacity(bodies.len());
        for body in bodies {
            rules.push(Rule::parse(body.as_ref(), base_dir)?);
        }

        let root_paths = derive_root_paths(&rules);
        debug!("Resolved {} rule(s) to {} root path(s)", rules.len(), root_paths.len());

        Ok(Self { rules, root_paths })
    }

    /// The original rule strings, in order
    pub fn body(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.body.as_str()).collect()
    }

    /// Whether the rules include the given path.
    ///
    /// The last matching rule decides; a path no rule mentions is included
    /// when it sits underneath one of the include roots.
    pub fn should_include(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut decision = None;
        for rule in &self.rules {
            if rule.matches(path) {
                decision = Some(rule.include);
            }
        }
        match decision {
            Some(include) => include,
            None => self.root_paths.iter().any(|root| path.starts_with(root)),
        }
    }

    /// The minimal set of directories that have to be scanned to find
    /// every file these rules could include
    pub fn root_paths(&self) -> &BTreeSet<PathBuf> {
        &self.root_paths
    }

    /// Expand the rules against the live filesystem.
    ///
    /// Roots that do not exist yet are skipped; they are re-checked on the
    /// next call since report directories may appear mid-build.
    pub fn collect_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in &self.root_paths {
            if !root.exists() {
                trace!("Root path {} not present yet", root.display());
                continue;
            }
            if root.is_file() {
                if self.should_include(root) {
                    files.push(root.clone());
                }
                continue;
            }
            for entry in WalkDir::new(root)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                if self.should_include(entry.path()) {
                    trace!("Found file: {}", entry.path().display());
                    files.push(entry.path().to_owned());
                }
            }
        }
        files.sort();
        files.dedup();
        files
    }
}

/// Resolve a rule path against the base directory unless already absolute
fn resolve(base_dir: &Path, raw: &str) -> PathBuf {
    let raw_path = Path::new(raw);
    if raw_path.is_absolute() {
        raw_path.to_path_buf()
    } else {
        base_dir.join(raw_path)
    }
}

/// The leading pattern segments that contain no glob metacharacters
fn glob_free_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[']) {
            break;
        }
        prefix.push(component);
    }
    prefix
}

/// Keep only include-rule roots that are themselves included and are not
/// nested under another kept root
fn derive_root_paths(rules: &[Rule]) -> BTreeSet<PathBuf> {
    let mut candidates: Vec<PathBuf> = rules
        .iter()
        .filter(|rule| rule.include)
        .map(|rule| rule.root())
        .filter(|root| !root.as_os_str().is_empty())
        .collect();

    // Shorter paths first so parents are kept before their children
    candidates.sort();

    let mut roots: BTreeSet<PathBuf> = BTreeSet::new();
    for candidate in candidates {
        if excluded_by_last_match(rules, &candidate) {
            continue;
        }
        if roots.iter().any(|kept| candidate.starts_with(kept)) {
            continue;
        }
        roots.insert(candidate);
    }
    roots
}

fn excluded_by_last_match(rules: &[Rule], path: &Path) -> bool {
    let mut decision = None;
    for rule in rules {
        if rule.matches(path) {
            decision = Some(rule.include);
        }
    }
    decision == Some(false)
}
