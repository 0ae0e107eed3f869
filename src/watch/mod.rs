use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn, error};

use crate::rules::PathRules;
use crate::state::{FileState, FileStateTracker};
use crate::utils::{modification_time, mtime_seconds};

/// One enqueued report file, tagged with its report type.
///
/// The pair is the identity of a watched report: the same path watched
/// under two report types is two independent reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportTask {
    pub type_tag: String,
    pub path: PathBuf,
}

/// A rule set watched for one report type
#[derive(Debug)]
pub struct WatchRules {
    pub type_tag: String,
    pub rules: PathRules,
}

/// Why a found file was never handed to the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    NotAFile,
    Unreadable,
    OutOfDate,
}

/// Candidate bookkeeping for one scan root, kept for the end-of-build
/// diagnostic summary
#[derive(Debug, Default)]
struct RootTotals {
    appeared: bool,
    found: BTreeSet<PathBuf>,
    skipped: BTreeMap<PathBuf, SkipReason>,
}

/// Per-rule-set watcher state
#[derive(Debug)]
struct WatchEntry {
    type_tag: String,
    rules: PathRules,
    first_run: bool,
    totals: BTreeMap<PathBuf, RootTotals>,
}

/// End-of-build diagnostics collected by the watcher thread
#[derive(Debug)]
pub struct WatchSummary {
    entries: Vec<(String, BTreeMap<PathBuf, RootTotalsSummary>)>,
}

#[derive(Debug)]
pub struct RootTotalsSummary {
    appeared: bool,
    found: usize,
    skipped: Vec<(PathBuf, &'static str)>,
}

impl WatchSummary {
    /// Render per-root totals and per-file reasons into the build log
    pub fn log(&self) {
        for (type_tag, roots) in &self.entries {
            for (root, totals) in roots {
                if !totals.appeared {
                    warn!("{}: {} didn't appear on disk during the build", type_tag, root.display());
                    continue;
                }
                if totals.found == 0 && totals.skipped.is_empty() {
                    warn!("{}: no reports found in {}", type_tag, root.display());
                    continue;
                }
                let mut message = format!(
                    "{}: {} file(s) found in {}",
                    type_tag,
                    totals.found + totals.skipped.len(),
                    root.display()
                );
                if !totals.skipped.is_empty() {
                    message.push_str(&format!(
                        ", {} of them unprocessed (see reasons below)",
                        totals.skipped.len()
                    ));
                }
                info!("{message}");
                for (path, reason) in &totals.skipped {
                    warn!("{}: {}", path.display(), reason);
                }
            }
        }
    }
}

/// Polls the watched rule sets for new or grown report files and feeds
/// them to the processor queue.
///
/// The watcher only ever moves files into processing; finishing a file's
/// lifecycle is exclusively the processor's job.
#[derive(Debug)]
pub struct DirectoryWatcher {
    entries: Vec<WatchEntry>,

    /// One state holder per report type; the same path watched by two
    /// types progresses independently
    trackers: HashMap<String, Arc<FileStateTracker>>,

    queue: Sender<ReportTask>,
    build_start: DateTime<Utc>,
    parse_out_of_date: bool,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl DirectoryWatcher {
    pub fn new(
        watch_rules: Vec<WatchRules>,
        trackers: HashMap<String, Arc<FileStateTracker>>,
        queue: Sender<ReportTask>,
        build_start: DateTime<Utc>,
        parse_out_of_date: bool,
        poll_interval: Duration,
        stop: Arc<AtomicBool>,
        done: Arc<AtomicBool>,
    ) -> Self {
        let entries = watch_rules
            .into_iter()
            .map(|watch| WatchEntry {
                type_tag: watch.type_tag,
                rules: watch.rules,
                first_run: true,
                totals: BTreeMap::new(),
            })
            .collect();
        Self {
            entries,
            trackers,
            queue,
            build_start,
            parse_out_of_date,
            poll_interval,
            stop,
            done,
        }
    }

    /// Poll until stop is requested, finish with one last scan, and hand
    /// back the diagnostic summary
    pub fn run(mut self) -> WatchSummary {
        while !self.stop.load(Ordering::Relaxed) {
            self.scan_all();
            thread::sleep(self.poll_interval);
        }
        // producers had their final chance to write; pick up stragglers
        self.scan_all();
        self.done.store(true, Ordering::Relaxed);
        self.into_summary()
    }

    fn scan_all(&mut self) {
        for index in 0..self.entries.len() {
            self.scan_entry(index);
        }
    }

    fn scan_entry(&mut self, index: usize) {
        if self.entries[index].first_run {
            self.entries[index].first_run = false;
            log_watching_paths(&self.entries[index]);
        }

        let type_tag = self.entries[index].type_tag.clone();
        let Some(tracker) = self.trackers.get(&type_tag).cloned() else {
            return;
        };

        let candidates = self.entries[index].rules.collect_files();
        let roots: Vec<PathBuf> = self.entries[index].rules.root_paths().iter().cloned().collect();

        for root in &roots {
            let totals = self.entries[index].totals.entry(root.clone()).or_default();
            if root.exists() {
                totals.appeared = true;
            }
        }

        for path in candidates {
            let verdict = self.inspect(&path, &tracker);

            let root = roots.iter().find(|root| path.starts_with(root)).cloned();
            if let Some(root) = root {
                let totals = self.entries[index].totals.entry(root).or_default();
                totals.appeared = true;
                match verdict {
                    Verdict::Enqueue | Verdict::Leave => {
                        totals.found.insert(path.clone());
                        totals.skipped.remove(&path);
                    }
                    Verdict::Skip(reason) => {
                        if !totals.found.contains(&path) {
                            totals.skipped.insert(path.clone(), reason);
                        }
                    }
                    Verdict::Ignore => {}
                }
            }

            if verdict == Verdict::Enqueue {
                info!("Found report file: {}", path.display());
                let task = ReportTask {
                    type_tag: type_tag.clone(),
                    path,
                };
                if self.queue.send(task).is_err() {
                    error!("Report queue is closed, stopping watcher");
                    self.stop.store(true, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    /// Apply the readability and freshness gates, then the file state
    /// dispatch, to one candidate path
    fn inspect(&self, path: &Path, tracker: &FileStateTracker) -> Verdict {
        let Ok(metadata) = fs::metadata(path) else {
            // disappeared between directory listing and stat
            return Verdict::Ignore;
        };
        if !metadata.is_file() {
            return Verdict::Skip(SkipReason::NotAFile);
        }
        if fs::File::open(path).is_err() {
            return Verdict::Skip(SkipReason::Unreadable);
        }
        if metadata.len() == 0 {
            // may still be written; not even worth recording yet
            return Verdict::Ignore;
        }

        let Ok(modified) = modification_time(path) else {
            return Verdict::Skip(SkipReason::Unreadable);
        };
        let length = metadata.len();

        // Out-of-date is re-evaluated every poll rather than cached: the
        // policy may be enabled mid-build.
        if !self.parse_out_of_date && mtime_seconds(modified) < self.build_start.timestamp() {
            tracker.mark_out_of_date(path, modified, length);
            return Verdict::Skip(SkipReason::OutOfDate);
        }

        match tracker.file_state(path) {
            FileState::Unknown => {
                tracker.add_file(path, modified, length);
                Verdict::Enqueue
            }
            FileState::OnProcessing | FileState::Processed => Verdict::Leave,
            FileState::Error | FileState::OutOfDate => {
                if tracker.reactivate_if_grown(path, modified, length) {
                    debug!("Report file {} has grown since abandoned, retrying", path.display());
                    Verdict::Enqueue
                } else {
                    Verdict::Leave
                }
            }
        }
    }

    fn into_summary(self) -> WatchSummary {
        let entries = self
            .entries
            .into_iter()
            .map(|entry| {
                let roots = entry
                    .totals
                    .into_iter()
                    .map(|(root, totals)| {
                        let summary = RootTotalsSummary {
                            appeared: totals.appeared,
                            found: totals.found.len(),
                            skipped: totals
                                .skipped
                                .into_iter()
                                .map(|(path, reason)| (path, describe_skip(reason)))
                                .collect(),
                        };
                        (root, summary)
                    })
                    .collect();
                (entry.type_tag, roots)
            })
            .collect();
        WatchSummary { entries }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// New or regrown file: hand to the processor
    Enqueue,
    /// Known file, nothing to do this poll
    Leave,
    /// Never processed, recorded for diagnostics
    Skip(SkipReason),
    /// Transient condition, not even recorded
    Ignore,
}

fn log_watching_paths(entry: &WatchEntry) {
    let rules = entry.rules.body();
    if rules.is_empty() {
        warn!("{}: Watching paths: <no paths>", entry.type_tag);
    } else {
        info!("{}: Watching paths:", entry.type_tag);
        for rule in rules {
            info!("{rule}");
        }
    }
}

fn describe_skip(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::NotAFile => "is not actually a file",
        SkipReason::Unreadable => "unable to read file",
        SkipReason::OutOfDate => "file has modification date preceding build start time",
    }
}
