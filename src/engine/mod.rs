use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, Context, bail};
use chrono::{DateTime, Utc};
use log::{info, debug, error};
use serde::Serialize;

use crate::parse::Parsers;
use crate::process::ReportProcessor;
use crate::report::{ParsingResult, ReporterSet};
use crate::rules::PathRules;
use crate::state::FileStateTracker;
use crate::watch::{DirectoryWatcher, WatchRules, WatchSummary};

/// Engine tuning knobs. The defaults favor low discovery latency over
/// scan cost, which suits report files written over a few seconds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory relative rules are resolved against
    pub base_dir: PathBuf,

    /// Files modified before this instant are gated out unless
    /// out-of-date parsing is enabled
    pub build_start: DateTime<Utc>,

    /// Parse reports that predate the build start
    pub parse_out_of_date: bool,

    /// Watcher scan interval
    pub poll_interval: Duration,

    /// Consecutive no-growth parse attempts before a stuck file is abandoned
    pub retry_budget: usize,

    /// Sleep between parse attempts on the same file
    pub retry_sleep: Duration,

    /// Inspection error count that fails the build, if any
    pub max_errors: Option<usize>,

    /// Inspection warning count that fails the build, if any
    pub max_warnings: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            build_start: Utc::now(),
            parse_out_of_date: false,
            poll_interval: Duration::from_millis(50),
            retry_budget: 20,
            retry_sleep: Duration::from_millis(500),
            max_errors: None,
            max_warnings: None,
        }
    }
}

/// One report type to watch and the rules describing where its files appear
#[derive(Debug, Clone)]
pub struct WatchSpec {
    pub type_tag: String,
    pub rules: Vec<String>,
}

impl WatchSpec {
    pub fn new(type_tag: impl Into<String>, rules: Vec<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            rules,
        }
    }
}

/// Everything the engine learned during the build
#[derive(Debug, Serialize)]
pub struct EngineSummary {
    /// Accumulated result per report type tag
    pub totals: HashMap<String, ParsingResult>,

    /// Whether a configured error/warning limit was exceeded
    pub limits_exceeded: bool,
}

impl EngineSummary {
    /// JSON rendering of the run summary, for exporting build statistics
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize engine summary")
    }
}

/// The running watcher/processor thread pair.
///
/// Started when the build starts, finished when the build is about to
/// finish; nothing survives the process (a restarted engine sees every
/// file as new).
#[derive(Debug)]
pub struct ReportEngine {
    stop: Arc<AtomicBool>,
    watcher: JoinHandle<WatchSummary>,
    processor: JoinHandle<HashMap<String, ParsingResult>>,
    max_errors: Option<usize>,
    max_warnings: Option<usize>,
    display_names: HashMap<String, String>,
}

impl ReportEngine {
    /// Wire up the tracker, queue and both worker threads and start
    /// watching.
    ///
    /// A watch spec naming an unregistered report type, or carrying
    /// unparseable rules, is reported once and dropped; watching of the
    /// remaining types is unaffected.
    pub fn start(
        config: EngineConfig,
        specs: Vec<WatchSpec>,
        parsers: Parsers,
        reporters: ReporterSet,
    ) -> Result<Self> {
        let mut display_names = HashMap::new();
        let mut watch_rules = Vec::with_capacity(specs.len());
        for spec in specs {
            if !parsers.contains(&spec.type_tag) {
                error!(
                    "No parser registered for report type {:?}, skipping its watch rules",
                    spec.type_tag
                );
                continue;
            }
            let rules = match PathRules::new(&spec.rules, &config.base_dir) {
                Ok(rules) => rules,
                Err(err) => {
                    error!("Invalid rules for report type {:?}: {:#}", spec.type_tag, err);
                    continue;
                }
            };
            display_names.insert(
                spec.type_tag.clone(),
                parsers.display_name(&spec.type_tag).to_string(),
            );
            watch_rules.push(WatchRules {
                type_tag: spec.type_tag,
                rules,
            });
        }

        // One state holder per report type: the same path watched under
        // two types is two independent reports.
        let trackers: HashMap<String, Arc<FileStateTracker>> = watch_rules
            .iter()
            .map(|watch| (watch.type_tag.clone(), Arc::new(FileStateTracker::new())))
            .collect();
        let stop = Arc::new(AtomicBool::new(false));
        let watcher_done = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel();

        let watcher = DirectoryWatcher::new(
            watch_rules,
            trackers.clone(),
            sender,
            config.build_start,
            config.parse_out_of_date,
            config.poll_interval,
            stop.clone(),
            watcher_done.clone(),
        );
        let processor = ReportProcessor::new(
            receiver,
            parsers,
            reporters,
            trackers,
            stop.clone(),
            watcher_done,
            config.retry_budget,
            config.retry_sleep,
        );

        let watcher = thread::Builder::new()
            .name("report-watcher".to_string())
            .spawn(move || watcher.run())
            .context("Failed to spawn watcher thread")?;
        let processor = thread::Builder::new()
            .name("report-processor".to_string())
            .spawn(move || processor.run())
            .context("Failed to spawn processor thread")?;

        debug!("Report engine started");
        Ok(Self {
            stop,
            watcher,
            processor,
            max_errors: config.max_errors,
            max_warnings: config.max_warnings,
            display_names,
        })
    }

    /// Signal both threads to stop, wait for the drain to complete, and
    /// log the end-of-build summaries
    pub fn finish(self) -> Result<EngineSummary> {
        self.stop.store(true, Ordering::Relaxed);

        let watch_summary = match self.watcher.join() {
            Ok(summary) => summary,
            Err(_) => bail!("Watcher thread panicked"),
        };
        let totals = match self.processor.join() {
            Ok(totals) => totals,
            Err(_) => bail!("Processor thread panicked"),
        };

        watch_summary.log();

        let mut limits_exceeded = false;
        for (type_tag, result) in &totals {
            let display_name = self
                .display_names
                .get(type_tag)
                .map(String::as_str)
                .unwrap_or(type_tag.as_str());
            result.log_total_result(display_name);
            if result.check_limits(self.max_errors, self.max_warnings) {
                limits_exceeded = true;
            }
        }

        info!("Report engine finished");
        Ok(EngineSummary {
            totals,
            limits_exceeded,
        })
    }
}
