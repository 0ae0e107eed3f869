use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use log::{debug, warn, error};

use crate::parse::{ParseCursor, ParseStatus, Parsers, ReportParser};
use crate::report::{ParsingResult, ReporterSet};
use crate::state::FileStateTracker;
use crate::utils::file_length;
use crate::watch::ReportTask;

/// How long to poll the queue for when nothing is in flight
const QUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// Queue poll timeout while draining after stop
const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

/// One file being parsed across retries
struct InFlight {
    task: ReportTask,
    parser: Box<dyn ReportParser>,
    attempts_without_growth: usize,
    last_length: u64,
}

/// Pulls detected report files off the queue and drives the resumable
/// parser over each until it is done, permanently malformed, or stuck
/// past the retry budget.
///
/// One file is in flight at a time, so each file's reporter events come
/// out in document order with no cross-file interleaving.
pub struct ReportProcessor {
    queue: Receiver<ReportTask>,
    parsers: Parsers,
    reporters: ReporterSet,

    /// One state holder per report type, shared with the watcher thread
    trackers: HashMap<String, Arc<FileStateTracker>>,

    stop: Arc<AtomicBool>,
    watcher_done: Arc<AtomicBool>,
    retry_budget: usize,
    retry_sleep: Duration,
    current: Option<InFlight>,

    /// Resume positions per report. An entry survives an Error abandon so
    /// a regrown file never re-emits what was already reported.
    cursors: HashMap<ReportTask, ParseCursor>,

    /// What each report has already contributed to the totals, so a
    /// regrown file folds only its delta
    folded: HashMap<ReportTask, ParsingResult>,

    /// Running totals per report type tag
    totals: HashMap<String, ParsingResult>,
}

impl ReportProcessor {
    pub fn new(
        queue: Receiver<ReportTask>,
        parsers: Parsers,
        reporters: ReporterSet,
        trackers: HashMap<String, Arc<FileStateTracker>>,
        stop: Arc<AtomicBool>,
        watcher_done: Arc<AtomicBool>,
        retry_budget: usize,
        retry_sleep: Duration,
    ) -> Self {
        Self {
            queue,
            parsers,
            reporters,
            trackers,
            stop,
            watcher_done,
            retry_budget,
            retry_sleep,
            current: None,
            cursors: HashMap::new(),
            folded: HashMap::new(),
            totals: HashMap::new(),
        }
    }

    /// Process until stop is requested, then drain everything still
    /// queued or in flight (bounded by the retry budget), and hand back
    /// the per-type totals
    pub fn run(mut self) -> HashMap<String, ParsingResult> {
        while !self.stop.load(Ordering::Relaxed) {
            self.step(QUEUE_TIMEOUT);
        }

        // Every file gets at least one more attempt after producers have
        // had their final chance to finish writing.
        loop {
            let idle = self.current.is_none();
            let advanced = self.step(DRAIN_TIMEOUT);
            if idle && !advanced && self.watcher_done.load(Ordering::Relaxed) {
                break;
            }
        }

        self.totals
    }

    /// One scheduling step: take the in-flight file or the next queued
    /// one and give it a parse attempt. Returns false when there was
    /// nothing to do.
    fn step(&mut self, timeout: Duration) -> bool {
        match self.take_next(timeout) {
            Some(in_flight) => {
                self.process(in_flight);
                true
            }
            None => false,
        }
    }

    /// Prefer the file already in flight; otherwise pull a fresh task
    /// from the queue
    fn take_next(&mut self, timeout: Duration) -> Option<InFlight> {
        if let Some(in_flight) = self.current.take() {
            return Some(in_flight);
        }

        let task = match self.queue.recv_timeout(timeout) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        };

        let Some(factory) = self.parsers.get(&task.type_tag) else {
            // the engine drops unregistered types at startup, so a task
            // for one means the registry and the watcher disagree
            error!("No parser available for report type {:?}, skipping {}", task.type_tag, task.path.display());
            return None;
        };

        Some(InFlight {
            parser: factory.create(),
            attempts_without_growth: 0,
            last_length: 0,
            task,
        })
    }

    fn process(&mut self, mut in_flight: InFlight) {
        let task = in_flight.task.clone();
        let path = task.path.clone();
        let cursor = self.cursors.get(&task).copied().unwrap_or_default();
        let Some(tracker) = self.trackers.get(&task.type_tag).cloned() else {
            error!("No state holder for report type {:?}", task.type_tag);
            return;
        };

        let outcome = match in_flight.parser.parse(&path, cursor, &mut self.reporters) {
            Ok(outcome) => outcome,
            Err(err) => {
                // I/O fault: forget the file so it can be re-detected if
                // it comes back
                warn!("Failed to read report file {}: {:#}", path.display(), err);
                self.cursors.remove(&task);
                self.folded.remove(&task);
                tracker.remove_file(&path);
                return;
            }
        };

        debug_assert!(outcome.cursor >= cursor, "parse cursor must never regress");
        self.cursors.insert(task.clone(), outcome.cursor);

        match outcome.status {
            ParseStatus::Done => {
                let result = in_flight.parser.result();
                result.log_file_result(&path);
                self.fold_total(&task, &result);
                self.cursors.remove(&task);
                tracker.set_file_processed(&path, result);
            }
            ParseStatus::Malformed(reason) => {
                self.abandon(in_flight, &tracker, &reason);
            }
            ParseStatus::NeedsMore => {
                let length = file_length(&path).unwrap_or(in_flight.last_length);
                if length > in_flight.last_length {
                    in_flight.last_length = length;
                    in_flight.attempts_without_growth = 0;
                } else {
                    in_flight.attempts_without_growth += 1;
                }

                if in_flight.attempts_without_growth >= self.retry_budget {
                    self.abandon(in_flight, &tracker, "report has unexpected finish");
                    return;
                }

                debug!(
                    "Report file {} needs more data (attempt {} without growth)",
                    path.display(),
                    in_flight.attempts_without_growth
                );
                self.current = Some(in_flight);
                thread::sleep(self.retry_sleep);
            }
        }
    }

    /// Terminal failure path shared by Malformed parses and exhausted
    /// retry budgets: the events reported so far stand, the file is
    /// marked Error and not retried unless it grows again.
    fn abandon(&mut self, in_flight: InFlight, tracker: &FileStateTracker, reason: &str) {
        let parser_name = self.parsers.display_name(&in_flight.task.type_tag);
        warn!(
            "Failed to parse {} with {} parser: {}",
            in_flight.task.path.display(), parser_name, reason
        );

        let result = in_flight.parser.result();
        result.log_file_result(&in_flight.task.path);
        self.fold_total(&in_flight.task, &result);
        tracker.set_file_error(&in_flight.task.path, result);
    }

    fn fold_total(&mut self, task: &ReportTask, result: &ParsingResult) {
        let delta = match self.folded.get(task) {
            Some(earlier) => result.delta_since(earlier),
            None => *result,
        };
        self.folded.insert(task.clone(), *result);
        match self.totals.get_mut(&task.type_tag) {
            Some(total) => total.accumulate(&delta),
            None => {
                self.totals.insert(task.type_tag.clone(), delta);
            }
        }
    }
}

impl std::fmt::Debug for ReportProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportProcessor")
            .field("retry_budget", &self.retry_budget)
            .field("totals", &self.totals)
            .finish_non_exhaustive()
    }
}
