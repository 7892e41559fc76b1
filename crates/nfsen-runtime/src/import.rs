//! Bounded-concurrency historical import with resumable checkpoints.
//!
//! Units are `(source, day)` pairs dispatched in ascending day order. At most
//! `max_processes` processor invocations run at any moment; the datasource is
//! written from the coordinating task only, one unit at a time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use nfsen_core::error::{NfsenError, ProcessorError};
use nfsen_core::models::{DayStatistics, ProcessOptions, Source};
use nfsen_core::time_utils::{resume_start, DayRange};
use nfsen_data::datasource::Datasource;
use nfsen_data::processor::Processor;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::checkpoint::CheckpointTracker;
use crate::ingest::{commit, ToolMissingGuard, UnitFailure};

// ── Public types ──────────────────────────────────────────────────────────────

/// Parameters of one import run.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub sources: Vec<Source>,
    /// First day requested (before checkpoint resumption).
    pub start: NaiveDate,
    /// Last day to import, inclusive. Normally today.
    pub end: NaiveDate,
    /// Ignore checkpoints and reprocess the whole range.
    pub force: bool,
    /// Log every unit at info level instead of debug.
    pub verbose: bool,
    pub options: ProcessOptions,
    pub max_processes: usize,
}

/// A unit that did not reach the datasource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUnit {
    pub source: Source,
    pub day: NaiveDate,
    pub reason: String,
}

/// Outcome of [`ImportOrchestrator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub sources: usize,
    pub scheduled: usize,
    pub succeeded: usize,
    pub failures: Vec<FailedUnit>,
    /// Checkpoint of each source after the run.
    pub checkpoints: HashMap<Source, Option<NaiveDate>>,
}

impl ImportSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} source(s), {} day(s) scheduled, {} imported, {} failed",
            self.sources,
            self.scheduled,
            self.succeeded,
            self.failed()
        )
    }
}

// ── ImportOrchestrator ────────────────────────────────────────────────────────

pub struct ImportOrchestrator {
    processor: Arc<dyn Processor>,
    datasource: Arc<dyn Datasource>,
    abort_threshold: u32,
}

type UnitResult = (Source, NaiveDate, Result<DayStatistics, ProcessorError>);

impl ImportOrchestrator {
    pub fn new(processor: Arc<dyn Processor>, datasource: Arc<dyn Datasource>) -> Self {
        Self {
            processor,
            datasource,
            abort_threshold: crate::ingest::TOOL_MISSING_ABORT_THRESHOLD,
        }
    }

    /// Override how many consecutive tool-missing units abort the run.
    pub fn with_abort_threshold(mut self, threshold: u32) -> Self {
        self.abort_threshold = threshold;
        self
    }

    /// Day range each source will cover, after applying checkpoints.
    pub fn plan(&self, job: &ImportJob) -> Result<Vec<(Source, DayRange)>, NfsenError> {
        let mut plan = Vec::with_capacity(job.sources.len());
        for source in &job.sources {
            let start = if job.force {
                job.start
            } else {
                let checkpoint = self.datasource.read_last_imported(source)?;
                resume_start(job.start, checkpoint)
            };
            let range = DayRange::new(start, job.end);
            if range.is_empty() {
                tracing::info!(source = %source, "already up to date");
            } else {
                tracing::info!(source = %source, from = %start, to = %job.end, "scheduling import");
            }
            plan.push((source.clone(), range));
        }
        Ok(plan)
    }

    /// Run the import to completion.
    ///
    /// Per-unit failures are collected in the summary. The run itself fails
    /// only when the processor cannot be started, the checkpoints cannot be
    /// read, or the tool disappears for several consecutive units.
    pub async fn run(&self, job: &ImportJob) -> Result<ImportSummary, NfsenError> {
        if job.sources.is_empty() {
            tracing::info!("no sources configured; nothing to import");
            return Ok(ImportSummary::default());
        }

        self.processor.check()?;
        let plan = self.plan(job)?;

        let mut state = RunState::new(job, ToolMissingGuard::new(self.abort_threshold));
        for (source, _) in &plan {
            let committed = self.datasource.read_last_imported(source)?;
            state.trackers.insert(source.clone(), CheckpointTracker::new(committed));
        }

        let semaphore = Arc::new(Semaphore::new(job.max_processes.max(1)));
        let mut in_flight: JoinSet<UnitResult> = JoinSet::new();

        'dispatch: for (source, range) in plan {
            for day in range {
                if state.aborted.is_some() {
                    break 'dispatch;
                }

                // Settle finished units while waiting so the window keeps moving.
                let permit = loop {
                    tokio::select! {
                        biased;
                        Some(joined) = in_flight.join_next() => {
                            state.settle(self.datasource.as_ref(), joined);
                        }
                        permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                            Ok(permit) => break permit,
                            Err(_) => break 'dispatch,
                        },
                    }
                };
                if state.aborted.is_some() {
                    break 'dispatch;
                }

                if let Some(tracker) = state.trackers.get_mut(&source) {
                    tracker.submit(day);
                }
                state.summary.scheduled += 1;

                let processor = Arc::clone(&self.processor);
                let options = job.options.clone();
                let unit_source = source.clone();
                in_flight.spawn(async move {
                    let result = processor.process(&unit_source, day, &options).await;
                    drop(permit);
                    (unit_source, day, result)
                });
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            state.settle(self.datasource.as_ref(), joined);
        }

        let summary = state.finish();
        tracing::info!(%summary, "import finished");
        match state.aborted.take() {
            Some(err) => Err(err.into()),
            None => Ok(summary),
        }
    }
}

// ── Private implementation ────────────────────────────────────────────────────

struct RunState {
    verbose: bool,
    trackers: HashMap<Source, CheckpointTracker>,
    summary: ImportSummary,
    guard: ToolMissingGuard,
    aborted: Option<ProcessorError>,
}

impl RunState {
    fn new(job: &ImportJob, guard: ToolMissingGuard) -> Self {
        Self {
            verbose: job.verbose,
            trackers: HashMap::new(),
            summary: ImportSummary {
                sources: job.sources.len(),
                ..ImportSummary::default()
            },
            guard,
            aborted: None,
        }
    }

    fn settle(&mut self, datasource: &dyn Datasource, joined: Result<UnitResult, JoinError>) {
        let (source, day, processed) = match joined {
            Ok(unit) => unit,
            Err(e) => {
                // The tracker for this unit never settles, which holds its
                // source's checkpoint in place.
                tracing::error!(error = %e, "import task aborted");
                return;
            }
        };

        let outcome = commit(datasource, &source, day, processed);
        let succeeded = outcome.is_ok();
        match &outcome {
            Ok(stats) => {
                self.summary.succeeded += 1;
                if self.verbose {
                    tracing::info!(
                        source = %source,
                        %day,
                        flows = stats.flows.total.flows,
                        files = stats.capture_files,
                        progress = %self.progress(),
                        "imported"
                    );
                } else {
                    tracing::debug!(source = %source, %day, "imported");
                }
            }
            Err(failure) => {
                tracing::warn!(source = %source, %day, error = %failure, "unit failed");
                self.summary.failures.push(FailedUnit {
                    source: source.clone(),
                    day,
                    reason: failure.to_string(),
                });
            }
        }

        if self.guard.observe(outcome.as_ref().err()) && self.aborted.is_none() {
            if let Err(UnitFailure::Processor(err)) = outcome {
                tracing::error!(error = %err, "processor unavailable; aborting import");
                self.aborted = Some(err);
            }
        }

        let advanced = self
            .trackers
            .get_mut(&source)
            .and_then(|tracker| tracker.settle(day, succeeded));
        if let Some(checkpoint) = advanced {
            if let Err(e) = datasource.record_checkpoint(&source, checkpoint) {
                tracing::warn!(source = %source, %checkpoint, error = %e, "failed to record checkpoint");
            }
        }
    }

    fn progress(&self) -> String {
        let done = self.summary.succeeded + self.summary.failed();
        format!("{done}/{}", self.summary.scheduled)
    }

    fn finish(&mut self) -> ImportSummary {
        let mut summary = std::mem::take(&mut self.summary);
        summary.checkpoints = self
            .trackers
            .iter()
            .map(|(source, tracker)| (source.clone(), tracker.committed()))
            .collect();
        summary
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
