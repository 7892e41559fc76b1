//! Long-running listener that ingests capture files as they appear.
//!
//! Each poll asks the processor for files newer than a per-source cursor,
//! groups them by day and ingests each day in ascending order. A failed day
//! does not hold up later days: they are written and checkpointed as usual.
//! The cursor stops at the failed day's files so the next poll lists and
//! retries it; days already written past that point are remembered and only
//! re-ingested when newer files arrive for them. After `retry_limit` failed
//! attempts the day is given up and the cursor moves on.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime};
use nfsen_core::error::{NfsenError, ProcessorError};
use nfsen_core::models::{ProcessOptions, Source};
use nfsen_data::datasource::Datasource;
use nfsen_data::processor::Processor;

use crate::ingest::{ingest_day, ToolMissingGuard, UnitFailure};
use crate::signal::Shutdown;

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    NotRunning,
    Starting,
    Running,
    Terminated,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ListenerState::NotRunning => "not running",
            ListenerState::Starting => "starting",
            ListenerState::Running => "running",
            ListenerState::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Counts of one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub ingested: usize,
    pub failed: usize,
    /// Days given up after exhausting their retries.
    pub abandoned: usize,
}

/// Attempts a failing day gets before the listener stops retrying it.
pub const DAY_RETRY_LIMIT: u32 = 5;

/// Cursor equivalent to "everything from `day` onwards is new".
pub fn cursor_for_checkpoint(day: NaiveDate) -> Option<NaiveDateTime> {
    day.and_time(NaiveTime::MIN)
        .checked_sub_signed(ChronoDuration::minutes(1))
}

// ── Per-source progress ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SourceProgress {
    /// Every file at or before this timestamp has been ingested.
    cursor: Option<NaiveDateTime>,
    /// Days written while an earlier day is still outstanding, with the newest file covered.
    ahead: BTreeMap<NaiveDate, NaiveDateTime>,
    /// Failed attempts per outstanding day.
    attempts: HashMap<NaiveDate, u32>,
}

impl SourceProgress {
    fn covered(&self, day: NaiveDate, newest: NaiveDateTime) -> bool {
        self.ahead.get(&day).is_some_and(|done| *done >= newest)
    }

    /// Mark `day` done through `newest`; only moves the cursor when nothing earlier is outstanding.
    fn settle(&mut self, day: NaiveDate, newest: NaiveDateTime, blocked: bool) {
        self.attempts.remove(&day);
        if blocked {
            self.ahead.insert(day, newest);
        } else {
            self.ahead.remove(&day);
            if self.cursor.map_or(true, |cursor| newest > cursor) {
                self.cursor = Some(newest);
            }
        }
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

pub struct Listener {
    processor: Arc<dyn Processor>,
    datasource: Arc<dyn Datasource>,
    sources: Vec<Source>,
    options: ProcessOptions,
    poll_interval: Duration,
    shutdown: Shutdown,
    progress: HashMap<Source, SourceProgress>,
    retry_limit: u32,
    guard: ToolMissingGuard,
    state: ListenerState,
}

impl Listener {
    pub fn new(
        processor: Arc<dyn Processor>,
        datasource: Arc<dyn Datasource>,
        sources: Vec<Source>,
        options: ProcessOptions,
        poll_interval: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            processor,
            datasource,
            sources,
            options,
            poll_interval,
            shutdown,
            progress: HashMap::new(),
            retry_limit: DAY_RETRY_LIMIT,
            guard: ToolMissingGuard::default(),
            state: ListenerState::NotRunning,
        }
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit.max(1);
        self
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn cursor(&self, source: &Source) -> Option<NaiveDateTime> {
        self.progress.get(source).and_then(|progress| progress.cursor)
    }

    /// Verify the processor and seed cursors from stored checkpoints.
    pub fn prepare(&mut self) -> Result<(), NfsenError> {
        self.state = ListenerState::Starting;
        self.processor.check()?;
        for source in &self.sources {
            let cursor = self
                .datasource
                .read_last_imported(source)?
                .and_then(cursor_for_checkpoint);
            tracing::debug!(source = %source, ?cursor, "cursor initialised");
            self.progress.insert(
                source.clone(),
                SourceProgress {
                    cursor,
                    ..SourceProgress::default()
                },
            );
        }
        self.state = ListenerState::Running;
        Ok(())
    }

    /// Poll until shutdown is requested.
    pub async fn run(mut self) -> Result<(), NfsenError> {
        self.prepare()?;
        tracing::info!(
            sources = self.sources.len(),
            interval_secs = self.poll_interval.as_secs(),
            "listener running"
        );

        let result = loop {
            match self.poll_once().await {
                Ok(report) if report.ingested + report.failed > 0 => {
                    tracing::info!(
                        ingested = report.ingested,
                        failed = report.failed,
                        abandoned = report.abandoned,
                        "poll complete"
                    );
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
            if self.shutdown.is_requested() {
                break Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.wait() => break Ok(()),
            }
        };

        self.state = ListenerState::Terminated;
        tracing::info!("listener stopped");
        result
    }

    /// One pass over every source.
    ///
    /// Shutdown is honoured between units, never inside one.
    pub async fn poll_once(&mut self) -> Result<PollReport, NfsenError> {
        let mut report = PollReport::default();
        let sources = self.sources.clone();

        for source in &sources {
            if self.shutdown.is_requested() {
                break;
            }
            let cursor = self.cursor(source);
            let files = match self.processor.list_new_files(source, cursor) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "listing capture files failed");
                    continue;
                }
            };

            let mut days: BTreeMap<NaiveDate, NaiveDateTime> = BTreeMap::new();
            for file in &files {
                let newest = days.entry(file.day()).or_insert(file.timestamp);
                if file.timestamp > *newest {
                    *newest = file.timestamp;
                }
            }

            let mut blocked = false;
            for (day, newest) in days {
                if self.shutdown.is_requested() {
                    return Ok(report);
                }
                let progress = self.progress.entry(source.clone()).or_default();
                if progress.covered(day, newest) {
                    progress.settle(day, newest, blocked);
                    continue;
                }

                let outcome = ingest_day(
                    self.processor.as_ref(),
                    self.datasource.as_ref(),
                    source,
                    day,
                    &self.options,
                )
                .await;

                let escalate = self.guard.observe(outcome.as_ref().err());
                let progress = self.progress.entry(source.clone()).or_default();
                match outcome {
                    Ok(_) => {
                        report.ingested += 1;
                        progress.settle(day, newest, blocked);
                        if let Err(e) = self.datasource.record_checkpoint(source, day) {
                            tracing::warn!(source = %source, %day, error = %e, "failed to record checkpoint");
                        }
                        tracing::debug!(source = %source, %day, "ingested");
                    }
                    Err(UnitFailure::Processor(err)) if escalate => {
                        tracing::error!(error = %err, "processor unavailable; stopping listener");
                        return Err(err.into());
                    }
                    Err(failure) => {
                        report.failed += 1;
                        let attempts = progress.attempts.entry(day).or_insert(0);
                        *attempts += 1;
                        if *attempts >= self.retry_limit {
                            report.abandoned += 1;
                            tracing::error!(
                                source = %source,
                                %day,
                                attempts = *attempts,
                                error = %failure,
                                "ingest failed; giving up on day"
                            );
                            progress.settle(day, newest, blocked);
                        } else {
                            tracing::warn!(
                                source = %source,
                                %day,
                                attempts = *attempts,
                                error = %failure,
                                "ingest failed; will retry"
                            );
                            blocked = true;
                        }
                    }
                }
            }
        }
        Ok(report)
    }
}

/// Map an escalated processor failure back out of a listener error.
pub fn is_tool_missing(err: &NfsenError) -> bool {
    matches!(err, NfsenError::Processor(ProcessorError::ToolMissing { .. }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcessor;
    use nfsen_data::memory::MemoryDatasource;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn listener(
        processor: &Arc<FakeProcessor>,
        store: &Arc<MemoryDatasource>,
        shutdown: Shutdown,
    ) -> Listener {
        Listener::new(
            processor.clone(),
            store.clone(),
            vec![Source::new("gw")],
            ProcessOptions::default(),
            Duration::from_millis(10),
            shutdown,
        )
    }

    #[test]
    fn test_cursor_for_checkpoint() {
        let cursor = cursor_for_checkpoint(d(2)).unwrap();
        assert_eq!(cursor.to_string(), "2024-05-01 23:59:00");
    }

    #[tokio::test]
    async fn test_poll_ingests_each_new_day_once() {
        let processor = Arc::new(FakeProcessor::new());
        processor.add_file("gw", "202405010000");
        processor.add_file("gw", "202405010005");
        processor.add_file("gw", "202405020000");
        let store = Arc::new(MemoryDatasource::new());
        let mut l = listener(&processor, &store, Shutdown::new());
        l.prepare().unwrap();
        assert_eq!(l.state(), ListenerState::Running);

        let report = l.poll_once().await.unwrap();
        assert_eq!(
            report,
            PollReport {
                ingested: 2,
                ..PollReport::default()
            }
        );
        assert_eq!(store.days(&Source::new("gw")), vec![d(1), d(2)]);
        assert_eq!(store.read_last_imported(&Source::new("gw")).unwrap(), Some(d(2)));

        let idle = l.poll_once().await.unwrap();
        assert_eq!(idle, PollReport::default());
        assert_eq!(processor.call_count(), 2);

        processor.add_file("gw", "202405020005");
        let report = l.poll_once().await.unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(processor.calls().last().unwrap().1, d(2));
    }

    #[tokio::test]
    async fn test_cursor_resumes_from_checkpoint() {
        let processor = Arc::new(FakeProcessor::new());
        processor.add_file("gw", "202405012355");
        processor.add_file("gw", "202405020010");
        let store = Arc::new(MemoryDatasource::new());
        store.record_checkpoint(&Source::new("gw"), d(2)).unwrap();

        let mut l = listener(&processor, &store, Shutdown::new());
        l.prepare().unwrap();
        l.poll_once().await.unwrap();

        let days: Vec<NaiveDate> = processor.calls().into_iter().map(|(_, day)| day).collect();
        assert_eq!(days, vec![d(2)]);
    }

    #[tokio::test]
    async fn test_failed_day_is_retried_while_later_days_ingest() {
        let mut failing = FakeProcessor::new();
        failing.failing_days.insert(d(1));
        let processor = Arc::new(failing);
        for day in 1..=5 {
            processor.add_file("gw", &format!("202405{day:02}0000"));
        }
        let store = Arc::new(MemoryDatasource::new());
        let gw = Source::new("gw");

        let mut l = listener(&processor, &store, Shutdown::new()).with_retry_limit(100);
        l.prepare().unwrap();
        let report = l.poll_once().await.unwrap();
        assert_eq!(
            report,
            PollReport {
                ingested: 4,
                failed: 1,
                abandoned: 0
            }
        );
        assert_eq!(store.days(&gw), vec![d(2), d(3), d(4), d(5)]);
        assert_eq!(store.read_last_imported(&gw).unwrap(), Some(d(5)));

        for _ in 0..9 {
            let report = l.poll_once().await.unwrap();
            assert_eq!(
                report,
                PollReport {
                    failed: 1,
                    ..PollReport::default()
                }
            );
        }
        // Day 1 is attempted every poll; later days were written exactly once.
        let calls: Vec<NaiveDate> = processor.calls().into_iter().map(|(_, day)| day).collect();
        assert_eq!(calls.iter().filter(|day| **day == d(1)).count(), 10);
        assert_eq!(calls.len(), 14);
        assert_eq!(store.write_count(), 4);
        assert_eq!(l.cursor(&gw), None);

        processor.add_file("gw", "202405030005");
        let report = l.poll_once().await.unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(processor.calls().last().unwrap().1, d(3));
    }

    #[tokio::test]
    async fn test_recovered_day_releases_cursor() {
        let processor = Arc::new(FakeProcessor::new());
        processor.fail_times(d(1), 1);
        processor.add_file("gw", "202405010000");
        processor.add_file("gw", "202405020000");
        processor.add_file("gw", "202405030000");
        let store = Arc::new(MemoryDatasource::new());
        let gw = Source::new("gw");

        let mut l = listener(&processor, &store, Shutdown::new());
        l.prepare().unwrap();
        l.poll_once().await.unwrap();
        assert_eq!(l.cursor(&gw), None);
        assert_eq!(store.days(&gw), vec![d(2), d(3)]);

        let report = l.poll_once().await.unwrap();
        assert_eq!(
            report,
            PollReport {
                ingested: 1,
                ..PollReport::default()
            }
        );
        assert_eq!(store.days(&gw), vec![d(1), d(2), d(3)]);
        assert_eq!(l.cursor(&gw).unwrap().to_string(), "2024-05-03 00:00:00");

        assert_eq!(l.poll_once().await.unwrap(), PollReport::default());
        assert_eq!(processor.call_count(), 4);
    }

    #[tokio::test]
    async fn test_day_is_abandoned_after_retry_limit() {
        let mut failing = FakeProcessor::new();
        failing.failing_days.insert(d(1));
        let processor = Arc::new(failing);
        processor.add_file("gw", "202405010000");
        processor.add_file("gw", "202405020000");
        let store = Arc::new(MemoryDatasource::new());
        let gw = Source::new("gw");

        let mut l = listener(&processor, &store, Shutdown::new()).with_retry_limit(3);
        l.prepare().unwrap();
        for _ in 0..2 {
            assert_eq!(l.poll_once().await.unwrap().abandoned, 0);
        }
        let report = l.poll_once().await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert_eq!(l.cursor(&gw).unwrap().to_string(), "2024-05-02 00:00:00");

        let before = processor.call_count();
        assert_eq!(l.poll_once().await.unwrap(), PollReport::default());
        assert_eq!(processor.call_count(), before);
        assert_eq!(store.days(&gw), vec![d(2)]);
    }

    #[tokio::test]
    async fn test_shutdown_before_poll_skips_units() {
        let processor = Arc::new(FakeProcessor::new());
        processor.add_file("gw", "202405010000");
        let store = Arc::new(MemoryDatasource::new());
        let shutdown = Shutdown::new();
        let mut l = listener(&processor, &store, shutdown.clone());
        l.prepare().unwrap();

        shutdown.request();
        assert_eq!(l.poll_once().await.unwrap(), PollReport::default());
        assert_eq!(processor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let processor = Arc::new(FakeProcessor::new());
        processor.add_file("gw", "202405010000");
        let store = Arc::new(MemoryDatasource::new());
        let shutdown = Shutdown::new();
        let l = listener(&processor, &store, shutdown.clone());

        let handle = tokio::spawn(l.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.request();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_tool_stops_listener() {
        let processor = Arc::new(FakeProcessor::missing_tool());
        for day in 1..=6 {
            processor.add_file("gw", &format!("202405{day:02}0000"));
        }
        let store = Arc::new(MemoryDatasource::new());
        let mut l = listener(&processor, &store, Shutdown::new());
        l.prepare().unwrap();

        // Consecutive tool-missing failures escalate whether they span one poll or several.
        let mut result = Ok(PollReport::default());
        for _ in 0..5 {
            result = l.poll_once().await;
            if result.is_err() {
                break;
            }
        }
        assert!(is_tool_missing(&result.unwrap_err()));
    }
}
