//! Scripted processor shared by the runtime tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use nfsen_core::capture::CaptureFile;
use nfsen_core::error::ProcessorError;
use nfsen_core::models::{DayStatistics, ProcessOptions, Source, TrafficCounters};
use nfsen_data::processor::Processor;

#[derive(Default)]
pub struct FakeProcessor {
    pub delay: Duration,
    pub failing_days: HashSet<NaiveDate>,
    pub tool_missing: bool,
    pub files: Mutex<Vec<CaptureFile>>,
    /// Days that fail a limited number of times before succeeding.
    transient: Mutex<HashMap<NaiveDate, usize>>,
    calls: Mutex<Vec<(Source, NaiveDate)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn missing_tool() -> Self {
        Self {
            tool_missing: true,
            ..Self::default()
        }
    }

    pub fn fail_times(&self, day: NaiveDate, times: usize) {
        self.transient.lock().unwrap().insert(day, times);
    }

    pub fn calls(&self) -> Vec<(Source, NaiveDate)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn add_file(&self, source: &str, stamp: &str) {
        let name = format!("nfcapd.{stamp}");
        let timestamp = nfsen_core::capture::parse_capture_name(&name).unwrap();
        self.files.lock().unwrap().push(CaptureFile {
            source: Source::new(source),
            path: PathBuf::from(name),
            timestamp,
        });
    }
}

#[async_trait]
impl Processor for FakeProcessor {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn check(&self) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn process(
        &self,
        source: &Source,
        day: NaiveDate,
        _options: &ProcessOptions,
    ) -> Result<DayStatistics, ProcessorError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push((source.clone(), day));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.tool_missing {
            return Err(ProcessorError::ToolMissing {
                binary: PathBuf::from("/missing/nfdump"),
            });
        }
        if let Some(remaining) = self.transient.lock().unwrap().get_mut(&day) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProcessorError::ParseError {
                    detail: format!("transient failure for {day}"),
                });
            }
        }
        if self.failing_days.contains(&day) {
            return Err(ProcessorError::ParseError {
                detail: format!("scripted failure for {day}"),
            });
        }
        let mut stats = DayStatistics::empty(day);
        stats.flows.total = TrafficCounters {
            flows: 1,
            packets: 2,
            bytes: 3,
        };
        Ok(stats)
    }

    fn list_new_files(
        &self,
        source: &Source,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<CaptureFile>, ProcessorError> {
        let mut files: Vec<CaptureFile> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| &f.source == source && since.map_or(true, |s| f.timestamp > s))
            .cloned()
            .collect();
        files.sort_by_key(|f| f.timestamp);
        Ok(files)
    }
}
