//! The per-unit step shared by the import and the daemon loop.

use std::fmt;

use chrono::NaiveDate;
use nfsen_core::error::{DatasourceError, ProcessorError};
use nfsen_core::models::{DayStatistics, ProcessOptions, Source};
use nfsen_data::datasource::Datasource;
use nfsen_data::processor::Processor;

/// Consecutive tool-missing units after which a job is aborted.
pub const TOOL_MISSING_ABORT_THRESHOLD: u32 = 5;

/// Why a single unit did not reach the datasource.
#[derive(Debug)]
pub enum UnitFailure {
    Processor(ProcessorError),
    Datasource(DatasourceError),
}

impl UnitFailure {
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, UnitFailure::Processor(e) if e.is_tool_missing())
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitFailure::Processor(e) => write!(f, "processing failed: {e}"),
            UnitFailure::Datasource(e) => write!(f, "write failed: {e}"),
        }
    }
}

/// Store the processor's result for `(source, day)`.
pub fn commit(
    datasource: &dyn Datasource,
    source: &Source,
    day: NaiveDate,
    processed: Result<DayStatistics, ProcessorError>,
) -> Result<DayStatistics, UnitFailure> {
    let stats = processed.map_err(UnitFailure::Processor)?;
    datasource
        .write(source, day, &stats)
        .map_err(UnitFailure::Datasource)?;
    Ok(stats)
}

/// Process and store one unit in sequence.
pub async fn ingest_day(
    processor: &dyn Processor,
    datasource: &dyn Datasource,
    source: &Source,
    day: NaiveDate,
    options: &ProcessOptions,
) -> Result<DayStatistics, UnitFailure> {
    let processed = processor.process(source, day, options).await;
    commit(datasource, source, day, processed)
}

// ── ToolMissingGuard ───────────────────────────────────────────────────────────

/// Counts consecutive tool-missing failures so a vanished binary aborts the
/// job instead of skipping every remaining unit.
#[derive(Debug)]
pub struct ToolMissingGuard {
    consecutive: u32,
    threshold: u32,
}

impl ToolMissingGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    /// Feed one unit outcome. Returns `true` when the threshold is reached.
    pub fn observe(&mut self, failure: Option<&UnitFailure>) -> bool {
        match failure {
            Some(f) if f.is_tool_missing() => {
                self.consecutive += 1;
                self.consecutive >= self.threshold
            }
            _ => {
                self.consecutive = 0;
                false
            }
        }
    }
}

impl Default for ToolMissingGuard {
    fn default() -> Self {
        Self::new(TOOL_MISSING_ABORT_THRESHOLD)
    }
}
