//! The processor contract and its static registry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use nfsen_core::capture::CaptureFile;
use nfsen_core::error::ProcessorError;
use nfsen_core::models::{DayStatistics, ProcessOptions, Source};
use nfsen_core::settings::{Config, ProcessorKind};

use crate::nfdump::NfdumpProcessor;

/// Converts capture files into aggregates by driving an external flow tool.
///
/// Every [`Processor::process`] call is one unit of work and runs the tool as
/// its own child process; callers bound how many units run at once.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Verify the tool can be run at all. A failure here is fatal for the job.
    fn check(&self) -> Result<(), ProcessorError>;

    /// Aggregate one (source, day) bucket.
    async fn process(
        &self,
        source: &Source,
        day: NaiveDate,
        options: &ProcessOptions,
    ) -> Result<DayStatistics, ProcessorError>;

    /// Capture files of `source` strictly newer than `since`, ascending.
    fn list_new_files(
        &self,
        source: &Source,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<CaptureFile>, ProcessorError>;
}

/// Instantiate the processor selected in the settings.
pub fn build_processor(config: &Config) -> Arc<dyn Processor> {
    match config.processor {
        ProcessorKind::Nfdump => Arc::new(NfdumpProcessor::new(&config.nfdump)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_registry_resolves_nfdump() {
        let config = Config::from_json(
            r#"{ "general": { "sources": ["gw"], "db": "memory" },
                 "nfdump": { "binary": "/usr/bin/nfdump", "profiles-data": "/data" } }"#,
            Path::new("settings.json"),
        )
        .unwrap();
        let processor = build_processor(&config);
        assert_eq!(processor.name(), "nfdump");
    }
}
