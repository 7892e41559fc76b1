//! The datasource contract and its static registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use nfsen_core::error::DatasourceError;
use nfsen_core::models::{DayStatistics, Source};
use nfsen_core::settings::{Config, DatasourceKind};
use serde::{Deserialize, Serialize};

use crate::json_store::JsonDatasource;
use crate::memory::MemoryDatasource;

/// Persists day buckets and per-source checkpoints.
///
/// Writes are upserts keyed by (source, day), so the import and the daemon can
/// both write through the same backend and a repeated write simply replaces
/// the bucket.
pub trait Datasource: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Insert or replace the bucket for `(source, day)`.
    fn write(&self, source: &Source, day: NaiveDate, stats: &DayStatistics) -> Result<(), DatasourceError>;

    /// Stored bucket for `(source, day)`, if any.
    fn read(&self, source: &Source, day: NaiveDate) -> Result<Option<DayStatistics>, DatasourceError>;

    /// Last day whose import is complete, if any.
    fn read_last_imported(&self, source: &Source) -> Result<Option<NaiveDate>, DatasourceError>;

    /// Persist `day` as the checkpoint of `source`. Never moves backwards.
    fn record_checkpoint(&self, source: &Source, day: NaiveDate) -> Result<(), DatasourceError>;
}

/// Instantiate the backend selected in the settings.
pub fn open_datasource(config: &Config) -> Result<Arc<dyn Datasource>, DatasourceError> {
    Ok(match config.datasource {
        DatasourceKind::Json => Arc::new(JsonDatasource::open(&config.store_path)?),
        DatasourceKind::Memory => Arc::new(MemoryDatasource::new()),
    })
}

// ── Shared record ──────────────────────────────────────────────────────────────

/// Everything a backend keeps for one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(default)]
    pub last_imported: Option<NaiveDate>,
    #[serde(default)]
    pub buckets: BTreeMap<NaiveDate, DayStatistics>,
}

impl SourceRecord {
    pub fn upsert(&mut self, day: NaiveDate, stats: &DayStatistics) {
        self.buckets.insert(day, stats.clone());
    }

    /// Advance the checkpoint, ignoring days before the current one.
    pub fn advance(&mut self, day: NaiveDate) {
        if self.last_imported.map_or(true, |current| day > current) {
            self.last_imported = Some(day);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_record_advance_is_monotonic() {
        let mut record = SourceRecord::default();
        record.advance(d(5));
        record.advance(d(3));
        assert_eq!(record.last_imported, Some(d(5)));
        record.advance(d(6));
        assert_eq!(record.last_imported, Some(d(6)));
    }

    #[test]
    fn test_record_upsert_replaces() {
        let mut record = SourceRecord::default();
        let mut stats = DayStatistics::empty(d(1));
        record.upsert(d(1), &stats);
        stats.capture_files = 3;
        record.upsert(d(1), &stats);
        assert_eq!(record.buckets.len(), 1);
        assert_eq!(record.buckets[&d(1)].capture_files, 3);
    }

    #[test]
    fn test_registry_opens_selected_backend() {
        let tmp = tempfile::TempDir::new().unwrap();
        let json = format!(
            r#"{{ "general": {{ "sources": ["gw"], "db": "json" }},
                 "nfdump": {{ "binary": "nfdump", "profiles-data": "/data" }},
                 "db": {{ "json": {{ "path": {:?} }} }} }}"#,
            tmp.path().join("db").to_string_lossy()
        );
        let config = Config::from_json(&json, Path::new("settings.json")).unwrap();
        assert_eq!(open_datasource(&config).unwrap().name(), "json");

        let config = Config {
            datasource: DatasourceKind::Memory,
            ..config
        };
        assert_eq!(open_datasource(&config).unwrap().name(), "memory");
    }
}
