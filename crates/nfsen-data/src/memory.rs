//! Process-local datasource.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use nfsen_core::error::DatasourceError;
use nfsen_core::models::{DayStatistics, Source};

use crate::datasource::{Datasource, SourceRecord};

/// Keeps every bucket in memory; contents vanish with the process.
#[derive(Default)]
pub struct MemoryDatasource {
    records: Mutex<HashMap<Source, SourceRecord>>,
    writes: AtomicUsize,
}

impl MemoryDatasource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `write` calls since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Days stored for `source`, ascending.
    pub fn days(&self, source: &Source) -> Vec<NaiveDate> {
        self.lock()
            .map(|records| {
                records
                    .get(source)
                    .map(|r| r.buckets.keys().copied().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Source, SourceRecord>>, DatasourceError> {
        self.records
            .lock()
            .map_err(|_| DatasourceError::Backend("memory store lock poisoned".to_string()))
    }
}

impl Datasource for MemoryDatasource {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&self, source: &Source, day: NaiveDate, stats: &DayStatistics) -> Result<(), DatasourceError> {
        self.lock()?.entry(source.clone()).or_default().upsert(day, stats);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self, source: &Source, day: NaiveDate) -> Result<Option<DayStatistics>, DatasourceError> {
        Ok(self
            .lock()?
            .get(source)
            .and_then(|r| r.buckets.get(&day).cloned()))
    }

    fn read_last_imported(&self, source: &Source) -> Result<Option<NaiveDate>, DatasourceError> {
        Ok(self.lock()?.get(source).and_then(|r| r.last_imported))
    }

    fn record_checkpoint(&self, source: &Source, day: NaiveDate) -> Result<(), DatasourceError> {
        self.lock()?.entry(source.clone()).or_default().advance(day);
        Ok(())
    }
}
