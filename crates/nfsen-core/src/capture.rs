//! Capture file naming and discovery.
//!
//! nfcapd rotates one file per interval and names it `nfcapd.YYYYMMDDhhmm`.
//! Files live in `<source>/YYYY/MM/DD/`; the file being written is called
//! `nfcapd.current.<pid>` and is never picked up.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::{debug, warn};

use crate::models::Source;
use crate::time_utils::DayRange;

pub const CAPTURE_PREFIX: &str = "nfcapd.";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^nfcapd\.([0-9]{12})$").expect("static regex"))
}

/// `true` for the in-progress file nfcapd is still writing.
pub fn is_current_file(name: &str) -> bool {
    name.contains(".current.")
}

/// Parse the slot timestamp out of a capture file name.
pub fn parse_capture_name(name: &str) -> Option<NaiveDateTime> {
    let caps = name_pattern().captures(name)?;
    NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M").ok()
}

/// `<source_dir>/YYYY/MM/DD`
pub fn day_dir(source_dir: &Path, day: NaiveDate) -> PathBuf {
    source_dir
        .join(format!("{:04}", day.year()))
        .join(format!("{:02}", day.month()))
        .join(format!("{:02}", day.day()))
}

// ── CaptureFile ────────────────────────────────────────────────────────────────

/// A rotated capture file belonging to one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub source: Source,
    pub path: PathBuf,
    /// Start of the capture interval, taken from the file name.
    pub timestamp: NaiveDateTime,
}

impl CaptureFile {
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

// ── Discovery ──────────────────────────────────────────────────────────────────

/// List the capture files of a single day, sorted by timestamp.
///
/// A missing day directory is not an error: the collector simply had no data
/// for that day. Badly named files are logged and skipped.
pub fn list_day(source: &Source, source_dir: &Path, day: NaiveDate) -> std::io::Result<Vec<CaptureFile>> {
    let dir = day_dir(source_dir, day);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(&dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_current_file(&name) {
            continue;
        }
        match parse_capture_name(&name) {
            Some(timestamp) => files.push(CaptureFile {
                source: source.clone(),
                path: entry.path().to_path_buf(),
                timestamp,
            }),
            None => warn!(
                source = %source,
                "Bad file name format of nfcapd file: {}",
                entry.path().display()
            ),
        }
    }

    files.sort_by_key(|f| f.timestamp);
    Ok(files)
}

/// List capture files strictly newer than `since`, up to and including
/// `today`, in ascending order.
///
/// Only the day directories between the cursor's day and `today` are scanned,
/// so repeated polls never walk the whole history. Without a cursor the scan
/// starts at `today`.
pub fn list_since(
    source: &Source,
    source_dir: &Path,
    since: Option<NaiveDateTime>,
    today: NaiveDate,
) -> std::io::Result<Vec<CaptureFile>> {
    let first_day = since.map(|s| s.date()).unwrap_or(today);

    let mut files = Vec::new();
    for day in DayRange::new(first_day, today) {
        files.extend(
            list_day(source, source_dir, day)?
                .into_iter()
                .filter(|f| since.map_or(true, |s| f.timestamp > s)),
        );
    }

    debug!(source = %source, count = files.len(), "capture scan finished");
    Ok(files)
}
