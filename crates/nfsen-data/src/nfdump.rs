//! nfdump-backed [`Processor`].
//!
//! Each unit runs `nfdump -R <day-dir> -I` and parses the statistics summary.
//! Port statistics repeat the call once per configured port with the filter
//! `port <n>`. Arguments are passed as a vector; no shell is involved.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use nfsen_core::capture::{self, CaptureFile};
use nfsen_core::error::ProcessorError;
use nfsen_core::models::{DayStatistics, FlowStatistic, PortStatistic, ProcessOptions, Source};
use nfsen_core::settings::NfdumpSettings;
use nfsen_core::time_utils;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::processor::Processor;
use crate::summary::parse_summary;

pub struct NfdumpProcessor {
    settings: NfdumpSettings,
}

impl NfdumpProcessor {
    pub fn new(settings: &NfdumpSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    fn tool_missing(&self) -> ProcessorError {
        ProcessorError::ToolMissing {
            binary: self.settings.binary.clone(),
        }
    }

    /// Run the tool once and return its stdout.
    async fn run(&self, args: Vec<OsString>) -> Result<String, ProcessorError> {
        trace!(binary = %self.settings.binary.display(), ?args, "spawning flow tool");

        let mut cmd = Command::new(&self.settings.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let secs = self.settings.timeout.as_secs();
        let output = tokio::time::timeout(self.settings.timeout, cmd.output())
            .await
            .map_err(|_| ProcessorError::Timeout { secs })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    self.tool_missing()
                }
                _ => ProcessorError::Io(e),
            })?;

        if !output.status.success() {
            return Err(ProcessorError::ToolExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn summarize(&self, day_dir: &Path, filter: Option<String>) -> Result<FlowStatistic, ProcessorError> {
        let output = self.run(summary_args(day_dir, filter)).await?;
        parse_summary(&output)
    }
}

/// `-R <day-dir> -I [filter]`
fn summary_args(day_dir: &Path, filter: Option<String>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-R".into(), day_dir.as_os_str().to_owned(), "-I".into()];
    if let Some(filter) = filter {
        args.push(filter.into());
    }
    args
}

#[async_trait]
impl Processor for NfdumpProcessor {
    fn name(&self) -> &'static str {
        "nfdump"
    }

    fn check(&self) -> Result<(), ProcessorError> {
        match resolve_binary(&self.settings.binary) {
            Some(path) => {
                debug!(binary = %path.display(), "flow tool found");
                Ok(())
            }
            None => Err(self.tool_missing()),
        }
    }

    async fn process(
        &self,
        source: &Source,
        day: NaiveDate,
        options: &ProcessOptions,
    ) -> Result<DayStatistics, ProcessorError> {
        let source_dir = self.settings.source_dir(source);
        let day_dir = capture::day_dir(&source_dir, day);
        let files = capture::list_day(source, &source_dir, day).map_err(|e| ProcessorError::Scan {
            path: day_dir.clone(),
            source: e,
        })?;

        if files.is_empty() {
            debug!(source = %source, %day, "no capture files");
            return Ok(DayStatistics::empty(day));
        }

        let flows = self.summarize(&day_dir, None).await?;

        let ports = match options.port_scope() {
            Some(scope) => {
                let mut per_port = BTreeMap::new();
                for port in &options.ports {
                    let stats = self.summarize(&day_dir, Some(format!("port {port}"))).await?;
                    per_port.insert(*port, stats);
                }
                Some(PortStatistic {
                    scope,
                    ports: per_port,
                })
            }
            None => None,
        };

        Ok(DayStatistics {
            day,
            flows,
            ports,
            capture_files: files.len(),
        })
    }

    fn list_new_files(
        &self,
        source: &Source,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<CaptureFile>, ProcessorError> {
        let source_dir = self.settings.source_dir(source);
        capture::list_since(source, &source_dir, since, time_utils::today()).map_err(|e| {
            ProcessorError::Scan {
                path: source_dir.clone(),
                source: e,
            }
        })
    }
}

// ── Binary lookup ──────────────────────────────────────────────────────────────

/// Resolve `binary` to an executable file, searching `PATH` for bare names.
pub fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 || binary.is_absolute() {
        return is_executable(binary).then(|| binary.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
