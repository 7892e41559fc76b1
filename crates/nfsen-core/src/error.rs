use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by nfsen-ng.
#[derive(Error, Debug)]
pub enum NfsenError {
    /// Settings are missing, unreadable or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Capture files are not laid out as `<source>/YYYY/MM/DD/nfcapd.*`.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// A processor invocation failed.
    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    /// The datasource backend failed.
    #[error("Datasource error: {0}")]
    Datasource(#[from] DatasourceError),

    /// Daemon lifecycle failure (PID file, lock, spawn, signal).
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the nfsen crates.
pub type Result<T> = std::result::Result<T, NfsenError>;

// ── Configuration ──────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No settings file found at {0}. Did you copy the distributed settings?")]
    SettingsNotFound(PathBuf),

    #[error("Failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown datasource '{0}'")]
    UnknownDatasource(String),

    #[error("Unknown processor '{0}'")]
    UnknownProcessor(String),

    #[error("{0}")]
    Invalid(String),
}

// ── Directory layout ───────────────────────────────────────────────────────────

/// Every problem found while validating the capture directory hierarchy.
///
/// The message lists all offending sources at once so that an operator can fix
/// them in one pass.
#[derive(Error, Debug)]
#[error(
    "Invalid nfcapd directory structure detected:\n\n{}\n\nFor more information, see INSTALL.md",
    .problems.join("\n")
)]
pub struct LayoutError {
    pub problems: Vec<String>,
    /// Sources that failed validation, in configuration order.
    pub sources: Vec<String>,
}

// ── Processor ──────────────────────────────────────────────────────────────────

/// Failure of a single processor unit.
///
/// Only [`ProcessorError::ToolMissing`] is considered fatal for a whole job;
/// everything else is recovered per unit.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Flow tool binary not found or not executable: {binary}")]
    ToolMissing { binary: PathBuf },

    #[error("Flow tool exited with {}: {stderr}", describe_exit(.exit_code))]
    ToolExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Could not parse flow tool output: {detail}")]
    ParseError { detail: String },

    #[error("Flow tool did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {code}"),
        None => "signal".to_string(),
    }
}

impl ProcessorError {
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, ProcessorError::ToolMissing { .. })
    }
}

// ── Datasource ─────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum DatasourceError {
    #[error("Failed to access store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Backend(String),
}

// ── Daemon lifecycle ───────────────────────────────────────────────────────────

/// Exit code reported when the lock file cannot be opened or locked.
pub const EXIT_LOCK_FILE_ERROR: i32 = 128;

/// Exit code reported when another daemon instance holds the lock.
pub const EXIT_DUPLICATE_INSTANCE: i32 = 129;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to read PID file at {path}: {reason}")]
    PidFileRead { path: PathBuf, reason: String },

    #[error("Failed to create PID file at {path}: {reason}")]
    PidFileCreation { path: PathBuf, reason: String },

    #[error("Failed to remove PID file at {path}: {reason}")]
    PidFileRemoval { path: PathBuf, reason: String },

    #[error("Unexpected error opening or locking lock file {path}: {reason}. Perhaps you don't have permission to write to the lock file or its containing directory?")]
    LockFile { path: PathBuf, reason: String },

    #[error("Another instance is already running; terminating.")]
    DuplicateInstance,

    #[error("Failed to start daemon: {0}")]
    SpawnFailed(String),

    #[error("Failed to start daemon. Could not retrieve valid PID.")]
    PidNotConfirmed,

    #[error("Failed to start daemon. {0}")]
    BinaryNotFound(String),

    #[error("Failed to signal PID {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),
}

impl DaemonError {
    /// Process exit code the CLI reports for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::LockFile { .. } => EXIT_LOCK_FILE_ERROR,
            DaemonError::DuplicateInstance => EXIT_DUPLICATE_INSTANCE,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_settings_not_found() {
        let err = ConfigError::SettingsNotFound(PathBuf::from("/etc/nfsen-ng/settings.json"));
        let msg = err.to_string();
        assert!(msg.contains("/etc/nfsen-ng/settings.json"));
    }

    #[test]
    fn test_error_display_unknown_selectors() {
        assert_eq!(
            ConfigError::UnknownDatasource("rrd".to_string()).to_string(),
            "Unknown datasource 'rrd'"
        );
        assert_eq!(
            ConfigError::UnknownProcessor("flowtools".to_string()).to_string(),
            "Unknown processor 'flowtools'"
        );
    }

    #[test]
    fn test_layout_error_lists_every_problem() {
        let err = LayoutError {
            problems: vec!["first problem".to_string(), "second problem".to_string()],
            sources: vec!["gw".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid nfcapd directory structure detected:"));
        assert!(msg.contains("first problem\nsecond problem"));
        assert!(msg.contains("INSTALL.md"));
    }

    #[test]
    fn test_processor_error_display_exit_code() {
        let err = ProcessorError::ToolExecutionFailed {
            exit_code: Some(255),
            stderr: "bad filter".to_string(),
        };
        assert_eq!(err.to_string(), "Flow tool exited with code 255: bad filter");

        let err = ProcessorError::ToolExecutionFailed {
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_processor_error_tool_missing_flag() {
        let missing = ProcessorError::ToolMissing {
            binary: PathBuf::from("/usr/bin/nfdump"),
        };
        assert!(missing.is_tool_missing());
        assert!(!ProcessorError::Timeout { secs: 5 }.is_tool_missing());
    }

    #[test]
    fn test_daemon_exit_codes() {
        let lock = DaemonError::LockFile {
            path: PathBuf::from("/run/nfsen-ng.lock"),
            reason: "denied".to_string(),
        };
        assert_eq!(lock.exit_code(), 128);
        assert_eq!(DaemonError::DuplicateInstance.exit_code(), 129);
        assert_eq!(DaemonError::PidNotConfirmed.exit_code(), 1);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: NfsenError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_from_processor() {
        let err: NfsenError = ProcessorError::Timeout { secs: 30 }.into();
        assert_eq!(err.to_string(), "Processor error: Flow tool did not finish within 30s");
    }
}
