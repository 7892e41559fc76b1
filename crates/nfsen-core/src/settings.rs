//! Settings file loading and validation.
//!
//! The settings file is read exactly once at startup and turned into an
//! immutable [`Config`] that is handed to every component explicitly. Backend
//! selectors are resolved to enums here so that an unknown name is rejected
//! before any work begins.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::Source;

// ── Defaults ───────────────────────────────────────────────────────────────────

pub const DEFAULT_PROFILE: &str = "live";
pub const DEFAULT_MAX_PROCESSES: usize = 1;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

const APP_DIR: &str = "nfsen-ng";

/// `<config_dir>/nfsen-ng/settings.json`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("settings.json")
}

/// `<data_local_dir>/nfsen-ng`, where the PID file, lock and daemon log live.
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

// ── Backend selectors ──────────────────────────────────────────────────────────

/// Storage backends known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasourceKind {
    /// One JSON document per source on local disk.
    Json,
    /// Process-local store, useful for dry runs.
    Memory,
}

impl DatasourceKind {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "json" => Ok(DatasourceKind::Json),
            "memory" => Ok(DatasourceKind::Memory),
            _ => Err(ConfigError::UnknownDatasource(name.to_string())),
        }
    }
}

/// Flow tools the processor registry knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessorKind {
    #[default]
    Nfdump,
}

impl ProcessorKind {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "nfdump" => Ok(ProcessorKind::Nfdump),
            _ => Err(ConfigError::UnknownProcessor(name.to_string())),
        }
    }
}

// ── Raw file format ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawSettings {
    general: RawGeneral,
    nfdump: RawNfdump,
    #[serde(default)]
    db: BTreeMap<String, RawDb>,
    #[serde(default)]
    log: RawLog,
    #[serde(default)]
    daemon: RawDaemon,
}

#[derive(Debug, Deserialize)]
struct RawGeneral {
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    ports: Vec<u16>,
    db: String,
    #[serde(default)]
    processor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawNfdump {
    binary: PathBuf,
    profiles_data: PathBuf,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    max_processes: Option<usize>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDb {
    #[serde(default)]
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLog {
    #[serde(default)]
    priority: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawDaemon {
    #[serde(default)]
    poll_interval: Option<u64>,
    #[serde(default)]
    state_dir: Option<PathBuf>,
    #[serde(default)]
    pid_file: Option<PathBuf>,
}

// ── Config ─────────────────────────────────────────────────────────────────────

/// Settings of the external flow tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfdumpSettings {
    pub binary: PathBuf,
    pub profiles_data: PathBuf,
    pub profile: String,
    /// Upper bound on concurrently running tool processes.
    pub max_processes: usize,
    pub timeout: Duration,
}

impl NfdumpSettings {
    /// `<profiles-data>/<profile>/<source>`
    pub fn source_dir(&self, source: &Source) -> PathBuf {
        self.profiles_data.join(&self.profile).join(source.as_str())
    }
}

/// Settings of the background listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    pub poll_interval: Duration,
    pub state_dir: PathBuf,
    pub pid_file: PathBuf,
}

impl DaemonSettings {
    /// Advisory lock held by the running daemon for its whole lifetime.
    pub fn lock_file(&self) -> PathBuf {
        self.pid_file.with_extension("lock")
    }

    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join("nfsen-ng.log")
    }
}

/// Validated, immutable runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sources: Vec<Source>,
    pub ports: Vec<u16>,
    pub datasource: DatasourceKind,
    pub processor: ProcessorKind,
    pub nfdump: NfdumpSettings,
    /// Directory of the JSON datasource.
    pub store_path: PathBuf,
    pub log_level: String,
    pub daemon: DaemonSettings,
}

impl Config {
    /// Read and validate the settings file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::SettingsNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content, path)
    }

    /// Parse and validate settings already read into memory. `origin` is only
    /// used for error messages.
    pub fn from_json(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: RawSettings = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let datasource = DatasourceKind::parse(&raw.general.db)?;
        let processor = match raw.general.processor.as_deref() {
            Some(name) => ProcessorKind::parse(name)?,
            None => ProcessorKind::default(),
        };

        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(raw.general.sources.len());
        for name in raw.general.sources {
            let name = name.trim().to_string();
            if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
                return Err(ConfigError::Invalid(format!("Invalid source name '{name}'")));
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::Invalid(format!("Source '{name}' is configured twice")));
            }
            sources.push(Source::new(name));
        }

        if raw.nfdump.binary.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("nfdump.binary must not be empty".to_string()));
        }
        let max_processes = raw.nfdump.max_processes.unwrap_or(DEFAULT_MAX_PROCESSES);
        if max_processes == 0 {
            return Err(ConfigError::Invalid("nfdump.max-processes must be at least 1".to_string()));
        }

        let state_dir = raw.daemon.state_dir.unwrap_or_else(default_state_dir);
        let pid_file = raw
            .daemon
            .pid_file
            .unwrap_or_else(|| state_dir.join("nfsen-ng.pid"));
        let store_path = raw
            .db
            .get("json")
            .and_then(|db| db.path.clone())
            .unwrap_or_else(|| state_dir.join("db"));

        let mut ports = raw.general.ports;
        ports.sort_unstable();
        ports.dedup();

        Ok(Config {
            sources,
            ports,
            datasource,
            processor,
            nfdump: NfdumpSettings {
                binary: raw.nfdump.binary,
                profiles_data: raw.nfdump.profiles_data,
                profile: raw.nfdump.profile.unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
                max_processes,
                timeout: Duration::from_secs(raw.nfdump.timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS)),
            },
            store_path,
            log_level: raw.log.priority.unwrap_or_else(|| "INFO".to_string()),
            daemon: DaemonSettings {
                poll_interval: Duration::from_secs(
                    raw.daemon.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS).max(1),
                ),
                state_dir,
                pid_file,
            },
        })
    }

    /// `<profiles-data>/<profile>/<source>`
    pub fn source_dir(&self, source: &Source) -> PathBuf {
        self.nfdump.source_dir(source)
    }
}
