//! `start`, `stop` and `status` on top of the PID file.
//!
//! The starting process claims the PID file with an exclusive create, spawns
//! a detached daemon and records its PID. The daemon itself takes an
//! [`InstanceLock`] for its lifetime, so two daemons can never run against the
//! same PID file even if the file is removed underneath them.

use std::ffi::OsString;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nfsen_core::error::{DaemonError, EXIT_DUPLICATE_INSTANCE, EXIT_LOCK_FILE_ERROR};

use crate::pid::{is_process_running, terminate, InstanceLock, PidFile, PidRecord, STARTING_GRACE};

// ── Spawning ──────────────────────────────────────────────────────────────────

/// Launches the daemon process.
pub trait DaemonSpawner {
    fn spawn(&self) -> Result<Child, DaemonError>;
}

/// Runs `program args…` detached from the terminal in its own process group.
#[derive(Debug, Clone)]
pub struct ExecSpawner {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Appended to by the daemon's stdout and stderr. Discarded when `None`.
    pub log_file: Option<PathBuf>,
}

impl ExecSpawner {
    /// Re-run the current executable with `args`.
    pub fn current_exe(args: Vec<OsString>, log_file: Option<PathBuf>) -> Result<Self, DaemonError> {
        let program = std::env::current_exe()
            .map_err(|e| DaemonError::BinaryNotFound(format!("Cannot locate own executable: {e}")))?;
        Ok(Self {
            program,
            args,
            log_file,
        })
    }

    fn output(&self) -> Result<(Stdio, Stdio), DaemonError> {
        let Some(path) = &self.log_file else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DaemonError::SpawnFailed(format!("cannot open log {}: {e}", path.display())))?;
        let err = file
            .try_clone()
            .map_err(|e| DaemonError::SpawnFailed(e.to_string()))?;
        Ok((Stdio::from(file), Stdio::from(err)))
    }
}

impl DaemonSpawner for ExecSpawner {
    fn spawn(&self) -> Result<Child, DaemonError> {
        let (stdout, stderr) = self.output()?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DaemonError::BinaryNotFound(format!("{} not found", self.program.display()))
            } else {
                DaemonError::SpawnFailed(e.to_string())
            }
        })
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
    /// Another `start` is between claiming the PID file and recording a PID.
    Starting,
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started { pid } => write!(f, "Daemon running, pid={pid}"),
            StartOutcome::AlreadyRunning { pid } => write!(f, "Daemon already running, pid={pid}"),
            StartOutcome::Starting => f.write_str("Daemon is starting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: u32 },
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::NotRunning => f.write_str("Not running"),
            StopOutcome::Stopped { .. } => f.write_str("Stopped."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    NotRunning,
    Starting,
    Running { pid: u32 },
    /// The PID file pointed at a dead process (or held garbage) and was removed.
    Stale { recorded: String },
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonStatus::NotRunning => f.write_str("Not running"),
            DaemonStatus::Starting => f.write_str("Starting"),
            DaemonStatus::Running { pid } => write!(f, "Running: {pid}"),
            DaemonStatus::Stale { recorded } => {
                write!(f, "Not running (stale PID file: {recorded})")
            }
        }
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct DaemonControl {
    pid_file: PidFile,
    /// How long `start` watches the new process for an early exit.
    startup_grace: Duration,
}

impl DaemonControl {
    pub fn new(pid_path: impl AsRef<Path>) -> Self {
        Self {
            pid_file: PidFile::new(pid_path),
            startup_grace: Duration::from_secs(1),
        }
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    /// Launch the daemon unless one is already running.
    pub fn start(&self, spawner: &dyn DaemonSpawner) -> Result<StartOutcome, DaemonError> {
        // Two rounds: a stale file found in the first is removed before the second.
        for _ in 0..2 {
            if let Some(file) = self.pid_file.claim()? {
                let mut child = match spawner.spawn() {
                    Ok(child) => child,
                    Err(e) => {
                        self.pid_file.remove()?;
                        return Err(e);
                    }
                };
                let pid = child.id();
                if pid == 0 {
                    self.pid_file.remove()?;
                    return Err(DaemonError::PidNotConfirmed);
                }
                self.pid_file.fill(file, pid)?;
                self.watch_startup(&mut child, pid)?;
                return Ok(StartOutcome::Started { pid });
            }

            match self.pid_file.read()? {
                PidRecord::Pid(pid) if is_process_running(pid) => {
                    return Ok(StartOutcome::AlreadyRunning { pid });
                }
                PidRecord::Empty { age } if age < STARTING_GRACE => {
                    return Ok(StartOutcome::Starting);
                }
                PidRecord::Missing => continue,
                stale => {
                    tracing::warn!(path = %self.pid_file.path().display(), ?stale, "removing stale PID file");
                    self.pid_file.remove()?;
                }
            }
        }
        Err(DaemonError::PidFileCreation {
            path: self.pid_file.path().to_path_buf(),
            reason: "PID file was recreated concurrently".to_string(),
        })
    }

    /// Signal the daemon and remove the PID file.
    pub fn stop(&self) -> Result<StopOutcome, DaemonError> {
        match self.pid_file.read()? {
            PidRecord::Missing => Ok(StopOutcome::NotRunning),
            PidRecord::Pid(pid) => {
                if !terminate(pid)? {
                    tracing::warn!(pid, "daemon was not running");
                }
                self.pid_file.remove()?;
                Ok(StopOutcome::Stopped { pid })
            }
            other => {
                tracing::warn!(record = ?other, "PID file holds no process id; removing it");
                self.pid_file.remove()?;
                Ok(StopOutcome::NotRunning)
            }
        }
    }

    /// Report liveness, cleaning up a PID file that outlived its process.
    pub fn status(&self) -> Result<DaemonStatus, DaemonError> {
        match self.pid_file.read()? {
            PidRecord::Missing => Ok(DaemonStatus::NotRunning),
            PidRecord::Pid(pid) if is_process_running(pid) => Ok(DaemonStatus::Running { pid }),
            PidRecord::Empty { age } if age < STARTING_GRACE => Ok(DaemonStatus::Starting),
            record => {
                self.pid_file.remove()?;
                let recorded = match record {
                    PidRecord::Pid(pid) => pid.to_string(),
                    PidRecord::Invalid(raw) => raw,
                    _ => "empty".to_string(),
                };
                Ok(DaemonStatus::Stale { recorded })
            }
        }
    }

    /// Daemon-side startup: take the instance lock, then record our own PID.
    pub fn enter_daemon(&self, lock_path: &Path) -> Result<DaemonGuard, DaemonError> {
        let lock = InstanceLock::acquire(lock_path)?;
        let pid = std::process::id();
        self.pid_file.write(pid)?;
        Ok(DaemonGuard {
            _lock: lock,
            pid_file: self.pid_file.clone(),
            pid,
        })
    }

    fn watch_startup(&self, child: &mut Child, pid: u32) -> Result<(), DaemonError> {
        let deadline = Instant::now() + self.startup_grace;
        loop {
            let exited = child
                .try_wait()
                .map_err(|e| DaemonError::SpawnFailed(e.to_string()))?;
            if let Some(status) = exited {
                self.pid_file.remove_if_owned(pid)?;
                return Err(match status.code() {
                    Some(EXIT_LOCK_FILE_ERROR) => DaemonError::LockFile {
                        path: self.pid_file.path().with_extension("lock"),
                        reason: "reported by daemon".to_string(),
                    },
                    Some(EXIT_DUPLICATE_INSTANCE) => DaemonError::DuplicateInstance,
                    _ => DaemonError::SpawnFailed(format!("daemon exited during startup ({status})")),
                });
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

/// Held by the running daemon. Releases the lock and removes its own PID
/// file entry on drop.
pub struct DaemonGuard {
    _lock: InstanceLock,
    pid_file: PidFile,
    pid: u32,
}

impl DaemonGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Err(e) = self.pid_file.remove_if_owned(self.pid) {
            tracing::warn!(error = %e, "failed to remove PID file on shutdown");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
