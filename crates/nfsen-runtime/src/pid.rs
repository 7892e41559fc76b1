//! PID file and single-instance lock for the daemon.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nfsen_core::error::DaemonError;

/// How long an empty PID file is taken to mean "a start is in progress".
pub const STARTING_GRACE: Duration = Duration::from_secs(10);

/// What a PID file currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidRecord {
    Missing,
    /// Created but not yet filled in by the starting process.
    Empty { age: Duration },
    Pid(u32),
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<PidRecord, DaemonError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PidRecord::Missing),
            Err(e) => {
                return Err(DaemonError::PidFileRead {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            let age = fs::metadata(&self.path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .unwrap_or_default();
            return Ok(PidRecord::Empty { age });
        }
        match trimmed.parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(PidRecord::Pid(pid)),
            _ => Ok(PidRecord::Invalid(trimmed.to_string())),
        }
    }

    /// Atomically create the file. `None` means it already exists.
    pub fn claim(&self) -> Result<Option<File>, DaemonError> {
        self.ensure_parent()?;
        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(self.creation_error(e)),
        }
    }

    /// Fill a file obtained from [`PidFile::claim`].
    pub fn fill(&self, mut file: File, pid: u32) -> Result<(), DaemonError> {
        write!(file, "{pid}")
            .and_then(|_| file.sync_all())
            .map_err(|e| self.creation_error(e))?;
        tracing::info!(path = %self.path.display(), pid, "PID file written");
        Ok(())
    }

    /// Create or overwrite the file with `pid`.
    pub fn write(&self, pid: u32) -> Result<(), DaemonError> {
        self.ensure_parent()?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| self.creation_error(e))?;
        self.fill(file, pid)
    }

    pub fn remove(&self) -> Result<(), DaemonError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "PID file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::PidFileRemoval {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Remove the file only while it still records `pid`.
    pub fn remove_if_owned(&self, pid: u32) -> Result<(), DaemonError> {
        match self.read()? {
            PidRecord::Pid(recorded) if recorded == pid => self.remove(),
            _ => Ok(()),
        }
    }

    fn ensure_parent(&self) -> Result<(), DaemonError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| DaemonError::PidFileCreation {
                    path: self.path.clone(),
                    reason: format!("Failed to create parent directory: {e}"),
                })
            }
            _ => Ok(()),
        }
    }

    fn creation_error(&self, e: std::io::Error) -> DaemonError {
        DaemonError::PidFileCreation {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

// ── Process probing ────────────────────────────────────────────────────────────

/// Whether a process with `pid` exists.
///
/// A process owned by another user still counts as alive.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

/// Send SIGTERM to `pid`. Returns `false` when the process was already gone.
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<bool, DaemonError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|e| DaemonError::Signal {
        pid,
        reason: e.to_string(),
    })?;
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => {
            tracing::info!(pid, "sent SIGTERM");
            Ok(true)
        }
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(DaemonError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> Result<bool, DaemonError> {
    Err(DaemonError::Signal {
        pid,
        reason: "signals are not supported on this platform".to_string(),
    })
}

// ── InstanceLock ───────────────────────────────────────────────────────────────

/// Exclusive advisory lock held by the running daemon until drop.
pub struct InstanceLock {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl std::fmt::Debug for InstanceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLock").finish_non_exhaustive()
    }
}

impl InstanceLock {
    /// Take the lock without blocking.
    ///
    /// Fails with [`DaemonError::LockFile`] when the file cannot be opened and
    /// with [`DaemonError::DuplicateInstance`] when another process holds it.
    pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| DaemonError::LockFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::lock(file, path)
    }

    #[cfg(unix)]
    fn lock(file: File, path: &Path) -> Result<Self, DaemonError> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Self { _lock: lock }),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(DaemonError::DuplicateInstance),
            Err((_, errno)) => Err(DaemonError::LockFile {
                path: path.to_path_buf(),
                reason: errno.to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    fn lock(file: File, _path: &Path) -> Result<Self, DaemonError> {
        Ok(Self { _file: file })
    }
}
