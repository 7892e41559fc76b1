//! JSON file datasource.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<source>/<YYYY-MM-DD>.json   one bucket per file
//! <root>/<source>/checkpoint.json     last imported day
//! <root>/<source>/checkpoint.lock     flock target for checkpoint updates
//! ```
//!
//! Each file lands through its own uniquely named temp file and an atomic
//! rename, so concurrent writers (threads or processes) never share a temp
//! path and never clobber each other's buckets. The checkpoint is the only
//! read-modify-write and is held under an exclusive file lock so it stays
//! monotonic across processes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use nfsen_core::error::DatasourceError;
use nfsen_core::models::{DayStatistics, Source};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::datasource::Datasource;

const CHECKPOINT_FILE: &str = "checkpoint.json";
const CHECKPOINT_LOCK: &str = "checkpoint.lock";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointDocument {
    last_imported: Option<NaiveDate>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DatasourceError + '_ {
    move |source| DatasourceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct JsonDatasource {
    root: PathBuf,
    /// In-process serialisation of checkpoint updates; the file lock covers other processes.
    checkpoint_guard: Mutex<()>,
}

impl JsonDatasource {
    /// Open (and create if needed) the store directory.
    pub fn open(root: &Path) -> Result<Self, DatasourceError> {
        fs::create_dir_all(root).map_err(io_error(root))?;
        info!("JSON datasource at {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            checkpoint_guard: Mutex::new(()),
        })
    }

    fn source_dir(&self, source: &Source) -> PathBuf {
        self.root.join(source.as_str())
    }

    fn bucket_path(&self, source: &Source, day: NaiveDate) -> PathBuf {
        self.source_dir(source).join(format!("{}.json", day.format("%Y-%m-%d")))
    }

    fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, DatasourceError> {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path)(e)),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| DatasourceError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Atomically replace `path` with the JSON form of `value`.
    fn store<T: Serialize>(path: &Path, value: &T) -> Result<(), DatasourceError> {
        let json = serde_json::to_vec(value).map_err(|source| DatasourceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        let dir = path
            .parent()
            .ok_or_else(|| DatasourceError::Backend(format!("no parent directory for {}", path.display())))?;
        fs::create_dir_all(dir).map_err(io_error(dir))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
        tmp.write_all(&json).map_err(io_error(tmp.path()))?;
        tmp.persist(path).map_err(|e| io_error(path)(e.error))?;
        Ok(())
    }

    fn lock_checkpoint(&self, source: &Source) -> Result<CheckpointLock, DatasourceError> {
        let dir = self.source_dir(source);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        let path = dir.join(CHECKPOINT_LOCK);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_error(&path))?;
        CheckpointLock::acquire(file, &path)
    }
}

/// Exclusive lock on a source's checkpoint, released on drop.
struct CheckpointLock {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl CheckpointLock {
    #[cfg(unix)]
    fn acquire(file: File, path: &Path) -> Result<Self, DatasourceError> {
        use nix::fcntl::{Flock, FlockArg};

        Flock::lock(file, FlockArg::LockExclusive)
            .map(|lock| Self { _lock: lock })
            .map_err(|(_, errno)| DatasourceError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(errno),
            })
    }

    #[cfg(not(unix))]
    fn acquire(file: File, _path: &Path) -> Result<Self, DatasourceError> {
        Ok(Self { _file: file })
    }
}

impl Datasource for JsonDatasource {
    fn name(&self) -> &'static str {
        "json"
    }

    fn write(&self, source: &Source, day: NaiveDate, stats: &DayStatistics) -> Result<(), DatasourceError> {
        Self::store(&self.bucket_path(source, day), stats)?;
        debug!(source = %source, %day, "bucket stored");
        Ok(())
    }

    fn read(&self, source: &Source, day: NaiveDate) -> Result<Option<DayStatistics>, DatasourceError> {
        Self::load(&self.bucket_path(source, day))
    }

    fn read_last_imported(&self, source: &Source) -> Result<Option<NaiveDate>, DatasourceError> {
        let path = self.source_dir(source).join(CHECKPOINT_FILE);
        Ok(Self::load::<CheckpointDocument>(&path)?.and_then(|doc| doc.last_imported))
    }

    fn record_checkpoint(&self, source: &Source, day: NaiveDate) -> Result<(), DatasourceError> {
        let _held = self
            .checkpoint_guard
            .lock()
            .map_err(|_| DatasourceError::Backend("json checkpoint lock poisoned".to_string()))?;
        let _locked = self.lock_checkpoint(source)?;

        let path = self.source_dir(source).join(CHECKPOINT_FILE);
        let current = Self::load::<CheckpointDocument>(&path)?.and_then(|doc| doc.last_imported);
        if current.is_some_and(|current| current >= day) {
            return Ok(());
        }
        Self::store(
            &path,
            &CheckpointDocument {
                last_imported: Some(day),
            },
        )
    }
}
