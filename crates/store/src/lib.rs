//! batchgate durable admission-state store.
//!
//! Implements [`pipeline::AdmissionStore`] over a JSON file so that separate
//! processes (an arrival handler, the budget cycle, an operator's `reset`)
//! share one admission gate.
//!
//! ## On-disk layout
//!
//! | File | Purpose |
//! |------|---------|
//! | `<path>` | current [`pipeline::AdmissionRecord`] as JSON |
//! | `<path>.tmp` | staging file, renamed over `<path>` on every write |
//! | `<path>.lock` | writers hold an exclusive OS file lock on it for the compare-and-swap |
//!
//! Readers never take the lock: a rename is atomic, so a reader sees either
//! the previous or the next record. The lock file itself is never deleted;
//! the OS drops the lock when its holder exits, crashed or not.

use std::fs::TryLockError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{AdmissionRecord, AdmissionState, AdmissionStore, AdmissionStoreError};
use tokio::fs;
use tracing::{debug, warn};

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);
const LOCK_ATTEMPTS: u32 = 500;

/// File-backed [`AdmissionStore`].
#[derive(Debug, Clone)]
pub struct FileAdmissionStore {
    path: PathBuf,
}

impl FileAdmissionStore {
    /// Creates a store at `path`. The file is created on first write; until
    /// then the gate reads as open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    async fn read_record(&self) -> Result<AdmissionRecord, AdmissionStoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| AdmissionStoreError::Corrupt {
                message: format!("{}: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(AdmissionRecord::default()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    async fn write_record(&self, record: &AdmissionRecord) -> Result<(), AdmissionStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| AdmissionStoreError::Corrupt {
            message: e.to_string(),
        })?;
        let tmp = self.sibling(".tmp");
        fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))
    }

    async fn acquire_lock(&self) -> Result<WriterLock, AdmissionStoreError> {
        let lock = self.sibling(".lock");
        if let Some(parent) = lock.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock)
            .await
            .map_err(|e| io_error(&lock, e))?
            .into_std()
            .await;
        for _ in 0..LOCK_ATTEMPTS {
            match file.try_lock() {
                Ok(()) => return Ok(WriterLock { file }),
                Err(TryLockError::WouldBlock) => tokio::time::sleep(LOCK_RETRY_DELAY).await,
                Err(TryLockError::Error(e)) => return Err(io_error(&lock, e)),
            }
        }
        Err(AdmissionStoreError::Contended {
            attempts: LOCK_ATTEMPTS,
        })
    }
}

#[async_trait]
impl AdmissionStore for FileAdmissionStore {
    async fn load(&self) -> Result<AdmissionRecord, AdmissionStoreError> {
        self.read_record().await
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        next: AdmissionState,
    ) -> Result<Option<AdmissionRecord>, AdmissionStoreError> {
        let lock = self.acquire_lock().await?;
        let result: Result<Option<AdmissionRecord>, AdmissionStoreError> = async {
            let current = self.read_record().await?;
            if current.version != expected_version {
                debug!(
                    expected_version,
                    found = current.version,
                    "Admission compare-and-swap lost"
                );
                return Ok(None);
            }
            let record = AdmissionRecord {
                state: next,
                version: current.version + 1,
            };
            self.write_record(&record).await?;
            Ok(Some(record))
        }
        .await;
        lock.release();
        result
    }
}

/// Exclusive writer lock, held until [`WriterLock::release`] or drop.
struct WriterLock {
    file: std::fs::File,
}

impl WriterLock {
    fn release(self) {
        if let Err(e) = self.file.unlock() {
            warn!(error = %e, "Failed to release admission lock; it is dropped with the handle");
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> AdmissionStoreError {
    AdmissionStoreError::Io {
        message: format!("{}: {e}", path.display()),
    }
}
