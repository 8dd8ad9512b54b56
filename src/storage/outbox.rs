use crate::collector::batch::{Batch, BatchStatus, BatchValidationError};
use crate::storage::fs::{atomic_write, DirLock};
use crate::storage::EntryName;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOCK_FILE: &str = ".lock";
const PENDING_DIR: &str = "pending";
const REJECTED_DIR: &str = "rejected";

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Unreadable pending state. Fatal: continuing could silently lose readings.
    #[error("outbox is corrupt at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("outbox at {0} is held by another collector")]
    Busy(PathBuf),

    #[error("refusing to enqueue invalid batch: {0}")]
    Invalid(#[from] BatchValidationError),

    #[error("refusing to enqueue batch {0} with status sent")]
    NotPending(Uuid),
}

pub type Result<T> = std::result::Result<T, OutboxError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> OutboxError + '_ {
    move |source| OutboxError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Permanent refusals of a still-pending batch, kept next to the outbox
/// under `<dir>/rejected/<batch_id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub batch_id: Uuid,
    pub attempts: u32,
    pub status: Option<u16>,
    pub reason: String,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

/// Durable store of pending batches: one JSON file per batch under
/// `<dir>/pending/`. A value of this type holds the outbox lock; only one
/// collector process can hold it at a time.
#[derive(Debug)]
pub struct Outbox {
    pending_dir: PathBuf,
    rejected_dir: PathBuf,
    lock: DirLock,
}

impl Outbox {
    /// Take exclusive access, waiting up to `wait` for another holder.
    pub async fn lock(dir: &Path, wait: Duration) -> Result<Self> {
        let pending_dir = dir.join(PENDING_DIR);
        fs::create_dir_all(&pending_dir).map_err(io_error(&pending_dir))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = DirLock::acquire(&lock_path, wait)
            .await
            .map_err(io_error(&lock_path))?
            .ok_or_else(|| OutboxError::Busy(dir.to_path_buf()))?;

        Ok(Self {
            pending_dir,
            rejected_dir: dir.join(REJECTED_DIR),
            lock,
        })
    }

    /// Read-only listing without taking the lock, for status reporting.
    /// May observe a concurrent collector's state mid-cycle.
    pub fn inspect(dir: &Path) -> Result<Vec<Batch>> {
        let pending_dir = dir.join(PENDING_DIR);
        if !pending_dir.exists() {
            return Ok(Vec::new());
        }
        read_pending(&pending_dir)
    }

    /// Rejection records without taking the lock, oldest first.
    /// Unreadable records are skipped; they only inform.
    pub fn inspect_rejections(dir: &Path) -> Result<Vec<Rejection>> {
        let rejected_dir = dir.join(REJECTED_DIR);
        if !rejected_dir.exists() {
            return Ok(Vec::new());
        }

        let mut rejections = Vec::new();
        for entry in fs::read_dir(&rejected_dir).map_err(io_error(&rejected_dir))? {
            let path = entry.map_err(io_error(&rejected_dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_rejection(&path) {
                Some(rejection) => rejections.push(rejection),
                None => warn!(path = %path.display(), "Skipping unreadable rejection record"),
            }
        }
        rejections.sort_by_key(|r| r.first_at);
        Ok(rejections)
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Atomically persist a new pending batch
    pub fn enqueue(&self, batch: &Batch) -> Result<()> {
        if batch.status != BatchStatus::Pending {
            return Err(OutboxError::NotPending(batch.batch_id));
        }
        batch.validate()?;

        let path = self
            .pending_dir
            .join(EntryName::new(batch.created_at, batch.batch_id).file_name());
        let data = serde_json::to_vec_pretty(batch).map_err(|e| OutboxError::Corrupt {
            path: path.clone(),
            reason: format!("cannot encode batch: {}", e),
        })?;
        atomic_write(&path, &data).map_err(io_error(&path))?;

        debug!(batch_id = %batch.batch_id, readings = batch.readings.len(), "Batch enqueued");
        Ok(())
    }

    /// Pending batches, oldest first
    pub fn list_pending(&self) -> Result<Vec<Batch>> {
        read_pending(&self.pending_dir)
    }

    /// Count one more permanent refusal of a pending batch
    pub fn record_rejection(&self, batch_id: Uuid, status: Option<u16>, reason: &str) -> Result<Rejection> {
        let path = self.rejection_path(batch_id);
        let now = Utc::now().trunc_subsecs(3);

        let rejection = match read_rejection(&path) {
            Some(previous) => Rejection {
                attempts: previous.attempts + 1,
                status,
                reason: reason.to_string(),
                last_at: now,
                ..previous
            },
            None => Rejection {
                batch_id,
                attempts: 1,
                status,
                reason: reason.to_string(),
                first_at: now,
                last_at: now,
            },
        };

        let data = serde_json::to_vec_pretty(&rejection).map_err(|e| OutboxError::Corrupt {
            path: path.clone(),
            reason: format!("cannot encode rejection: {}", e),
        })?;
        atomic_write(&path, &data).map_err(io_error(&path))?;
        Ok(rejection)
    }

    fn rejection_path(&self, batch_id: Uuid) -> PathBuf {
        self.rejected_dir.join(format!("{}.json", batch_id))
    }

    /// Remove a batch from pending storage. Returns whether a file was removed;
    /// an absent batch is not an error.
    pub fn mark_sent(&self, batch_id: Uuid) -> Result<bool> {
        let rejection = self.rejection_path(batch_id);
        match fs::remove_file(&rejection) {
            Ok(()) => debug!(batch_id = %batch_id, "Rejection record cleared"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&rejection)(e)),
        }

        let entries = fs::read_dir(&self.pending_dir).map_err(io_error(&self.pending_dir))?;
        for entry in entries {
            let entry = entry.map_err(io_error(&self.pending_dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match EntryName::parse(&name) {
                Some(parsed) if parsed.batch_id == batch_id => {
                    let path = entry.path();
                    return match fs::remove_file(&path) {
                        Ok(()) => {
                            info!(batch_id = %batch_id, "Batch removed from outbox");
                            Ok(true)
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                        Err(e) => Err(io_error(&path)(e)),
                    };
                }
                _ => {}
            }
        }

        debug!(batch_id = %batch_id, "Batch already absent from outbox");
        Ok(false)
    }
}

fn read_rejection(path: &Path) -> Option<Rejection> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

fn read_pending(pending_dir: &Path) -> Result<Vec<Batch>> {
    let mut named = Vec::new();
    let entries = fs::read_dir(pending_dir).map_err(io_error(pending_dir))?;
    for entry in entries {
        let entry = entry.map_err(io_error(pending_dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            // Temp file from an interrupted write; never visible as state
            continue;
        }
        let parsed = EntryName::parse(&name).ok_or_else(|| OutboxError::Corrupt {
            path: entry.path(),
            reason: "unrecognized file in pending directory".to_string(),
        })?;
        named.push((parsed, entry.path()));
    }
    named.sort_by(|a, b| a.0.cmp(&b.0));

    let mut batches = Vec::with_capacity(named.len());
    for (name, path) in named {
        batches.push(read_batch(&path, &name)?);
    }
    Ok(batches)
}

fn read_batch(path: &Path, name: &EntryName) -> Result<Batch> {
    let data = fs::read(path).map_err(io_error(path))?;
    let batch: Batch = serde_json::from_slice(&data).map_err(|e| OutboxError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let corrupt = |reason: String| OutboxError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    if batch.batch_id != name.batch_id {
        return Err(corrupt(format!(
            "file name says batch {} but content is batch {}",
            name.batch_id, batch.batch_id
        )));
    }
    if batch.status != BatchStatus::Pending {
        return Err(corrupt("outbox holds a batch marked sent".to_string()));
    }
    batch.validate().map_err(|e| corrupt(e.to_string()))?;

    Ok(batch)
}
