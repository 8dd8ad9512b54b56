use crate::collector::batch::{Batch, BatchStatus, BatchValidationError, ReadingKey};
use crate::storage::fs::atomic_write;
use crate::storage::EntryName;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed archive entry {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("refusing to archive invalid batch: {0}")]
    Invalid(#[from] BatchValidationError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// One stored batch file, in arrival order
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: EntryName,
    pub path: PathBuf,
}

/// Append-only store of acknowledged batches, one file per batch named
/// `<archived_at>;<batch_id>.json`. Appends are idempotent by `batch_id`.
///
/// The ID index is built when the archive is opened and is re-checked
/// against the directory before every write, so another writer sharing the
/// directory (a receiver on the same host) cannot cause a second entry.
#[derive(Debug)]
pub struct Archive {
    dir: PathBuf,
    index: HashMap<Uuid, EntryName>,
}

impl Archive {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| ArchiveError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut archive = Self {
            dir: dir.to_path_buf(),
            index: HashMap::new(),
        };
        for entry in archive.entries()? {
            archive.index.insert(entry.name.batch_id, entry.name);
        }

        debug!(dir = %dir.display(), entries = archive.index.len(), "Archive opened");
        Ok(archive)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, batch_id: Uuid) -> bool {
        self.index.contains_key(&batch_id)
    }

    /// Store an acknowledged batch. Returns `false` without writing if the
    /// batch ID is already archived.
    pub fn append(&mut self, batch: &Batch) -> Result<bool> {
        self.append_at(batch, Utc::now().trunc_subsecs(3))
    }

    pub fn append_at(&mut self, batch: &Batch, archived_at: DateTime<Utc>) -> Result<bool> {
        batch.validate()?;

        if let Some(existing) = self.index.get(&batch.batch_id) {
            info!(
                batch_id = %batch.batch_id,
                archived_at = %existing.timestamp,
                "Batch already archived, ignoring duplicate"
            );
            return Ok(false);
        }
        if let Some(existing) = self.find_on_disk(batch.batch_id)? {
            info!(
                batch_id = %batch.batch_id,
                archived_at = %existing.timestamp,
                "Batch archived by another writer, ignoring duplicate"
            );
            self.index.insert(batch.batch_id, existing);
            return Ok(false);
        }

        let mut stored = batch.clone();
        stored.status = BatchStatus::Sent;

        let name = EntryName::new(archived_at, batch.batch_id);
        let path = self.dir.join(name.file_name());
        let data = serde_json::to_vec_pretty(&stored).map_err(|e| ArchiveError::Malformed {
            path: path.clone(),
            reason: format!("cannot encode batch: {}", e),
        })?;
        atomic_write(&path, &data).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;

        self.index.insert(batch.batch_id, name);
        info!(batch_id = %batch.batch_id, readings = batch.readings.len(), "Batch archived");
        Ok(true)
    }

    /// Entry for `batch_id` written since this archive was opened
    fn find_on_disk(&self, batch_id: Uuid) -> Result<Option<EntryName>> {
        let suffix = format!(";{}.json", batch_id);
        let io_err = |source| ArchiveError::Io {
            path: self.dir.clone(),
            source,
        };

        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let file_name = entry.map_err(io_err)?.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.ends_with(&suffix) {
                if let Some(name) = EntryName::parse(&file_name) {
                    return Ok(Some(name));
                }
            }
        }
        Ok(None)
    }

    /// All entry files in arrival order. Foreign and temp files are skipped.
    pub fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        let io_err = |source| ArchiveError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            match EntryName::parse(&file_name) {
                Some(name) => entries.push(ArchiveEntry {
                    name,
                    path: entry.path(),
                }),
                None => debug!(file = %file_name, "Skipping non-entry file in archive"),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Read and validate one entry
    pub fn read_entry(&self, entry: &ArchiveEntry) -> Result<Batch> {
        let data = fs::read(&entry.path).map_err(|source| ArchiveError::Io {
            path: entry.path.clone(),
            source,
        })?;
        let malformed = |reason: String| ArchiveError::Malformed {
            path: entry.path.clone(),
            reason,
        };

        let batch: Batch = serde_json::from_slice(&data).map_err(|e| malformed(e.to_string()))?;
        if batch.batch_id != entry.name.batch_id {
            return Err(malformed(format!(
                "file name says batch {} but content is batch {}",
                entry.name.batch_id, batch.batch_id
            )));
        }
        batch.validate().map_err(|e| malformed(e.to_string()))?;
        Ok(batch)
    }

    /// Reading keys of every batch archived at or after `since`. Callers
    /// widen `since` by the tolerated clock skew: `archived_at` may come from
    /// another host's clock than `observed_at`.
    pub fn reading_keys_since(&self, since: DateTime<Utc>) -> Result<HashSet<ReadingKey>> {
        let mut keys = HashSet::new();
        for entry in self.entries()? {
            if entry.name.timestamp < since {
                continue;
            }
            match self.read_entry(&entry) {
                Ok(batch) => keys.extend(batch.keys()),
                Err(e @ ArchiveError::Malformed { .. }) => {
                    warn!(error = %e, "Skipping malformed archive entry");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::batch::Reading;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn batch_at(secs: i64) -> Batch {
        Batch::new("gizmo", vec![Reading::new("28-01", 20.5, at(secs))], at(secs))
    }

    #[test]
    fn test_duplicate_batch_id_is_stored_once() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path()).unwrap();
        let batch = batch_at(0);

        assert!(archive.append_at(&batch, at(1)).unwrap());
        assert!(!archive.append_at(&batch, at(2)).unwrap());
        assert_eq!(archive.entries().unwrap().len(), 1);

        // A fresh handle sees the same index
        let mut reopened = Archive::open(dir.path()).unwrap();
        assert!(reopened.contains(batch.batch_id));
        assert!(!reopened.append_at(&batch, at(3)).unwrap());
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_entries_are_in_arrival_order_and_marked_sent() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path()).unwrap();
        let first = batch_at(0);
        let second = batch_at(10);

        archive.append_at(&second, at(11)).unwrap();
        archive.append_at(&first, at(12)).unwrap();

        let entries = archive.entries().unwrap();
        assert_eq!(entries[0].name.batch_id, second.batch_id);
        assert_eq!(entries[1].name.batch_id, first.batch_id);

        let stored = archive.read_entry(&entries[1]).unwrap();
        assert_eq!(stored.status, BatchStatus::Sent);
        assert_eq!(stored.readings, first.readings);
    }

    #[test]
    fn test_invalid_batch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path()).unwrap();
        let mut batch = batch_at(0);
        batch.readings.push(batch.readings[0].clone());

        assert!(matches!(archive.append(&batch), Err(ArchiveError::Invalid(_))));
        assert!(archive.is_empty());
    }

    #[test]
    fn test_malformed_entry_is_reported() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open(dir.path()).unwrap();
        let name = EntryName::new(at(0), Uuid::new_v4());
        fs::write(dir.path().join(name.file_name()), b"{\"batch_id\": 42}").unwrap();

        let entries = archive.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            archive.read_entry(&entries[0]),
            Err(ArchiveError::Malformed { .. })
        ));
    }

    #[test]
    fn test_reading_keys_since_skips_older_entries() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path()).unwrap();
        archive.append_at(&batch_at(0), at(1)).unwrap();
        archive.append_at(&batch_at(100), at(101)).unwrap();

        let keys = archive.reading_keys_since(at(100)).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&("28-01".to_string(), at(100))));
    }

    #[test]
    fn test_entry_from_other_writer_is_not_duplicated() {
        let dir = TempDir::new().unwrap();
        let mut collector_side = Archive::open(dir.path()).unwrap();
        let mut receiver_side = Archive::open(dir.path()).unwrap();
        let batch = batch_at(0);

        assert!(receiver_side.append_at(&batch, at(1)).unwrap());
        assert!(!collector_side.append_at(&batch, at(2)).unwrap());
        assert!(collector_side.contains(batch.batch_id));
        assert_eq!(collector_side.entries().unwrap().len(), 1);
    }
}
