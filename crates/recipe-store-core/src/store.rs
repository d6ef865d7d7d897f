use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::{Record, SortKey, StoreError};

/// In-memory record store guarded by a single reader/writer lock.
///
/// Readers (`get`, `list_page`, `snapshot`) share the lock; `set` and `delete`
/// take it exclusively. No method holds the lock across file I/O.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: RwLock<HashMap<String, Record>>,
}

impl RecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_records(records: HashMap<String, Record>) -> Self {
        Self { records: RwLock::new(records) }
    }

    /// Restore a store from a previous dump.
    ///
    /// A missing or blank file yields an empty store.
    ///
    /// # Errors
    /// Returns [`StoreError::PersistenceCorrupt`] when the file is not a valid
    /// dump, and [`StoreError::Persistence`] when it cannot be read.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!("no dump at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(StoreError::Persistence { path: path.to_path_buf(), source });
            }
        };
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }

        let mut records: HashMap<String, Record> = serde_json::from_str(&raw).map_err(|err| {
            StoreError::PersistenceCorrupt { path: path.to_path_buf(), reason: err.to_string() }
        })?;
        for (id, record) in &mut records {
            record.id.clone_from(id);
        }
        tracing::info!("restored {} records from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    /// Look up one record by id.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when no record has this id.
    pub fn get(&self, id: &str) -> Result<Record, StoreError> {
        self.records.read().get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Insert or overwrite the record stored under `id`.
    pub fn set(&self, id: impl Into<String>, mut record: Record) {
        let id = id.into();
        record.id.clone_from(&id);
        self.records.write().insert(id, record);
    }

    /// Remove the record stored under `id`.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when no record has this id.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        match self.records.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Point-in-time copy of the full mapping.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Record> {
        self.records.read().clone()
    }

    /// Return one page of a sorted snapshot. `page` is 1-indexed.
    ///
    /// The snapshot is copied out under the read lock, so writes that land
    /// after the copy do not affect the returned page.
    ///
    /// # Errors
    /// - [`StoreError::EmptyStore`] when the store holds no records.
    /// - [`StoreError::InvalidLimit`] when `limit` is zero.
    /// - [`StoreError::PageOutOfRange`] when the page starts past the end.
    pub fn list_page(
        &self,
        page: usize,
        limit: usize,
        sort_by: SortKey,
    ) -> Result<Vec<Record>, StoreError> {
        let mut snapshot: Vec<Record> = self.records.read().values().cloned().collect();

        if snapshot.is_empty() {
            return Err(StoreError::EmptyStore);
        }
        if limit == 0 {
            return Err(StoreError::InvalidLimit);
        }

        match sort_by {
            SortKey::Name => {
                snapshot
                    .sort_unstable_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
            }
        }

        let total = snapshot.len();
        let out_of_range = StoreError::PageOutOfRange { page, limit, total };
        let start = page
            .checked_sub(1)
            .and_then(|index| index.checked_mul(limit))
            .filter(|start| *start < total)
            .ok_or(out_of_range)?;
        let end = start.saturating_add(limit).min(total);

        snapshot.truncate(end);
        Ok(snapshot.split_off(start))
    }

    /// Write every record to `path` as a single JSON object keyed by id.
    ///
    /// The file is written to a sibling temporary path and renamed into place.
    /// Writes made after the last successful dump are lost on a crash.
    ///
    /// # Errors
    /// Returns [`StoreError::Persistence`] when the file cannot be written.
    pub fn dump_to(&self, path: &Path) -> Result<usize, StoreError> {
        let snapshot = self.snapshot();
        let io_err =
            |source: std::io::Error| StoreError::Persistence { path: path.to_path_buf(), source };

        let tmp_path = temporary_sibling(path);
        let file = File::create(&tmp_path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &snapshot)
            .map_err(|err| io_err(std::io::Error::from(err)))?;
        writer.flush().map_err(io_err)?;
        drop(writer);
        fs::rename(&tmp_path, path).map_err(io_err)?;

        Ok(snapshot.len())
    }
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
