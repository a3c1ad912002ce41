//! Durable storage for channel records.
//!
//! This module defines the [`ChannelRecordStore`] trait which abstracts over
//! storage backends for channel persistence. The store holds the *latest
//! record* per channel, not an event log: recovery replays records, not
//! events.

use auto_impl::auto_impl;
use thiserror::Error;

use conduit_primitives::{ChannelId, ChannelRecord};

/// Error type for record store operations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// IO error during storage operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Storage backend specific error.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Trait for channel record persistence.
///
/// Implementations must make `save` atomic per record: a crash mid-save
/// leaves either the previous record or the new one, never a torn write.
/// All records live under a single logical `channels/` namespace keyed by
/// the serialized [`ChannelId`].
#[auto_impl(&, Box, Arc)]
pub trait ChannelRecordStore: Send + Sync {
    /// Load all persisted records.
    ///
    /// Called on startup to restore channel state.
    fn load_all(&self) -> Result<Vec<ChannelRecord>, RecordStoreError>;

    /// Save a record, replacing any previous record for the same channel.
    fn save(&self, record: &ChannelRecord) -> Result<(), RecordStoreError>;

    /// Get a record by channel id.
    fn get(&self, id: &ChannelId) -> Result<Option<ChannelRecord>, RecordStoreError>;

    /// Remove a record from storage.
    fn remove(&self, id: &ChannelId) -> Result<(), RecordStoreError>;

    /// Check if a record exists in storage.
    fn contains(&self, id: &ChannelId) -> Result<bool, RecordStoreError> {
        Ok(self.get(id)?.is_some())
    }

    /// Get the number of stored records.
    fn count(&self) -> Result<usize, RecordStoreError>;

    /// Flush any buffered writes to persistent storage.
    fn flush(&self) -> Result<(), RecordStoreError> {
        Ok(())
    }
}

/// In-memory record store for testing.
///
/// Does not persist across restarts.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: parking_lot::RwLock<std::collections::HashMap<ChannelId, ChannelRecord>>,
}

impl MemoryRecordStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelRecordStore for MemoryRecordStore {
    fn load_all(&self) -> Result<Vec<ChannelRecord>, RecordStoreError> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn save(&self, record: &ChannelRecord) -> Result<(), RecordStoreError> {
        self.records.write().insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: &ChannelId) -> Result<Option<ChannelRecord>, RecordStoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    fn remove(&self, id: &ChannelId) -> Result<(), RecordStoreError> {
        self.records.write().remove(id);
        Ok(())
    }

    fn count(&self) -> Result<usize, RecordStoreError> {
        Ok(self.records.read().len())
    }
}

// ============================================================================
// File-based record store
// ============================================================================

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

/// File-based record store using JSON serialization.
///
/// Stores all records in a single JSON file mapping channel-id strings to
/// records. The file is loaded entirely into memory on startup and written
/// back on flush.
///
/// # Thread Safety
///
/// All operations are protected by an RwLock, making this safe for
/// concurrent access.
pub struct FileRecordStore {
    /// Path to the JSON file.
    path: PathBuf,
    /// In-memory cache of records.
    records: parking_lot::RwLock<HashMap<ChannelId, ChannelRecord>>,
    /// Whether there are unsaved changes.
    dirty: parking_lot::Mutex<bool>,
}

impl std::fmt::Debug for FileRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRecordStore")
            .field("path", &self.path)
            .field("count", &self.records.read().len())
            .field("dirty", &*self.dirty.lock())
            .finish()
    }
}

impl FileRecordStore {
    /// Create a new file-based store at the given path.
    ///
    /// If the file exists it is loaded; otherwise an empty store is created.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, RecordStoreError> {
        let path = path.into();
        let records = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            records: parking_lot::RwLock::new(records),
            dirty: parking_lot::Mutex::new(false),
        })
    }

    /// Create a new file-based store, creating parent directories if needed.
    pub fn new_with_create_dir(path: impl Into<PathBuf>) -> Result<Self, RecordStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::new(path)
    }

    fn load_from_file(path: &PathBuf) -> Result<HashMap<ChannelId, ChannelRecord>, RecordStoreError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let raw: HashMap<String, ChannelRecord> = serde_json::from_reader(reader)
            .map_err(|e| RecordStoreError::Serialization(e.to_string()))?;

        let mut records = HashMap::with_capacity(raw.len());
        for (_, record) in raw {
            records.insert(record.id, record);
        }

        Ok(records)
    }

    /// Save records to the JSON file.
    ///
    /// Writes to a temporary file first, then renames (atomic on most
    /// systems) so a crash never leaves a torn store.
    fn save_to_file(&self) -> Result<(), RecordStoreError> {
        let records = self.records.read();

        let raw: HashMap<String, &ChannelRecord> = records
            .iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp_path)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, &raw)
                .map_err(|e| RecordStoreError::Serialization(e.to_string()))?;
        }

        fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }

    fn mark_dirty(&self) {
        *self.dirty.lock() = true;
    }

    /// Check if there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        *self.dirty.lock()
    }

    /// Get the file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ChannelRecordStore for FileRecordStore {
    fn load_all(&self) -> Result<Vec<ChannelRecord>, RecordStoreError> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn save(&self, record: &ChannelRecord) -> Result<(), RecordStoreError> {
        self.records.write().insert(record.id, record.clone());
        self.mark_dirty();
        // Channel transitions must survive a crash, so every save hits disk.
        self.flush()
    }

    fn get(&self, id: &ChannelId) -> Result<Option<ChannelRecord>, RecordStoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    fn remove(&self, id: &ChannelId) -> Result<(), RecordStoreError> {
        self.records.write().remove(id);
        self.mark_dirty();
        self.flush()
    }

    fn count(&self) -> Result<usize, RecordStoreError> {
        Ok(self.records.read().len())
    }

    fn flush(&self) -> Result<(), RecordStoreError> {
        if self.is_dirty() {
            self.save_to_file()?;
            *self.dirty.lock() = false;
        }
        Ok(())
    }
}

impl Drop for FileRecordStore {
    fn drop(&mut self) {
        // Best-effort flush on drop
        if self.is_dirty() {
            let _ = self.save_to_file();
        }
    }
}
