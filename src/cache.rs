//! Single-slot persistence of the transcript parse state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config;
use crate::transcript::SessionState;

/// The persisted `(path, size, state)` triple. `file_size` is the transcript
/// length at the time of the parse; `resume_offset` is set only when the reader
/// stopped somewhere else (an unfinished trailing line, or bytes appended after
/// the size was taken).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub file_path: PathBuf,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_offset: Option<u64>,
    pub data: SessionState,
}

impl CacheEntry {
    pub fn new(file_path: &Path, file_size: u64, state: &SessionState) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            file_size,
            resume_offset: None,
            data: state.bounded_for_cache(),
        }
    }

    pub fn with_resume_offset(mut self, offset: u64) -> Self {
        self.resume_offset = (offset != self.file_size).then_some(offset);
        self
    }

    /// Byte offset the next read of a grown transcript starts from.
    pub fn resume_at(&self) -> u64 {
        self.resume_offset.unwrap_or(self.file_size)
    }

    /// Usable only for the same transcript, and only if it has not shrunk
    /// (a shorter file means it was truncated or replaced).
    pub fn is_valid_for(&self, file_path: &Path, current_size: u64) -> bool {
        self.file_path == file_path && self.file_size <= current_size
    }
}

pub trait CacheStore {
    fn load(&self, file_path: &Path, current_size: u64) -> Option<CacheEntry>;

    /// Best effort; failures are logged and dropped.
    fn save(&self, entry: CacheEntry);
}

/// JSON file holding the most recent entry. A new transcript overwrites it.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entry(&self) -> Result<Option<CacheEntry>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let entry = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in {}", self.path.display()))?;
        Ok(Some(entry))
    }

    // NamedTempFile is created with mode 0600 on unix, and persist() keeps it.
    fn write_entry(&self, entry: &CacheEntry) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory {}", parent.display()))?;

        let data = serde_json::to_vec(entry).context("failed to serialize transcript cache")?;
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        tmp.write_all(&data)
            .context("failed to write transcript cache tmp")?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to move cache into {}", self.path.display()))?;
        Ok(())
    }
}

impl Default for FileCacheStore {
    fn default() -> Self {
        Self::new(config::transcript_cache_path())
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self, file_path: &Path, current_size: u64) -> Option<CacheEntry> {
        let entry = match self.read_entry() {
            Ok(entry) => entry?,
            Err(err) => {
                debug!(error = %err, "ignoring unreadable transcript cache");
                return None;
            }
        };
        entry.is_valid_for(file_path, current_size).then_some(entry)
    }

    fn save(&self, entry: CacheEntry) {
        if let Err(err) = self.write_entry(&entry) {
            debug!(error = %err, "transcript cache write failed");
        }
    }
}

/// In-process slot with the same semantics as [`FileCacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    slot: Mutex<Option<CacheEntry>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn with_entry(entry: CacheEntry) -> Self {
        Self {
            slot: Mutex::new(Some(entry)),
            ..Self::default()
        }
    }

    pub fn entry(&self) -> Option<CacheEntry> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, file_path: &Path, current_size: u64) -> Option<CacheEntry> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.entry()
            .filter(|entry| entry.is_valid_for(file_path, current_size))
    }

    fn save(&self, entry: CacheEntry) {
        self.saves.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(entry);
        }
    }
}
