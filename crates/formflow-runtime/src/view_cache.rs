#![forbid(unsafe_code)]

//! Last-viewed page cache, keyed by the view-cache key.
//!
//! Accepted navigations record the page the user landed on so a later
//! session can reopen the form where it was left. Each instance has one
//! entry; a write replaces it. There is no expiry.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ViewCache                                    │
//! │   in-memory entries + dirty flag             │
//! │   get / set / flush / load                   │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │ ViewStorage                                  │
//! │   MemoryViewStorage (always available)       │
//! │   FileViewStorage   (state-persistence)      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | `StorageError::Io` | File I/O failure | Returned; in-memory entries unaffected |
//! | `StorageError::Serialization` | JSON decode/encode | Returned; caller logs and continues |
//! | `StorageError::Corruption` | Lock poisoned | Returned; reads fall back to `None` |
//!
//! Storage failures never fail a navigation. The runtime logs them at `warn`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, RwLock};

use formflow_core::PageId;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from a view-cache backend.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error during file operations.
    Io(std::io::Error),
    /// JSON encode or decode failure.
    #[cfg(feature = "state-persistence")]
    Serialization(String),
    /// Internal state is unusable (poisoned lock, bad format).
    Corruption(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {e}"),
            #[cfg(feature = "state-persistence")]
            StorageError::Serialization(msg) => write!(f, "serialization error: {msg}"),
            StorageError::Corruption(msg) => write!(f, "view cache corruption: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Result type for view-cache storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// View-cache key -> last viewed page.
pub type ViewEntries = BTreeMap<String, PageId>;

// ─────────────────────────────────────────────────────────────────────────────
// Backend trait
// ─────────────────────────────────────────────────────────────────────────────

/// Pluggable durable storage for view-cache entries.
pub trait ViewStorage: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Load every entry. A backend with nothing stored returns an empty map.
    fn load_all(&self) -> StorageResult<ViewEntries>;

    /// Replace the stored entries.
    fn save_all(&self, entries: &ViewEntries) -> StorageResult<()>;

    /// Remove every stored entry.
    fn clear(&self) -> StorageResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory backend
// ─────────────────────────────────────────────────────────────────────────────

/// Ephemeral backend; entries live as long as the value.
#[derive(Default)]
pub struct MemoryViewStorage {
    entries: RwLock<ViewEntries>,
}

impl MemoryViewStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with entries.
    #[must_use]
    pub fn with_entries(entries: ViewEntries) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl ViewStorage for MemoryViewStorage {
    fn name(&self) -> &str {
        "MemoryViewStorage"
    }

    fn load_all(&self) -> StorageResult<ViewEntries> {
        self.entries
            .read()
            .map(|g| g.clone())
            .map_err(|_| StorageError::Corruption("lock poisoned".into()))
    }

    fn save_all(&self, entries: &ViewEntries) -> StorageResult<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StorageError::Corruption("lock poisoned".into()))?;
        guard.clone_from(entries);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.save_all(&ViewEntries::new())
    }
}

impl fmt::Debug for MemoryViewStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.entries.read().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("MemoryViewStorage")
            .field("entries", &count)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File backend (state-persistence)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "state-persistence")]
mod file_storage {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::fs::{self, File};
    use std::io::{BufReader, BufWriter, Write};
    use std::path::{Path, PathBuf};

    #[derive(Serialize, Deserialize)]
    struct ViewFile {
        format_version: u32,
        #[serde(default)]
        views: ViewEntries,
    }

    const FORMAT_VERSION: u32 = 1;

    /// JSON file backend.
    ///
    /// ```json
    /// { "format_version": 1, "views": { "512/8f3c": "page-2" } }
    /// ```
    ///
    /// Writes go to `{path}.tmp`, are synced, then renamed over `{path}`.
    pub struct FileViewStorage {
        path: PathBuf,
    }

    impl FileViewStorage {
        /// Storage at `path`; the file is created on first save.
        #[must_use]
        pub fn new(path: impl AsRef<Path>) -> Self {
            Self {
                path: path.as_ref().to_path_buf(),
            }
        }

        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn temp_path(&self) -> PathBuf {
            let mut tmp = self.path.clone();
            tmp.set_extension("json.tmp");
            tmp
        }
    }

    impl ViewStorage for FileViewStorage {
        fn name(&self) -> &str {
            "FileViewStorage"
        }

        fn load_all(&self) -> StorageResult<ViewEntries> {
            if !self.path.exists() {
                return Ok(ViewEntries::new());
            }
            let reader = BufReader::new(File::open(&self.path)?);
            let file: ViewFile = serde_json::from_reader(reader).map_err(|e| {
                StorageError::Serialization(format!("failed to parse view cache: {e}"))
            })?;
            if file.format_version != FORMAT_VERSION {
                tracing::warn!(
                    stored = file.format_version,
                    expected = FORMAT_VERSION,
                    "view cache format version mismatch, ignoring stored views"
                );
                return Ok(ViewEntries::new());
            }
            Ok(file.views)
        }

        fn save_all(&self, entries: &ViewEntries) -> StorageResult<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = ViewFile {
                format_version: FORMAT_VERSION,
                views: entries.clone(),
            };

            let tmp_path = self.temp_path();
            {
                let mut writer = BufWriter::new(File::create(&tmp_path)?);
                serde_json::to_writer_pretty(&mut writer, &file).map_err(|e| {
                    StorageError::Serialization(format!("failed to serialize view cache: {e}"))
                })?;
                writer.flush()?;
                writer.get_ref().sync_all()?;
            }
            fs::rename(&tmp_path, &self.path)?;

            tracing::debug!(path = %self.path.display(), entries = entries.len(), "saved view cache");
            Ok(())
        }

        fn clear(&self) -> StorageResult<()> {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            Ok(())
        }
    }

    impl fmt::Debug for FileViewStorage {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("FileViewStorage")
                .field("path", &self.path)
                .finish()
        }
    }
}

#[cfg(feature = "state-persistence")]
pub use file_storage::FileViewStorage;

// ─────────────────────────────────────────────────────────────────────────────
// ViewCache
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CacheState {
    entries: ViewEntries,
    dirty: bool,
}

/// In-memory view cache over a [`ViewStorage`] backend.
///
/// `set` only marks the cache dirty; [`flush`](Self::flush) writes it out.
/// Shared between the runtime and the host through `Arc`.
pub struct ViewCache {
    backend: Box<dyn ViewStorage>,
    state: Mutex<CacheState>,
}

impl ViewCache {
    /// Cache over `backend`. Call [`load`](Self::load) to read stored entries.
    #[must_use]
    pub fn new(backend: Box<dyn ViewStorage>) -> Self {
        Self {
            backend,
            state: Mutex::new(CacheState::default()),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryViewStorage::new()))
    }

    #[cfg(feature = "state-persistence")]
    #[must_use]
    pub fn with_file(path: impl AsRef<std::path::Path>) -> Self {
        Self::new(Box::new(FileViewStorage::new(path)))
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::Corruption("view cache lock poisoned".into()))
    }

    /// Replace the in-memory entries with the backend's. Returns the count.
    pub fn load(&self) -> StorageResult<usize> {
        let entries = self.backend.load_all()?;
        let count = entries.len();
        let mut state = self.lock()?;
        state.entries = entries;
        state.dirty = false;
        tracing::debug!(backend = %self.backend.name(), count, "loaded view cache");
        Ok(count)
    }

    /// Last page recorded for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PageId> {
        self.lock().ok()?.entries.get(key).cloned()
    }

    /// Record `page` for `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, page: PageId) {
        if let Ok(mut state) = self.lock() {
            let key = key.into();
            if state.entries.get(&key) != Some(&page) {
                state.entries.insert(key, page);
                state.dirty = true;
            }
        }
    }

    /// Write entries to the backend if anything changed.
    ///
    /// Returns `Ok(true)` if the backend was written.
    pub fn flush(&self) -> StorageResult<bool> {
        let mut state = self.lock()?;
        if !state.dirty {
            return Ok(false);
        }
        self.backend.save_all(&state.entries)?;
        state.dirty = false;
        Ok(true)
    }

    /// Drop every entry from memory and the backend.
    pub fn clear(&self) -> StorageResult<()> {
        self.backend.clear()?;
        let mut state = self.lock()?;
        state.entries.clear();
        state.dirty = false;
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.lock().map(|s| s.dirty).unwrap_or(false)
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

impl fmt::Debug for ViewCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCache")
            .field("backend", &self.backend.name())
            .field("entries", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_marks_dirty_and_flush_writes_backend() {
        let cache = ViewCache::in_memory();
        assert!(!cache.is_dirty());

        cache.set("512/abc", PageId::from("p2"));
        assert!(cache.is_dirty());
        assert_eq!(cache.get("512/abc"), Some(PageId::from("p2")));

        assert!(cache.flush().unwrap());
        assert!(!cache.is_dirty());
        assert!(!cache.flush().unwrap());
    }

    #[test]
    fn writing_the_same_page_is_not_a_change() {
        let cache = ViewCache::in_memory();
        cache.set("k", PageId::from("p1"));
        cache.flush().unwrap();
        cache.set("k", PageId::from("p1"));
        assert!(!cache.is_dirty());
    }

    #[test]
    fn load_replaces_memory_with_backend() {
        let mut stored = ViewEntries::new();
        stored.insert("k".into(), PageId::from("summary"));
        let cache = ViewCache::new(Box::new(MemoryViewStorage::with_entries(stored)));
        assert_eq!(cache.get("k"), None);

        assert_eq!(cache.load().unwrap(), 1);
        assert_eq!(cache.get("k"), Some(PageId::from("summary")));
    }

    #[test]
    fn clear_empties_memory_and_backend() {
        let cache = ViewCache::in_memory();
        cache.set("k", PageId::from("p1"));
        cache.flush().unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.load().unwrap(), 0);
    }

    #[cfg(feature = "state-persistence")]
    mod file {
        use super::*;

        #[test]
        fn file_round_trip_across_instances() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("views").join("cache.json");

            let cache = ViewCache::with_file(&path);
            cache.set("512/abc", PageId::from("p3"));
            assert!(cache.flush().unwrap());
            assert!(path.exists());

            let reopened = ViewCache::with_file(&path);
            assert_eq!(reopened.load().unwrap(), 1);
            assert_eq!(reopened.get("512/abc"), Some(PageId::from("p3")));
        }

        #[test]
        fn missing_file_loads_empty() {
            let dir = tempfile::tempdir().unwrap();
            let cache = ViewCache::with_file(dir.path().join("absent.json"));
            assert_eq!(cache.load().unwrap(), 0);
        }

        #[test]
        fn corrupt_file_is_a_serialization_error() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("cache.json");
            std::fs::write(&path, b"{not json").unwrap();
            let err = ViewCache::with_file(&path).load().unwrap_err();
            assert!(matches!(err, StorageError::Serialization(_)));
        }

        #[test]
        fn future_format_version_is_ignored() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("cache.json");
            std::fs::write(&path, br#"{"format_version":9,"views":{"k":"p1"}}"#).unwrap();
            assert_eq!(ViewCache::with_file(&path).load().unwrap(), 0);
        }
    }
}
