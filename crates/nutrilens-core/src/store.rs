//! Persistent key-value interface consumed by the quota ledger.
//!
//! `FileStore` keeps one file per key under `~/.nutrilens/state/`;
//! `MemoryStore` backs tests and ephemeral runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::utils;

/// Minimal string key-value store.
///
/// `get` never fails: an unreadable entry is reported as absent.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> std::io::Result<()>;
}

// ─────────────────────────────────────────────
// FileStore
// ─────────────────────────────────────────────

/// Directory-backed store, one `<key>.json` file per key.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir` (defaults to `~/.nutrilens/state/`).
    /// The directory is created if it doesn't exist.
    pub fn new(dir: Option<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.unwrap_or_else(utils::get_state_path);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", utils::safe_filename(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.key_path(key);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("Failed to read state file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        let path = self.key_path(key);
        // Readers never observe a partially written file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        debug!("State saved to {}", path.display());
        Ok(())
    }
}

// ─────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────

/// In-memory store. Cloned values, no persistence.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(Some(dir.path().to_path_buf())).unwrap();

        assert!(store.get("quota_ledger").is_none());
        store.set("quota_ledger", "{\"version\":1}").unwrap();
        assert_eq!(store.get("quota_ledger").as_deref(), Some("{\"version\":1}"));

        // Overwrite
        store.set("quota_ledger", "{}").unwrap();
        assert_eq!(store.get("quota_ledger").as_deref(), Some("{}"));
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(Some(dir.path().to_path_buf())).unwrap();
        store.set("../escape", "x").unwrap();
        assert!(dir.path().join(".._escape.json").exists());
        assert_eq!(store.get("../escape").as_deref(), Some("x"));
    }

    #[test]
    fn test_file_store_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::new(Some(nested.clone())).unwrap();
        store.set("k", "v").unwrap();
        assert!(nested.join("k.json").exists());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get("k").is_none());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }
}
