//! Key/value storage backing the token store.
//!
//! Two scopes mirror what a browser offers:
//!
//! - [`MemoryStore`]: lives as long as the process (session scope).
//! - [`FileStore`]: a JSON file shared by every process pointed at it
//!   (origin scope). Changes made by another process are picked up by
//!   [`FileStore::spawn_watcher`] and re-broadcast as [`StorageEvent`]s.

use crate::errors::AppError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

/// Notification emitted after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed; `None` when the whole store was replaced or cleared.
    pub key: Option<String>,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
    /// Receives an event for every mutation, local or external.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// Process-scoped store.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            events,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Read-modify-write against the file, so writes made by other
    /// processes since the last reload are kept.
    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut external = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let external = sync_from_disk(&self.path, &mut entries)?;
            entries.insert(key.to_string(), value.to_string());
            self.persist(&entries)?;
            external
        };
        external.retain(|k| k != key);
        self.notify(&external);
        let _ = self.events.send(StorageEvent {
            key: Some(key.to_string()),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let (mut external, removed) = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let external = sync_from_disk(&self.path, &mut entries)?;
            let removed = entries.remove(key).is_some();
            if removed {
                self.persist(&entries)?;
            }
            (external, removed)
        };
        if removed {
            external.retain(|k| k != key);
        }
        self.notify(&external);
        if removed {
            let _ = self.events.send(StorageEvent {
                key: Some(key.to_string()),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// JSON-file store shared across processes.
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    last_seen: RwLock<Option<SystemTime>>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path`.
    ///
    /// A missing file is an empty store. A corrupt file is also treated as
    /// empty and will be overwritten on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            last_seen: RwLock::new(modified_at(&path)),
            path,
            entries: RwLock::new(entries),
            events,
        };
        tracing::debug!("Opened storage file {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Storage(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        let body = serde_json::to_vec_pretty(entries)
            .map_err(|e| AppError::Storage(format!("encode storage: {}", e)))?;

        // Write-then-rename so a concurrent reader never sees a torn file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)
            .map_err(|e| AppError::Storage(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::Storage(format!("rename {}: {}", self.path.display(), e)))?;

        let mut last_seen = self.last_seen.write().unwrap_or_else(|e| e.into_inner());
        *last_seen = modified_at(&self.path);
        Ok(())
    }

    /// Re-reads the file and broadcasts one event per changed key.
    ///
    /// Returns the number of keys that changed.
    pub fn reload(&self) -> Result<usize, AppError> {
        let changed = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            sync_from_disk(&self.path, &mut entries)?
        };
        {
            let mut last_seen = self.last_seen.write().unwrap_or_else(|e| e.into_inner());
            *last_seen = modified_at(&self.path);
        }
        self.notify(&changed);
        Ok(changed.len())
    }

    fn notify(&self, keys: &[String]) {
        for key in keys {
            let _ = self.events.send(StorageEvent {
                key: Some(key.clone()),
            });
        }
        if !keys.is_empty() {
            tracing::debug!("Storage file changed externally: {} key(s)", keys.len());
        }
    }

    fn changed_on_disk(&self) -> bool {
        let current = modified_at(&self.path);
        let last_seen = self.last_seen.read().unwrap_or_else(|e| e.into_inner());
        current != *last_seen
    }

    /// Polls the file for writes made by other processes.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_watcher(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.changed_on_disk() {
                    if let Err(e) = self.reload() {
                        tracing::warn!("Failed to reload storage file: {}", e);
                    }
                }
            }
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.insert(key.to_string(), value.to_string());
            self.persist(&entries)?;
        }
        let _ = self.events.send(StorageEvent {
            key: Some(key.to_string()),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            if entries.remove(key).is_none() {
                return Ok(());
            }
            self.persist(&entries)?;
        }
        let _ = self.events.send(StorageEvent {
            key: Some(key.to_string()),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Replaces `entries` with the file contents and returns the keys that differed.
fn sync_from_disk(
    path: &Path,
    entries: &mut BTreeMap<String, String>,
) -> Result<Vec<String>, AppError> {
    let fresh = read_entries(path)?;
    let mut changed: Vec<String> = fresh
        .iter()
        .filter(|(k, v)| entries.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    changed.extend(entries.keys().filter(|k| !fresh.contains_key(*k)).cloned());
    *entries = fresh;
    Ok(changed)
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>, AppError> {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!("Ignoring corrupt storage file {}: {}", path.display(), e);
                Ok(BTreeMap::new())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(AppError::Storage(format!("read {}: {}", path.display(), e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k"), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k"), None);
    }

    #[tokio::test]
    async fn test_memory_store_broadcasts_mutations() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.set("token", "abc").unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key.as_deref(), Some("token"));
    }

    #[test]
    fn test_removing_absent_key_is_silent() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.remove("missing").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_file_store_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/storage.json");

        let store = FileStore::open(&path).unwrap();
        store.set("access_token", "t-1").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("access_token").as_deref(), Some("t-1"));
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("access_token"), None);
        store.set("access_token", "fresh").unwrap();
        assert_eq!(
            FileStore::open(&path).unwrap().get("access_token").as_deref(),
            Some("fresh")
        );
    }

    #[test]
    fn test_reload_reports_external_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path).unwrap();
        let mut rx = second.subscribe();

        first.set("access_token", "from-other-tab").unwrap();
        assert_eq!(second.get("access_token"), None);

        assert_eq!(second.reload().unwrap(), 1);
        assert_eq!(second.get("access_token").as_deref(), Some("from-other-tab"));
        assert_eq!(rx.try_recv().unwrap().key.as_deref(), Some("access_token"));

        first.remove("access_token").unwrap();
        assert_eq!(second.reload().unwrap(), 1);
        assert_eq!(second.get("access_token"), None);
    }

    #[test]
    fn test_remove_reaches_keys_written_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let stale = FileStore::open(&path).unwrap();
        let other = FileStore::open(&path).unwrap();

        other.set("access_token", "t-2").unwrap();
        // `stale` never reloaded, yet its remove must hit the file
        stale.remove("access_token").unwrap();

        assert_eq!(FileStore::open(&path).unwrap().get("access_token"), None);
        assert_eq!(stale.get("access_token"), None);
    }

    #[test]
    fn test_set_keeps_keys_written_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let stale = FileStore::open(&path).unwrap();
        let other = FileStore::open(&path).unwrap();
        let mut rx = stale.subscribe();

        other.set("theme", "dark").unwrap();
        stale.set("access_token", "t-1").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("theme").as_deref(), Some("dark"));
        assert_eq!(reopened.get("access_token").as_deref(), Some("t-1"));
        assert_eq!(stale.get("theme").as_deref(), Some("dark"));
        assert_eq!(rx.try_recv().unwrap().key.as_deref(), Some("theme"));
        assert_eq!(rx.try_recv().unwrap().key.as_deref(), Some("access_token"));
    }
}
