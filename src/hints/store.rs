//! Key-value persistence consumed by the endpoint cache.
//!
//! The engine only reads one blob at start and may remove it when it is
//! corrupt. Writes come from the embedding application.

use dashmap::DashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// String-keyed store supplied by the embedding application.
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn read(&self, key: &str) -> Option<String> {
        (**self).read(key)
    }

    fn save(&self, key: &str, value: &str) {
        (**self).save(key, value)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }
}

/// Process-local store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyValueStore {
    entries: Arc<DashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn save(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// One file per key inside a directory.
///
/// Keys are hex-encoded into file names so any key is a valid path component.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() * 2 + 4);
        for byte in key.as_bytes() {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".kv");
        self.dir.join(name)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn read(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key, error = %e, "key-value read failed");
                None
            }
        }
    }

    fn save(&self, key: &str, value: &str) {
        if let Err(e) = fs::write(self.path_for(key), value) {
            warn!(key, error = %e, "key-value save failed");
        }
    }

    fn remove(&self, key: &str) {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(key, error = %e, "key-value remove failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryKeyValueStore::new();
        assert_eq!(store.read("a"), None);
        store.save("a", "1");
        store.save("a", "2");
        assert_eq!(store.read("a").as_deref(), Some("2"));
        assert_eq!(store.len(), 1);
        store.remove("a");
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();
        store.save("dns_persistent_cache", "payload");

        let reopened = FileKeyValueStore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.read("dns_persistent_cache").as_deref(),
            Some("payload")
        );
    }

    #[test]
    fn test_file_store_odd_keys() {
        let dir = tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path().join("nested")).unwrap();
        store.save("../escape/key", "v");
        assert_eq!(store.read("../escape/key").as_deref(), Some("v"));
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 1);

        store.remove("../escape/key");
        store.remove("../escape/key");
        assert_eq!(store.read("../escape/key"), None);
    }
}
