//! Small client-side key/value persistence (recent searches, the
//! remember-me flag, a remembered session).
//!
//! [`ClientStore::open`] prefers a JSON file in a state directory and falls
//! back to process memory when that directory cannot be used; callers see
//! the same behaviour either way, only durability differs.

use crate::error::BlogClientError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub const RECENT_SEARCHES_KEY: &str = "recent_searches";
pub const REMEMBER_ME_KEY: &str = "remember_me";
pub const SESSION_KEY: &str = "session";

const STATE_FILE: &str = "state.json";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<(), BlogClientError>;
    fn remove(&self, key: &str) -> Result<(), BlogClientError>;

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T>
    where
        Self: Sized,
    {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "ignoring unreadable stored value");
                None
            }
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), BlogClientError>
    where
        Self: Sized,
    {
        self.set(key, serde_json::to_string(value)?)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries)
            .get(key)
            .and_then(Value::as_str)
            .map(String::from)
    }

    fn set(&self, key: &str, value: String) -> Result<(), BlogClientError> {
        lock(&self.entries).insert(key.to_string(), Value::String(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BlogClientError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// All keys live in one `state.json` object inside `dir`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    /// Opens the store, creating `dir` and checking it is writable.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, BlogClientError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(storage_error)?;
        let path = dir.join(STATE_FILE);
        let store = Self {
            path,
            guard: Mutex::new(()),
        };
        let entries = store.read()?;
        store.write(&entries)?;
        Ok(store)
    }

    fn read(&self) -> Result<Map<String, Value>, BlogClientError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(Map::new()),
            Ok(text) => match serde_json::from_str(&text) {
                Ok(Value::Object(map)) => Ok(map),
                _ => {
                    warn!(path = %self.path.display(), "state file is corrupt, starting empty");
                    Ok(Map::new())
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(storage_error(err)),
        }
    }

    fn write(&self, entries: &Map<String, Value>) -> Result<(), BlogClientError> {
        let text = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(storage_error)?;
        fs::rename(&tmp, &self.path).map_err(storage_error)
    }
}

fn storage_error(err: std::io::Error) -> BlogClientError {
    BlogClientError::Storage(err.to_string())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = lock(&self.guard);
        match self.read() {
            Ok(entries) => entries.get(key).and_then(Value::as_str).map(String::from),
            Err(err) => {
                warn!(error = %err, "state file unreadable");
                None
            }
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), BlogClientError> {
        let _guard = lock(&self.guard);
        let mut entries = self.read()?;
        entries.insert(key.to_string(), Value::String(value));
        self.write(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), BlogClientError> {
        let _guard = lock(&self.guard);
        let mut entries = self.read()?;
        if entries.remove(key).is_some() {
            self.write(&entries)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ClientStore {
    File(FileStore),
    Memory(MemoryStore),
}

impl ClientStore {
    pub fn open(dir: impl AsRef<Path>) -> Self {
        match FileStore::open(&dir) {
            Ok(store) => {
                debug!(dir = %dir.as_ref().display(), "using file-backed client store");
                ClientStore::File(store)
            }
            Err(err) => {
                warn!(error = %err, "persistent storage unavailable, keeping state in memory");
                ClientStore::Memory(MemoryStore::new())
            }
        }
    }

    pub fn in_memory() -> Self {
        ClientStore::Memory(MemoryStore::new())
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, ClientStore::File(_))
    }
}

impl KeyValueStore for ClientStore {
    fn get(&self, key: &str) -> Option<String> {
        match self {
            ClientStore::File(store) => store.get(key),
            ClientStore::Memory(store) => store.get(key),
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), BlogClientError> {
        match self {
            ClientStore::File(store) => store.set(key, value),
            ClientStore::Memory(store) => store.set(key, value),
        }
    }

    fn remove(&self, key: &str) -> Result<(), BlogClientError> {
        match self {
            ClientStore::File(store) => store.remove(key),
            ClientStore::Memory(store) => store.remove(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &impl KeyValueStore) {
        assert_eq!(store.get("k"), None);
        store.set("k", "v".into()).unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
        store.set_json("flag", &true).unwrap();
        assert_eq!(store.get_json::<bool>("flag"), Some(true));
        store.remove("k").unwrap();
        assert_eq!(store.get("k"), None);
        store.remove("missing").unwrap();
    }

    #[test]
    fn memory_and_file_stores_behave_alike() {
        exercise(&MemoryStore::new());
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path())
            .unwrap()
            .set("k", "v".into())
            .unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn falls_back_to_memory_when_dir_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let store = ClientStore::open(blocker.join("state"));
        assert!(!store.is_persistent());
        exercise(&store);
    }

    #[test]
    fn corrupt_state_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("k"), None);
        store.set("k", "v".into()).unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn unreadable_json_value_is_ignored() {
        let store = MemoryStore::new();
        store.set(REMEMBER_ME_KEY, "not-a-bool".into()).unwrap();
        assert_eq!(store.get_json::<bool>(REMEMBER_ME_KEY), None);
    }
}
