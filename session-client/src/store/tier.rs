use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use tracing::{debug, warn};

use super::{StoreError, StoreResult};

/// One durability tier of string key/value storage.
pub trait StorageTier: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: String) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
}

// ---------------- In-Memory Implementation (tab-scoped) ----------------

#[derive(Debug, Default)]
pub struct MemoryTier {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageTier for MemoryTier {
    fn read(&self, key: &str) -> Option<String> {
        let guard = self.inner.read().expect("tier lock poisoned");
        guard.get(key).cloned()
    }

    fn write(&self, key: &str, value: String) -> StoreResult<()> {
        let mut guard = self.inner.write().expect("tier lock poisoned");
        guard.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.inner.write().expect("tier lock poisoned");
        guard.remove(key);
        Ok(())
    }
}

// ---------------- File Implementation (survives restart) ----------------

/// JSON object on disk, rewritten through a temp file on every mutation.
#[derive(Debug)]
pub struct FileTier {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, String>>,
}

impl FileTier {
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(?err, path = %path.display(), "durable session file unreadable; starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "opened durable session tier");
        Ok(Self {
            path,
            inner: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageTier for FileTier {
    fn read(&self, key: &str) -> Option<String> {
        let guard = self.inner.lock().expect("tier lock poisoned");
        guard.get(key).cloned()
    }

    fn write(&self, key: &str, value: String) -> StoreResult<()> {
        let mut guard = self.inner.lock().expect("tier lock poisoned");
        guard.insert(key.to_string(), value);
        self.persist(&guard)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.inner.lock().expect("tier lock poisoned");
        if guard.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&guard)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_tier_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("session.json");

        let tier = FileTier::open(&path).expect("open");
        tier.write("user.session", "value".to_string()).expect("write");
        drop(tier);

        let reopened = FileTier::open(&path).expect("reopen");
        assert_eq!(reopened.read("user.session").as_deref(), Some("value"));
        reopened.remove("user.session").expect("remove");
        assert!(FileTier::open(&path).expect("reopen").read("user.session").is_none());
    }

    #[test]
    fn corrupt_file_opens_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        fs::write(&path, b"{not json").expect("seed");

        let tier = FileTier::open(&path).expect("open");
        assert!(tier.read("anything").is_none());
    }
}
