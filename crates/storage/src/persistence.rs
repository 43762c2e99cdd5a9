//! Key/value string persistence used behind the write-back string cache.

use hashbrown::HashMap;
use parking_lot::Mutex;
use quarry_core::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Durable storage for string values keyed by name.
pub trait StringPersistence: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Loads the value stored under `key`, `None` if nothing was stored.
    fn load(&self, key: &str) -> Result<Option<String>>;
}

/// Stores each key as `<key>.json` inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryPersistence {
    dir: PathBuf,
}

impl DirectoryPersistence {
    /// Opens (creating if needed) the directory at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::persistence(dir.display().to_string(), format!("create directory failed: {}", e))
        })?;
        Ok(Self { dir })
    }

    /// The backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(Error::persistence(key, "key is not a valid file name"));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl StringPersistence for DirectoryPersistence {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        let path = self.file_for(key)?;
        fs::write(&path, value).map_err(|e| Error::persistence(key, e.to_string()))
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.file_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::persistence(key, e.to_string())),
        }
    }
}

/// Keeps values in memory. Mostly useful for tests.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    values: Mutex<HashMap<String, String>>,
    saves: Mutex<usize>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value without going through the trait.
    pub fn stored(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl StringPersistence for MemoryPersistence {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }
}

impl<P: StringPersistence + ?Sized> StringPersistence for std::sync::Arc<P> {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        (**self).save(key, value)
    }

    fn load(&self, key: &str) -> Result<Option<String>> {
        (**self).load(key)
    }
}
