//! Durable storage for a classifier's examples.
//!
//! The dataset is written as a single JSON text value under one key of a
//! [`KeyValueStore`]:
//!
//! ```json
//! [{"classId": 0, "data": [0.1, 0.2, ...], "shape": [rows, cols]}, ...]
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::classifier::{ClassifierDataset, ClassifierError, SerializedDataset};

/// Key the dataset is stored under unless configured otherwise
pub const DEFAULT_STORAGE_KEY: &str = "knnClassifier";

/// A string-keyed slot store holding UTF-8 text values.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    /// Overwrites any existing value
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Stores each key as `<key>.json` inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Creates a FileStore in the default data directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_data_dir())
    }

    /// Returns the default data directory path
    pub fn get_default_data_dir() -> PathBuf {
        if let Ok(path) = env::var("SNAPCLASS_DATA") {
            return PathBuf::from(path);
        }
        if let Some(data_dir) = dirs::data_dir() {
            return data_dir.join("snapclass");
        }
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".local").join("share").join("snapclass");
        }
        env::temp_dir().join("snapclass")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid storage key '{}'", key),
            ));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        // Write beside the target and rename so readers never see a partial value
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!("Failed to remove temporary file {:?}: {}", tmp, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// An in-process store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Saves and restores a [`ClassifierDataset`] through one key of a
/// [`KeyValueStore`]. Holds no data between calls.
#[derive(Clone)]
pub struct DatasetPersistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl std::fmt::Debug for DatasetPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetPersistence").field("key", &self.key).finish_non_exhaustive()
    }
}

impl DatasetPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encodes the dataset as JSON and overwrites the slot with it.
    pub fn save(&self, dataset: &ClassifierDataset) -> Result<SerializedDataset, ClassifierError> {
        let serialized = dataset.to_serialized();
        let json = serialized.to_json()?;
        self.store.set(&self.key, &json)?;
        info!(
            "Saved {} examples across {} classes under '{}'",
            dataset.total_examples(),
            dataset.num_classes(),
            self.key
        );
        Ok(serialized)
    }

    /// Reads the slot.
    ///
    /// # Returns
    /// * `Ok(None)` if nothing has been saved
    /// * `Ok(Some(_))` with the decoded records
    ///
    /// # Errors
    /// - `CorruptPersistedState` if the stored text is not a valid dataset
    /// - `StorageError` if the store cannot be read
    pub fn load(&self) -> Result<Option<SerializedDataset>, ClassifierError> {
        let Some(json) = self.store.get(&self.key)? else {
            debug!("No saved dataset under '{}'", self.key);
            return Ok(None);
        };
        let serialized = SerializedDataset::from_json(&json)?;
        // Validate the records before handing them out
        ClassifierDataset::from_serialized(serialized.clone())?;
        Ok(Some(serialized))
    }

    /// Reads the slot and rebuilds the dataset
    pub fn load_dataset(&self) -> Result<Option<ClassifierDataset>, ClassifierError> {
        let Some(json) = self.store.get(&self.key)? else {
            debug!("No saved dataset under '{}'", self.key);
            return Ok(None);
        };
        let dataset = ClassifierDataset::from_serialized(SerializedDataset::from_json(&json)?)?;
        info!(
            "Loaded {} examples across {} classes from '{}'",
            dataset.total_examples(),
            dataset.num_classes(),
            self.key
        );
        Ok(Some(dataset))
    }

    /// Removes the saved dataset, if any
    pub fn clear(&self) -> Result<(), ClassifierError> {
        self.store.remove(&self.key)?;
        Ok(())
    }
}
