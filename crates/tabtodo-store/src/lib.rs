//! File-backed key-value store: one JSON object per area, replaced atomically on
//! every write and watched for changes made by any process.

mod watch;

use fs2::FileExt;
use notify::RecommendedWatcher;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Mutex;
use tabtodo_core::store::LOCAL_AREA;
use tabtodo_core::{KeyValueStore, StoreChange, StoreError};
use tracing::debug;

pub struct FileStore {
    root: PathBuf,
    area: String,
    path: PathBuf,
    lock_path: PathBuf,
    watchers: Mutex<Vec<RecommendedWatcher>>,
}

/// Exclusive advisory lock held for the duration of one read-modify-write.
struct AreaLock {
    file: File,
}

impl Drop for AreaLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>, area: &str) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            path: root.join(format!("{area}.json")),
            lock_path: root.join(format!("{area}.lock")),
            area: area.to_string(),
            root,
            watchers: Mutex::new(Vec::new()),
        })
    }

    pub fn local(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open(root, LOCAL_AREA)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<AreaLock, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()
            .map_err(|err| StoreError::Lock(format!("{}: {err}", self.lock_path.display())))?;
        Ok(AreaLock { file })
    }

    fn read_document(&self) -> Result<Map<String, Value>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::Serialization(format!(
                "{} root must be a JSON object",
                self.path.display()
            ))),
            Err(err) => Err(StoreError::Serialization(format!(
                "{} is not valid JSON: {err}",
                self.path.display()
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<(), StoreError> {
        let payload = serde_json::to_string_pretty(document)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        write_atomic(&self.path, &payload)
    }
}

impl KeyValueStore for FileStore {
    fn area(&self) -> &str {
        &self.area
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_document()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut document = self.read_document()?;
        document.insert(key.to_string(), value);
        self.write_document(&document)?;
        debug!(event = "store_write", area = %self.area, key = key);
        Ok(())
    }

    fn subscribe(&self) -> Result<Receiver<StoreChange>, StoreError> {
        let (watcher, rx) = watch::watch_area(&self.root, &self.area)?;
        self.watchers
            .lock()
            .map_err(|err| StoreError::Lock(err.to_string()))?
            .push(watcher);
        Ok(rx)
    }
}

fn write_atomic(path: &Path, payload: &str) -> Result<(), StoreError> {
    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!(".{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };
    std::fs::write(&temp_path, payload)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
