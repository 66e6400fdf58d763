use crate::memory::{DataStore, NewDocument};
use crate::store::{DataSource, StoreError, StoreResult};
use crate::types::DataHandle;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

pub const INPUT_FILE_ARTIFACT: &str = "input-file";

/// Read-through source over files on disk. Enumerates the configured input
/// files; any relative path under the base folder can be read, while keys
/// that leave the base folder are refused. Files are
/// registered in the store on first read, keyed by their path as given.
#[derive(Debug)]
pub struct FsDataSource {
    store: DataStore,
    base_folder: PathBuf,
    input_files: Vec<String>,
    loaded: Mutex<BTreeMap<String, DataHandle>>,
}

impl FsDataSource {
    pub fn new(store: DataStore, base_folder: impl Into<PathBuf>, input_files: Vec<String>) -> Self {
        Self {
            store,
            base_folder: base_folder.into(),
            input_files,
            loaded: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    fn cached(&self, key: &str) -> StoreResult<Option<DataHandle>> {
        let loaded = self
            .loaded
            .lock()
            .map_err(|_| StoreError::Backend("fs source mutex poisoned".to_string()))?;
        Ok(loaded.get(key).cloned())
    }

    fn remember(&self, key: &str, handle: &DataHandle) -> StoreResult<()> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| StoreError::Backend("fs source mutex poisoned".to_string()))?;
        loaded.insert(key.to_string(), handle.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl DataSource for FsDataSource {
    async fn enumerate(&self) -> StoreResult<Vec<String>> {
        Ok(self.input_files.clone())
    }

    async fn read(&self, key: &str) -> StoreResult<Option<DataHandle>> {
        if let Some(handle) = self.cached(key)? {
            return Ok(Some(handle));
        }

        let path = contained_path(&self.base_folder, key).ok_or_else(|| {
            StoreError::InvalidInput(format!("refusing to read '{key}' outside the base folder"))
        })?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::Io(format!(
                    "read '{}' failed: {err}",
                    path.display()
                )));
            }
        };

        let handle = self.store.insert(NewDocument {
            description: key,
            content,
            artifact_type: Some(INPUT_FILE_ARTIFACT.to_string()),
            mappings: Vec::new(),
            forwarded_from: None,
        })?;
        self.remember(key, &handle)?;
        Ok(Some(handle))
    }
}

/// `base_folder` joined with `key` when `key` is relative and never climbs
/// above it.
fn contained_path(base_folder: &Path, key: &str) -> Option<PathBuf> {
    let relative = Path::new(key);
    relative
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        .then(|| base_folder.join(relative))
}
