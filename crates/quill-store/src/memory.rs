use crate::blame::BlameTree;
use crate::sink::DataSink;
use crate::store::{Blame, StoreError, StoreResult};
use crate::types::{DataHandle, Document, DocumentKey, JsonPath, Mapping, PathComponent, Position};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

const MAX_BLAME_DEPTH: usize = 64;

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<DocumentKey, DataHandle>,
}

pub(crate) struct NewDocument<'a> {
    pub description: &'a str,
    pub content: String,
    pub artifact_type: Option<String>,
    pub mappings: Vec<Mapping>,
    pub forwarded_from: Option<DocumentKey>,
}

/// Content-addressed document store shared by every stage of one run.
#[derive(Clone, Debug, Default)]
pub struct DataStore {
    inner: Arc<Mutex<StoreState>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self, default_artifact: Option<String>) -> DataSink {
        DataSink::new(self.clone(), default_artifact)
    }

    pub fn read(&self, key: &str) -> StoreResult<Option<DataHandle>> {
        Ok(self.lock()?.documents.get(key).cloned())
    }

    pub fn read_strict(&self, key: &str) -> StoreResult<DataHandle> {
        self.read(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub fn description(&self, key: &str) -> Option<String> {
        self.read(key)
            .ok()
            .flatten()
            .map(|handle| handle.description().to_string())
    }

    pub fn find_by_description(&self, description: &str) -> StoreResult<Option<DataHandle>> {
        Ok(self
            .lock()?
            .documents
            .values()
            .find(|handle| handle.description() == description)
            .cloned())
    }

    pub fn len(&self) -> usize {
        self.lock()
            .map(|state| state.documents.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn insert(&self, document: NewDocument<'_>) -> StoreResult<DataHandle> {
        let key = document_key(&document);
        let mut state = self.lock()?;
        if let Some(existing) = state.documents.get(&key) {
            return Ok(existing.clone());
        }
        let handle = DataHandle::new(Document {
            key: key.clone(),
            description: document.description.to_string(),
            artifact_type: document.artifact_type,
            content: document.content,
            mappings: document.mappings,
            forwarded_from: document.forwarded_from,
        });
        state.documents.insert(key, handle.clone());
        Ok(handle)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("data store mutex poisoned".to_string()))
    }

    fn blame_at(&self, key: &str, position: &Position, depth: usize) -> StoreResult<BlameTree> {
        if depth > MAX_BLAME_DEPTH {
            return Err(blame_failed(key, position, "source map chain is too deep"));
        }
        let handle = self.read_strict(key)?;

        if let Some(origin) = handle.forwarded_from() {
            let child = self.blame_at(origin, position, depth + 1)?;
            return Ok(BlameTree {
                document: key.to_string(),
                position: position.clone(),
                children: vec![child],
            });
        }

        let originals: Vec<&Mapping> = match (&position.path, position.line) {
            (Some(path), _) => {
                ensure_path_exists(&handle, path, position)?;
                handle
                    .mappings()
                    .iter()
                    .filter(|mapping| {
                        mapping
                            .generated
                            .path
                            .as_deref()
                            .is_some_and(|generated| without_root(generated) == without_root(path))
                    })
                    .collect()
            }
            (None, Some(line)) => mappings_at_line(handle.mappings(), line, position.column),
            (None, None) => {
                return Err(blame_failed(
                    key,
                    position,
                    "position has neither a path nor a line",
                ));
            }
        };

        let children = originals
            .into_iter()
            .map(|mapping| {
                self.blame_at(&mapping.source, &mapping.original, depth + 1)
                    .unwrap_or_else(|_| {
                        BlameTree::leaf(mapping.source.clone(), mapping.original.clone())
                    })
            })
            .collect();

        Ok(BlameTree {
            document: key.to_string(),
            position: position.clone(),
            children,
        })
    }
}

impl Blame for DataStore {
    fn blame(&self, document: &str, position: &Position) -> StoreResult<BlameTree> {
        self.blame_at(document, position, 0)
    }
}

fn document_key(document: &NewDocument<'_>) -> DocumentKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(document.description.as_bytes());
    hasher.update(&[0]);
    hasher.update(document.artifact_type.as_deref().unwrap_or_default().as_bytes());
    hasher.update(&[0]);
    hasher.update(document.forwarded_from.as_deref().unwrap_or_default().as_bytes());
    hasher.update(&[0]);
    hasher.update(document.content.as_bytes());
    if !document.mappings.is_empty() {
        let mappings = serde_json::to_vec(&document.mappings).unwrap_or_default();
        hasher.update(&mappings);
    }
    hasher.finalize().to_hex().to_string()
}

fn ensure_path_exists(handle: &DataHandle, path: &JsonPath, position: &Position) -> StoreResult<()> {
    // Only JSON documents can be checked; anything else is looked up by mapping alone.
    let Ok(root) = serde_json::from_str::<Value>(handle.content()) else {
        return Ok(());
    };
    let mut cursor = &root;
    for part in without_root(path) {
        let next = match (part, cursor) {
            (PathComponent::Key(key), Value::Object(map)) => map.get(key),
            (PathComponent::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        };
        cursor = next.ok_or_else(|| {
            blame_failed(
                handle.key(),
                position,
                &format!("path segment '{part}' does not exist"),
            )
        })?;
    }
    Ok(())
}

fn without_root(path: &[PathComponent]) -> &[PathComponent] {
    match path.first() {
        Some(first) if first.is_root() => &path[1..],
        _ => path,
    }
}

fn mappings_at_line(mappings: &[Mapping], line: u32, column: Option<u32>) -> Vec<&Mapping> {
    let column = column.unwrap_or(u32::MAX);
    let candidates: Vec<&Mapping> = mappings
        .iter()
        .filter(|mapping| {
            mapping.generated.line == Some(line)
                && mapping.generated.column.unwrap_or_default() <= column
        })
        .collect();
    let Some(best) = candidates
        .iter()
        .map(|mapping| mapping.generated.column.unwrap_or_default())
        .max()
    else {
        return Vec::new();
    };
    candidates
        .into_iter()
        .filter(|mapping| mapping.generated.column.unwrap_or_default() == best)
        .collect()
}

fn blame_failed(document: &str, position: &Position, reason: &str) -> StoreError {
    StoreError::BlameFailed {
        document: document.to_string(),
        position: position.to_string(),
        reason: reason.to_string(),
    }
}
