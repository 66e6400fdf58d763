use crate::memory::{DataStore, NewDocument};
use crate::store::{StoreError, StoreResult};
use crate::types::{DataHandle, Mapping};
use serde_json::Value;

/// Write side of the store handed to a plugin invocation. Documents written
/// without an explicit artifact type take the sink's default.
#[derive(Clone, Debug)]
pub struct DataSink {
    store: DataStore,
    default_artifact: Option<String>,
}

impl DataSink {
    pub(crate) fn new(store: DataStore, default_artifact: Option<String>) -> Self {
        Self {
            store,
            default_artifact,
        }
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn default_artifact(&self) -> Option<&str> {
        self.default_artifact.as_deref()
    }

    pub fn write_data(
        &self,
        description: &str,
        content: impl Into<String>,
        artifact_type: Option<&str>,
        mappings: Vec<Mapping>,
    ) -> StoreResult<DataHandle> {
        self.store.insert(NewDocument {
            description,
            content: content.into(),
            artifact_type: self.artifact_or_default(artifact_type),
            mappings,
            forwarded_from: None,
        })
    }

    pub fn write_object(
        &self,
        description: &str,
        value: &Value,
        artifact_type: Option<&str>,
        mappings: Vec<Mapping>,
    ) -> StoreResult<DataHandle> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        self.write_data(description, content, artifact_type, mappings)
    }

    /// Re-publishes `handle` under `description`; blame on the new document
    /// delegates to the original.
    pub fn forward(&self, description: &str, handle: &DataHandle) -> StoreResult<DataHandle> {
        let artifact_type = self
            .default_artifact
            .clone()
            .or_else(|| handle.artifact_type().map(ToOwned::to_owned));
        self.store.insert(NewDocument {
            description,
            content: handle.content().to_string(),
            artifact_type,
            mappings: Vec::new(),
            forwarded_from: Some(handle.key().to_string()),
        })
    }

    fn artifact_or_default(&self, artifact_type: Option<&str>) -> Option<String> {
        artifact_type
            .map(ToOwned::to_owned)
            .or_else(|| self.default_artifact.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Blame;
    use crate::types::{Position, json_path};

    #[test]
    fn write_data_without_artifact_expected_sink_default() {
        let store = DataStore::new();
        let sink = store.sink(Some("swagger-document".to_string()));
        let handle = sink
            .write_data("a.json", "{}", None, Vec::new())
            .expect("write should succeed");
        assert_eq!(handle.artifact_type(), Some("swagger-document"));

        let explicit = sink
            .write_data("b.json", "{}", Some("code-model"), Vec::new())
            .expect("write should succeed");
        assert_eq!(explicit.artifact_type(), Some("code-model"));
    }

    #[test]
    fn forward_expected_blame_delegates_to_original() {
        let store = DataStore::new();
        let sink = store.sink(None);
        let original = sink
            .write_data("in.json", r#"{"x":1}"#, None, Vec::new())
            .expect("write should succeed");
        let forwarded = sink
            .forward("out.json", &original)
            .expect("forward should succeed");

        assert_eq!(forwarded.content(), original.content());
        let tree = store
            .blame(forwarded.key(), &Position::with_path(json_path(["x"])))
            .expect("blame should resolve");
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].document, original.key());
    }

    #[test]
    fn write_object_expected_pretty_json_content() {
        let store = DataStore::new();
        let handle = store
            .sink(None)
            .write_object("obj.json", &serde_json::json!({"a": 1}), None, Vec::new())
            .expect("write should succeed");
        assert_eq!(
            handle.read_object().expect("content should parse"),
            serde_json::json!({"a": 1})
        );
    }
}
