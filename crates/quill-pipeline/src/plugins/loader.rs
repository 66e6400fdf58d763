use super::{SharedPlugin, create_per_file_plugin};
use crate::errors::PipelineError;
use quill_store::{DataHandle, DataSink, JsonPath, Mapping, PathComponent};
use serde_json::Value;

/// Loads input files into the store. JSON files get an identity source map
/// over every path so diagnostics on loaded documents blame to the file.
pub fn loader_plugin() -> SharedPlugin {
    create_per_file_plugin(|_config, handle: DataHandle, sink: DataSink| async move {
        let loaded = match serde_json::from_str::<Value>(handle.content()) {
            Ok(document) => {
                let mut mappings = Vec::new();
                collect_identity_mappings(&document, &mut Vec::new(), handle.key(), &mut mappings);
                sink.write_data(handle.description(), handle.content(), None, mappings)?
            }
            Err(_) => sink.forward(handle.description(), &handle)?,
        };
        Ok::<_, PipelineError>(loaded)
    })
}

fn collect_identity_mappings(value: &Value, path: &mut JsonPath, source: &str, out: &mut Vec<Mapping>) {
    out.push(Mapping::path_to_path(path.clone(), source, path.clone()));
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(PathComponent::Key(key.clone()));
                collect_identity_mappings(child, path, source, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(PathComponent::Index(index));
                collect_identity_mappings(child, path, source, out);
                path.pop();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationView;
    use quill_store::{Blame, DataStore, FsDataSource, Position, SharedDataSource};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test(flavor = "current_thread")]
    async fn loader_json_file_expected_paths_blame_to_input_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(temp.path().join("pets.json"), r#"{"info":{"title":"Pets"},"tags":["a"]}"#)
            .expect("write fixture");
        std::fs::write(temp.path().join("notes.txt"), "plain text").expect("write fixture");
        let store = DataStore::new();
        let input: SharedDataSource = Arc::new(FsDataSource::new(
            store.clone(),
            temp.path(),
            vec!["pets.json".to_string(), "notes.txt".to_string()],
        ));
        let config = ConfigurationView::new(json!({})).expect("config");

        let output = loader_plugin()
            .process(&config, Arc::clone(&input), store.sink(None))
            .await
            .expect("loader should succeed");
        let handles = output.handles().await.expect("handles");
        assert_eq!(handles.len(), 2);

        let file = input.read_strict("pets.json").await.expect("input file");
        let tree = store
            .blame(
                handles[0].key(),
                &Position::with_path(vec![PathComponent::from("tags"), PathComponent::from(0usize)]),
            )
            .expect("blame should resolve");
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].document, file.key());
        assert_eq!(handles[1].content(), "plain text");
    }
}
