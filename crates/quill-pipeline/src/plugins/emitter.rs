use super::Plugin;
use crate::config::ConfigurationView;
use crate::errors::{PipelineError, PipelineResult};
use crate::message::Artifact;
use async_trait::async_trait;
use quill_store::{DataSink, QuickDataSource, SharedDataSource};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Writes input documents to the output folder and announces each as an
/// artifact. Only artifact types listed in `output-artifact` are written
/// when that key is set.
#[derive(Debug, Default)]
pub struct EmitterPlugin;

#[async_trait]
impl Plugin for EmitterPlugin {
    async fn process(
        &self,
        config: &ConfigurationView,
        input: SharedDataSource,
        _sink: DataSink,
    ) -> PipelineResult<SharedDataSource> {
        let wanted = config.get_strings("output-artifact");
        let output_folder = config.output_folder();
        let mut emitted = Vec::new();

        for handle in input.handles().await? {
            let artifact_type = handle.artifact_type().unwrap_or_default().to_string();
            if !wanted.is_empty() && !wanted.iter().any(|wanted| *wanted == artifact_type) {
                continue;
            }
            let target = output_path(&output_folder, handle.description())?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|err| {
                    PipelineError::Io(format!("create '{}' failed: {err}", parent.display()))
                })?;
            }
            tokio::fs::write(&target, handle.content())
                .await
                .map_err(|err| PipelineError::Io(format!("write '{}' failed: {err}", target.display())))?;
            tracing::debug!(path = %target.display(), artifact = %artifact_type, "artifact written");

            config.emit_artifact(Artifact {
                uri: handle.description().to_string(),
                artifact_type,
                content: handle.content().to_string(),
                source_map: handle.mappings().to_vec(),
            });
            emitted.push(handle);
        }

        Ok(Arc::new(QuickDataSource::new(emitted)))
    }
}

fn output_path(output_folder: &Path, description: &str) -> PipelineResult<PathBuf> {
    let relative = Path::new(description.trim_start_matches('/'));
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(PipelineError::Io(format!(
            "refusing to write '{description}' outside the output folder"
        )));
    }
    Ok(output_folder.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunServices;
    use crate::events::{RunEvent, run_event_channel, RunEventSink};
    use quill_store::DataStore;
    use serde_json::json;

    #[tokio::test(flavor = "current_thread")]
    async fn emitter_with_filter_expected_only_matching_artifacts_written() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let store = DataStore::new();
        let sink = store.sink(None);
        let code = sink
            .write_data("src/client.cs", "class Client {}", Some("source-file-csharp"), Vec::new())
            .expect("write");
        let model = sink
            .write_data("code-model.yaml", "x: 1", Some("code-model"), Vec::new())
            .expect("write");
        let (tx, mut rx) = run_event_channel();
        let services = RunServices {
            store: store.clone(),
            events: RunEventSink::with_sender(tx),
            ..RunServices::default()
        };
        let config = ConfigurationView::with_services(
            json!({
                "output-folder": temp.path().to_string_lossy(),
                "output-artifact": ["source-file-csharp"],
            }),
            services,
        )
        .expect("config");

        let output = EmitterPlugin
            .process(
                &config,
                Arc::new(QuickDataSource::new(vec![code, model])),
                store.sink(None),
            )
            .await
            .expect("emitter should succeed");

        assert_eq!(output.enumerate().await.expect("enumerate").len(), 1);
        let written = std::fs::read_to_string(temp.path().join("src/client.cs")).expect("file written");
        assert_eq!(written, "class Client {}");
        assert!(!temp.path().join("code-model.yaml").exists());
        match rx.try_recv().expect("artifact event") {
            RunEvent::Artifact(artifact) => {
                assert_eq!(artifact.uri, "src/client.cs");
                assert_eq!(artifact.artifact_type, "source-file-csharp");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn output_path_parent_component_expected_error() {
        let error = output_path(Path::new("/out"), "../escape.txt").expect_err("should refuse");
        assert!(matches!(error, PipelineError::Io(_)));
    }
}
