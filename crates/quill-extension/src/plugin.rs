use crate::process::ExtensionProcess;
use async_trait::async_trait;
use quill_pipeline::{ConfigurationView, Plugin, PipelineResult, SharedPlugin};
use quill_store::{DataSink, QuickDataSource, SharedDataSource};
use std::sync::Arc;

/// Registry entry for a plugin served by an extension process.
#[derive(Debug)]
pub struct ExternalPlugin {
    process: Arc<ExtensionProcess>,
    plugin_name: String,
}

impl ExternalPlugin {
    pub fn new(process: Arc<ExtensionProcess>, plugin_name: impl Into<String>) -> Self {
        Self {
            process,
            plugin_name: plugin_name.into(),
        }
    }

    pub fn shared(process: Arc<ExtensionProcess>, plugin_name: impl Into<String>) -> SharedPlugin {
        Arc::new(Self::new(process, plugin_name))
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }
}

#[async_trait]
impl Plugin for ExternalPlugin {
    async fn process(
        &self,
        config: &ConfigurationView,
        input: SharedDataSource,
        sink: DataSink,
    ) -> PipelineResult<SharedDataSource> {
        let results = self
            .process
            .process(&self.plugin_name, config.clone(), input, sink)
            .await
            .map_err(|err| err.into_pipeline_error(&self.plugin_name))?;
        Ok(Arc::new(QuickDataSource::new(results)))
    }
}
