use super::{Plugin, SharedPlugin};
use crate::config::ConfigurationView;
use crate::errors::PipelineResult;
use async_trait::async_trait;
use quill_store::{DataHandle, DataSink, QuickDataSource, SharedDataSource};
use std::future::Future;
use std::sync::Arc;

/// Applies a per-document transform to every input document, in order.
pub struct PerFilePlugin<F> {
    process_file: F,
}

#[async_trait]
impl<F, Fut> Plugin for PerFilePlugin<F>
where
    F: Fn(ConfigurationView, DataHandle, DataSink) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<DataHandle>> + Send,
{
    async fn process(
        &self,
        config: &ConfigurationView,
        input: SharedDataSource,
        sink: DataSink,
    ) -> PipelineResult<SharedDataSource> {
        let mut outputs = Vec::new();
        for key in input.enumerate().await? {
            let handle = input.read_strict(&key).await?;
            outputs.push((self.process_file)(config.clone(), handle, sink.clone()).await?);
        }
        Ok(Arc::new(QuickDataSource::new(outputs)))
    }
}

pub fn create_per_file_plugin<F, Fut>(process_file: F) -> SharedPlugin
where
    F: Fn(ConfigurationView, DataHandle, DataSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<DataHandle>> + Send + 'static,
{
    Arc::new(PerFilePlugin { process_file })
}
