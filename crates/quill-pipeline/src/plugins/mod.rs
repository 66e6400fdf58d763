use crate::config::ConfigurationView;
use crate::errors::PipelineResult;
use async_trait::async_trait;
use quill_store::{DataSink, SharedDataSource};
use std::future::Future;
use std::sync::Arc;

pub mod emitter;
pub mod identity;
pub mod loader;
pub mod per_file;
pub mod registry;

pub use per_file::{PerFilePlugin, create_per_file_plugin};
pub use registry::PluginRegistry;

/// A pipeline stage implementation: consumes the stage input and produces
/// its output, writing new documents through `sink`.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn process(
        &self,
        config: &ConfigurationView,
        input: SharedDataSource,
        sink: DataSink,
    ) -> PipelineResult<SharedDataSource>;
}

pub type SharedPlugin = Arc<dyn Plugin>;

#[async_trait]
impl<F, Fut> Plugin for F
where
    F: Fn(ConfigurationView, SharedDataSource, DataSink) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<SharedDataSource>> + Send,
{
    async fn process(
        &self,
        config: &ConfigurationView,
        input: SharedDataSource,
        sink: DataSink,
    ) -> PipelineResult<SharedDataSource> {
        self(config.clone(), input, sink).await
    }
}

pub fn builtin_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register("identity", identity::identity_plugin());
    registry.register("loader", loader::loader_plugin());
    registry.register("emitter", Arc::new(emitter::EmitterPlugin));
    registry
}
