use crate::errors::ExtensionError;
use crate::manager::{ExtensionManager, register_plugins};
use crate::process::{ExtensionCommand, ExtensionProcess};
use quill_pipeline::{
    ConfigurationView, PipelineError, PipelineResult, PluginRegistry, RunOutcome, SharedPlugin,
    run_pipeline,
};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

pub const EXTENSIONS_KEY: &str = "extensions";

/// Run context: the extension table plus the plugin registry runs use.
///
/// The registry is replaced rather than mutated, so a run keeps the registry
/// it started with even if extensions are loaded or shut down meanwhile.
#[derive(Debug)]
pub struct Engine {
    manager: ExtensionManager,
    registry: RwLock<Arc<PluginRegistry>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            manager: ExtensionManager::new(),
            registry: RwLock::new(Arc::new(PluginRegistry::with_builtins())),
        }
    }

    pub fn manager(&self) -> &ExtensionManager {
        &self.manager
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        Arc::clone(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn register_plugin(&self, name: impl Into<String>, plugin: SharedPlugin) {
        self.update_registry(|registry| {
            registry.register(name, plugin);
        });
    }

    pub async fn load_extension(
        &self,
        name: &str,
        command: &ExtensionCommand,
        cancel: &CancellationToken,
    ) -> Result<Arc<ExtensionProcess>, ExtensionError> {
        let process = self.manager.start(name, command, cancel).await?;
        self.update_registry(|registry| register_plugins(registry, &process));
        Ok(process)
    }

    /// Starts every extension declared under `extensions` in `config`.
    pub async fn load_configured_extensions(&self, config: &ConfigurationView) -> PipelineResult<()> {
        let declared = match config.resolve(EXTENSIONS_KEY)? {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Object(declared)) => declared,
            Some(other) => {
                return Err(PipelineError::Configuration(format!(
                    "'{EXTENSIONS_KEY}' must map names to commands, found {other}"
                )));
            }
        };
        for (name, value) in declared {
            let command: ExtensionCommand = serde_json::from_value(value).map_err(|err| {
                PipelineError::Configuration(format!("extension '{name}' is malformed: {err}"))
            })?;
            self.load_extension(&name, &command, config.cancellation_token())
                .await
                .map_err(|err| err.into_pipeline_error(&name))?;
        }
        Ok(())
    }

    /// Loads the configured extensions and runs the pipeline. Cancellation
    /// at any point, extension startup included, yields
    /// `RunOutcome::Cancelled`.
    pub async fn run(&self, config: &ConfigurationView) -> PipelineResult<RunOutcome> {
        match self.load_configured_extensions(config).await {
            Ok(()) => {}
            Err(PipelineError::Cancelled) => {
                tracing::info!("run cancelled while loading extensions");
                return Ok(RunOutcome::Cancelled);
            }
            Err(err) => return Err(err),
        }
        run_pipeline(config, self.registry()).await
    }

    /// Kills every extension and resets the registry to the built-ins. The
    /// engine can run again afterwards.
    pub async fn shutdown(&self) {
        self.manager.kill_all().await;
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(PluginRegistry::with_builtins());
        tracing::info!("engine shut down");
    }

    fn update_registry(&self, change: impl FnOnce(&mut PluginRegistry)) {
        let mut current = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = PluginRegistry::clone(&current);
        change(&mut next);
        *current = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_store::{DataSink, SharedDataSource};
    use serde_json::json;

    #[test]
    fn register_plugin_expected_previous_registry_unchanged() {
        let engine = Engine::new();
        let before = engine.registry();
        engine.register_plugin(
            "noop",
            Arc::new(
                |_config: ConfigurationView, input: SharedDataSource, _sink: DataSink| async move {
                    Ok::<_, PipelineError>(input)
                },
            ),
        );
        assert!(!before.contains("noop"));
        assert!(engine.registry().contains("noop"));
        assert!(engine.registry().contains("loader"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn load_configured_extensions_bad_shape_expected_configuration_error() {
        let engine = Engine::new();
        let config = ConfigurationView::new(json!({"extensions": ["not", "a", "map"]})).expect("config");
        let error = engine
            .load_configured_extensions(&config)
            .await
            .expect_err("should fail");
        assert!(error.is_configuration());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shutdown_expected_builtins_registry() {
        let engine = Engine::new();
        engine.register_plugin(
            "noop",
            Arc::new(
                |_config: ConfigurationView, input: SharedDataSource, _sink: DataSink| async move {
                    Ok::<_, PipelineError>(input)
                },
            ),
        );
        engine.shutdown().await;
        assert!(!engine.registry().contains("noop"));
        assert_eq!(engine.manager().live_count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "current_thread")]
    async fn run_cancelled_during_extension_startup_expected_cancelled_outcome() {
        let engine = Engine::new();
        let config = ConfigurationView::new(json!({
            "extensions": {"slow": {"command": "sleep", "args": ["5"]}},
            "pipeline": {"loader": {}},
        }))
        .expect("config");
        config.cancellation_token().cancel();

        let outcome = engine.run(&config).await.expect("cancellation is not an error");
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(engine.manager().live_count().await, 0);
    }
}
