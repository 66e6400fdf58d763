use super::SharedPlugin;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins_by_name: BTreeMap<String, SharedPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `identity`, `loader` and `emitter`.
    pub fn with_builtins() -> Self {
        super::builtin_registry()
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: SharedPlugin) -> Option<SharedPlugin> {
        self.plugins_by_name.insert(name.into(), plugin)
    }

    pub fn get(&self, name: &str) -> Option<SharedPlugin> {
        self.plugins_by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins_by_name.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins_by_name.keys().cloned().collect()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationView;
    use crate::errors::PipelineResult;
    use quill_store::{DataSink, QuickDataSource, SharedDataSource};
    use std::sync::Arc;

    async fn empty(
        _config: ConfigurationView,
        _input: SharedDataSource,
        _sink: DataSink,
    ) -> PipelineResult<SharedDataSource> {
        Ok(Arc::new(QuickDataSource::default()))
    }

    #[test]
    fn with_builtins_expected_core_plugins_registered() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["emitter", "identity", "loader"]);
    }

    #[test]
    fn register_existing_name_expected_previous_plugin_returned() {
        let mut registry = PluginRegistry::new();
        assert!(registry.register("custom", Arc::new(empty)).is_none());
        assert!(registry.register("custom", Arc::new(empty)).is_some());
        assert!(registry.contains("custom"));
        assert!(registry.get("other").is_none());
    }
}
