use crate::errors::ExtensionError;
use crate::plugin::ExternalPlugin;
use crate::process::{ExtensionCommand, ExtensionProcess};
use quill_pipeline::PluginRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Table of running extensions, keyed by extension name.
#[derive(Debug, Default)]
pub struct ExtensionManager {
    loaded: Mutex<BTreeMap<String, Arc<ExtensionProcess>>>,
}

impl ExtensionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live extension named `name`, spawning and handshaking a
    /// new one when there is none.
    pub async fn start(
        &self,
        name: &str,
        command: &ExtensionCommand,
        cancel: &CancellationToken,
    ) -> Result<Arc<ExtensionProcess>, ExtensionError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(existing) = loaded.get(name) {
            if existing.is_alive().await {
                return Ok(Arc::clone(existing));
            }
            tracing::warn!(extension = name, "replacing dead extension");
        }

        let process = ExtensionProcess::spawn(name, command)?;
        if let Err(err) = process.handshake(cancel).await {
            if let Err(kill_err) = process.kill().await {
                tracing::warn!(extension = name, error = %kill_err, "kill after failed handshake");
            }
            return Err(err);
        }
        loaded.insert(name.to_string(), Arc::clone(&process));
        Ok(process)
    }

    /// Tracks an extension that was connected by other means.
    pub async fn adopt(&self, process: Arc<ExtensionProcess>) -> Option<Arc<ExtensionProcess>> {
        self.loaded
            .lock()
            .await
            .insert(process.name().to_string(), process)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ExtensionProcess>> {
        self.loaded.lock().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.loaded.lock().await.keys().cloned().collect()
    }

    pub async fn live_count(&self) -> usize {
        let loaded = self.loaded.lock().await;
        let mut live = 0;
        for process in loaded.values() {
            if process.is_alive().await {
                live += 1;
            }
        }
        live
    }

    /// Kills every extension and empties the table.
    pub async fn kill_all(&self) {
        let drained = std::mem::take(&mut *self.loaded.lock().await);
        for (name, process) in drained {
            if let Err(err) = process.kill().await {
                tracing::warn!(extension = %name, error = %err, "failed to kill extension");
            }
        }
    }
}

/// Registers every plugin `process` advertises under its own name.
pub fn register_plugins(registry: &mut PluginRegistry, process: &Arc<ExtensionProcess>) {
    for plugin_name in process.plugin_names() {
        let plugin = ExternalPlugin::shared(Arc::clone(process), plugin_name.clone());
        if registry.register(plugin_name.clone(), plugin).is_some() {
            tracing::debug!(plugin = %plugin_name, extension = %process.name(), "plugin replaced");
        }
    }
}
