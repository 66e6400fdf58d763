use crate::config::ConfigurationView;
use crate::errors::{PipelineError, PipelineResult};
use crate::graph::{PipelineGraph, build_pipeline};
use crate::message::{Channel, Message};
use crate::plugins::PluginRegistry;
use futures::future::{BoxFuture, FutureExt, Shared, join_all, try_join_all};
use quill_store::{FsDataSource, QuickDataSource, SharedDataSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type NodeTask = Shared<BoxFuture<'static, PipelineResult<SharedDataSource>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

impl RunOutcome {
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

/// Runs a pipeline graph. Each node becomes one memoized task that first
/// awaits its inputs, so dependency order emerges from the awaits alone.
pub struct PipelineScheduler {
    graph: PipelineGraph,
    plugins: Arc<PluginRegistry>,
    root_input: SharedDataSource,
    tasks: Mutex<HashMap<String, NodeTask>>,
}

impl PipelineScheduler {
    pub fn new(graph: PipelineGraph, plugins: Arc<PluginRegistry>, root_input: SharedDataSource) -> Arc<Self> {
        Arc::new(Self {
            graph,
            plugins,
            root_input,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Returns the task of node `name`, creating it on first request.
    pub fn task(self: &Arc<Self>, name: &str) -> PipelineResult<NodeTask> {
        let mut tasks = self.lock_tasks()?;
        if let Some(task) = tasks.get(name) {
            return Ok(task.clone());
        }
        let scheduler = Arc::clone(self);
        let node_name = name.to_string();
        let task = async move { scheduler.execute_node(node_name).await }
            .boxed()
            .shared();
        tasks.insert(name.to_string(), task.clone());
        Ok(task)
    }

    /// Schedules every node and waits for all of them. The first failure is
    /// returned, but only after every other task has settled.
    pub async fn run(self: &Arc<Self>) -> PipelineResult<()> {
        let tasks = self
            .graph
            .nodes
            .keys()
            .map(|name| self.task(name))
            .collect::<PipelineResult<Vec<_>>>()?;

        let strict = try_join_all(tasks.iter().cloned()).await;
        join_all(tasks).await;
        self.abandon();
        strict.map(|_| ())
    }

    /// Drops every scheduled task, cancelling those still pending.
    pub fn abandon(&self) {
        if let Ok(mut tasks) = self.lock_tasks() {
            tasks.clear();
        }
    }

    async fn execute_node(self: Arc<Self>, name: String) -> PipelineResult<SharedDataSource> {
        let node = self.graph.node(&name)?.clone();
        let config = self.graph.config_for(&node)?.clone();

        let input_tasks = node
            .input_names
            .iter()
            .map(|input| self.task(input))
            .collect::<PipelineResult<Vec<_>>>()?;
        let input_sources = try_join_all(input_tasks).await?;
        let input: SharedDataSource = if input_sources.is_empty() {
            Arc::clone(&self.root_input)
        } else {
            let mut handles = Vec::new();
            for source in input_sources {
                handles.extend(source.handles().await?);
            }
            Arc::new(QuickDataSource::new(handles))
        };
        let input_count = input.enumerate().await?.len();

        config.message(
            Message::new(Channel::Debug, format!("{name} - START inputs = {input_count}"))
                .with_plugin(&node.plugin_name),
        );
        tracing::debug!(node = %name, plugin = %node.plugin_name, inputs = input_count, "node started");

        let result = match self.plugins.get(&node.plugin_name) {
            Some(plugin) => {
                let sink = config.data_store().sink(node.output_artifact.clone());
                plugin.process(&config, input, sink).await
            }
            None => Err(PipelineError::PluginNotFound(node.plugin_name.clone())),
        };

        match result {
            Ok(output) => {
                config.message(
                    Message::new(Channel::Debug, format!("{name} - END")).with_plugin(&node.plugin_name),
                );
                tracing::debug!(node = %name, "node finished");
                Ok(output)
            }
            Err(err) if err.is_cancelled() => {
                config.message(
                    Message::new(Channel::Debug, format!("{name} - CANCELLED")).with_plugin(&node.plugin_name),
                );
                tracing::debug!(node = %name, "node cancelled");
                Err(err)
            }
            Err(err) => {
                config.message(
                    Message::new(Channel::Fatal, format!("{name} - FAILED")).with_plugin(&node.plugin_name),
                );
                config.message(Message::new(Channel::Fatal, err.to_string()).with_plugin(&node.plugin_name));
                tracing::warn!(node = %name, error = %err, "node failed");
                Err(err)
            }
        }
    }

    fn lock_tasks(&self) -> PipelineResult<MutexGuard<'_, HashMap<String, NodeTask>>> {
        self.tasks
            .lock()
            .map_err(|_| PipelineError::Configuration("scheduler task table poisoned".to_string()))
    }
}

/// Builds the graph for `config` and runs it against the configured input
/// files, racing the run against the configuration's cancellation token.
pub async fn run_pipeline(config: &ConfigurationView, plugins: Arc<PluginRegistry>) -> PipelineResult<RunOutcome> {
    let graph = build_pipeline(config)?;
    let root_input: SharedDataSource = Arc::new(FsDataSource::new(
        config.data_store().clone(),
        config.base_folder(),
        config.input_files(),
    ));
    let scheduler = PipelineScheduler::new(graph, plugins, root_input);
    let token = config.cancellation_token().clone();

    tracing::info!(nodes = scheduler.graph().len(), "pipeline run started");
    let result = tokio::select! {
        _ = token.cancelled() => Err(PipelineError::Cancelled),
        result = scheduler.run() => result,
    };
    scheduler.abandon();

    match result {
        Ok(()) => {
            tracing::info!("pipeline run completed");
            Ok(RunOutcome::Completed)
        }
        Err(PipelineError::Cancelled) => {
            tracing::info!("pipeline run cancelled");
            Ok(RunOutcome::Cancelled)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunServices;
    use crate::events::{RunEvent, RunEventSink, SharedRunEventObserver};
    use crate::plugins::SharedPlugin;
    use quill_store::DataSink;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_plugin(counter: Arc<AtomicUsize>) -> SharedPlugin {
        Arc::new(
            move |_config: ConfigurationView, input: SharedDataSource, _sink: DataSink| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, PipelineError>(input)
                }
            },
        )
    }

    fn failing_plugin() -> SharedPlugin {
        Arc::new(
            |_config: ConfigurationView, _input: SharedDataSource, _sink: DataSink| async move {
                Err::<SharedDataSource, _>(PipelineError::PluginFailed {
                    plugin: "broken".to_string(),
                    message: "boom".to_string(),
                })
            },
        )
    }

    fn scheduler_for(values: serde_json::Value, registry: PluginRegistry) -> Arc<PipelineScheduler> {
        let config = ConfigurationView::new(values).expect("config should build");
        let graph = build_pipeline(&config).expect("graph should build");
        PipelineScheduler::new(
            graph,
            Arc::new(registry),
            Arc::new(QuickDataSource::default()),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_shared_input_expected_plugin_executed_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register("source", counting_plugin(Arc::clone(&counter)));
        registry.register("identity", counting_plugin(Arc::new(AtomicUsize::new(0))));
        let scheduler = scheduler_for(
            json!({"pipeline": {
                "source": {},
                "left": {"input": "source", "plugin": "identity"},
                "right": {"input": "source", "plugin": "identity"},
            }}),
            registry,
        );

        scheduler.run().await.expect("run should succeed");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn task_requested_twice_expected_same_result() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register("source", counting_plugin(Arc::clone(&counter)));
        let scheduler = scheduler_for(json!({"pipeline": {"source": {}}}), registry);

        let first = scheduler.task("source").expect("task");
        let second = scheduler.task("source").expect("task");
        first.await.expect("first should succeed");
        second.await.expect("second should succeed");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_failing_node_expected_error_after_siblings_drained() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register("broken", failing_plugin());
        registry.register("healthy", counting_plugin(Arc::clone(&counter)));
        let scheduler = scheduler_for(
            json!({"pipeline": {"a": {"plugin": "broken"}, "b": {"plugin": "healthy"}}}),
            registry,
        );

        let error = scheduler.run().await.expect_err("run should fail");
        assert!(matches!(error, PipelineError::PluginFailed { .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_unknown_plugin_expected_plugin_not_found() {
        let scheduler = scheduler_for(json!({"pipeline": {"a": {"plugin": "nope"}}}), PluginRegistry::new());
        let error = scheduler.run().await.expect_err("run should fail");
        assert_eq!(error, PipelineError::PluginNotFound("nope".to_string()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_pipeline_cancelled_token_expected_cancelled_outcome() {
        let config = ConfigurationView::new(json!({"pipeline": {"wait": {}}})).expect("config");
        let mut registry = PluginRegistry::new();
        registry.register(
            "wait",
            Arc::new(
                |_config: ConfigurationView, input: SharedDataSource, _sink: DataSink| async move {
                    futures::future::pending::<()>().await;
                    Ok::<_, PipelineError>(input)
                },
            ),
        );
        config.cancellation_token().cancel();

        let outcome = run_pipeline(&config, Arc::new(registry))
            .await
            .expect("cancellation is not an error");
        assert_eq!(outcome, RunOutcome::Cancelled);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_node_cancelled_plugin_expected_no_fatal_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer_seen = Arc::clone(&seen);
        let observer: SharedRunEventObserver = Arc::new(move |event: &RunEvent| {
            if let RunEvent::Message(message) = event {
                observer_seen.lock().expect("observer lock").push(message.clone());
            }
        });
        let config = ConfigurationView::with_services(
            json!({"debug": true, "pipeline": {"a": {"plugin": "stopped"}}}),
            RunServices {
                events: RunEventSink::with_observer(observer),
                ..RunServices::default()
            },
        )
        .expect("config should build");
        let mut registry = PluginRegistry::new();
        registry.register(
            "stopped",
            Arc::new(
                |_config: ConfigurationView, _input: SharedDataSource, _sink: DataSink| async move {
                    Err::<SharedDataSource, _>(PipelineError::Cancelled)
                },
            ),
        );
        let graph = build_pipeline(&config).expect("graph should build");
        let scheduler = PipelineScheduler::new(graph, Arc::new(registry), Arc::new(QuickDataSource::default()));

        let error = scheduler.run().await.expect_err("run should stop");
        assert!(error.is_cancelled());
        let seen = seen.lock().expect("lock");
        assert!(seen.iter().all(|message| message.channel != Channel::Fatal));
        assert!(seen.iter().any(|message| message.channel == Channel::Debug && message.text == "a - CANCELLED"));
    }
}
