use quill_extension::{Engine, ExtensionCommand, ExtensionState};
use quill_pipeline::{
    Channel, ConfigurationView, PipelineError, RunEvent, RunEventSink, RunOutcome, RunServices,
    SharedRunEventObserver,
};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const SAMPLE_EXTENSION: &str = env!("CARGO_BIN_EXE_quill-sample-extension");

fn pipeline_config(base: &Path, plugin: &str, seen: Arc<Mutex<Vec<RunEvent>>>) -> ConfigurationView {
    let observer: SharedRunEventObserver = Arc::new(move |event: &RunEvent| {
        seen.lock().expect("observer lock").push(event.clone());
    });
    ConfigurationView::with_services(
        json!({
            "base-folder": base.to_string_lossy(),
            "input-file": ["a.json", "b.json"],
            "extensions": {"sample": {"command": SAMPLE_EXTENSION}},
            "pipeline": {
                "loader": {},
                "transform": {"input": "loader", "plugin": plugin},
                "emitter": {"input": "transform"},
            },
        }),
        RunServices {
            events: RunEventSink::with_observer(observer),
            ..RunServices::default()
        },
    )
    .expect("config should build")
}

fn write_inputs(base: &Path) {
    std::fs::write(base.join("a.json"), r#"{"title":"alpha"}"#).expect("write a");
    std::fs::write(base.join("b.json"), r#"{"title":"beta"}"#).expect("write b");
}

#[tokio::test(flavor = "current_thread")]
async fn run_shout_extension_expected_uppercased_outputs() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    write_inputs(temp.path());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let config = pipeline_config(temp.path(), "shout", Arc::clone(&seen));

    let engine = Engine::new();
    let outcome = engine.run(&config).await.expect("run should succeed");
    assert_eq!(outcome, RunOutcome::Completed);

    let a = std::fs::read_to_string(temp.path().join("generated/a.json")).expect("a emitted");
    let b = std::fs::read_to_string(temp.path().join("generated/b.json")).expect("b emitted");
    assert_eq!(a, r#"{"TITLE":"ALPHA"}"#);
    assert_eq!(b, r#"{"TITLE":"BETA"}"#);

    let processed: Vec<String> = seen
        .lock()
        .expect("lock")
        .iter()
        .filter_map(|event| match event {
            RunEvent::Message(message) if message.channel == Channel::Information => {
                Some(message.text.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(processed, vec!["shout processed a.json", "shout processed b.json"]);
    engine.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn shutdown_after_run_expected_no_live_processes_and_rerun_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    write_inputs(temp.path());
    let config = pipeline_config(temp.path(), "echo", Arc::new(Mutex::new(Vec::new())));

    let engine = Engine::new();
    engine.run(&config).await.expect("first run should succeed");
    let process = engine.manager().get("sample").await.expect("extension loaded");
    assert!(engine.registry().contains("echo"));
    assert_eq!(engine.manager().live_count().await, 1);

    engine.shutdown().await;
    assert_eq!(process.state(), ExtensionState::Killed);
    assert!(!process.is_alive().await);
    assert_eq!(engine.manager().live_count().await, 0);
    assert!(!engine.registry().contains("echo"));
    assert!(engine.registry().contains("loader"));

    std::fs::remove_dir_all(temp.path().join("generated")).expect("clear outputs");
    let outcome = engine.run(&config).await.expect("second run should succeed");
    assert_eq!(outcome, RunOutcome::Completed);
    let a = std::fs::read_to_string(temp.path().join("generated/a.json")).expect("a emitted");
    assert_eq!(serde_json::from_str::<Value>(&a).expect("json"), json!({"title": "alpha"}));
    let respawned = engine.manager().get("sample").await.expect("extension reloaded");
    assert!(!Arc::ptr_eq(&process, &respawned));
    engine.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn run_fail_extension_expected_plugin_failed_error() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    write_inputs(temp.path());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let config = pipeline_config(temp.path(), "fail", Arc::clone(&seen));

    let engine = Engine::new();
    let error = engine.run(&config).await.expect_err("fail plugin should fail the run");
    assert!(matches!(error, PipelineError::PluginFailed { ref plugin, .. } if plugin == "fail"));

    let events = seen.lock().expect("lock");
    assert!(events.iter().any(|event| matches!(
        event,
        RunEvent::Message(message) if message.channel == Channel::Error && message.key == vec!["AlwaysFails"]
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        RunEvent::Message(message) if message.channel == Channel::Fatal && message.text == "transform - FAILED"
    )));
    drop(events);
    engine.shutdown().await;
}

#[tokio::test(flavor = "current_thread")]
async fn load_extension_twice_expected_same_process() {
    let engine = Engine::new();
    let command = ExtensionCommand::new(SAMPLE_EXTENSION);
    let token = CancellationToken::new();

    let first = engine
        .load_extension("sample", &command, &token)
        .await
        .expect("first load");
    let second = engine
        .load_extension("sample", &command, &token)
        .await
        .expect("second load");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.plugin_names(), vec!["echo", "shout", "fail"]);
    engine.shutdown().await;
}
