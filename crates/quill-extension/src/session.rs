use crate::channel::{InboundHandler, lock};
use crate::errors::ExtensionError;
use crate::protocol::{
    GET_VALUE, LIST_INPUTS, MESSAGE, READ_FILE, RpcError, WRITE_FILE, optional_string_param,
    string_param,
};
use async_trait::async_trait;
use quill_pipeline::{Artifact, Channel, ConfigurationView, Message, PipelineError, SourceLocation};
use quill_store::{DataHandle, DataSink, Mapping, Position, SharedDataSource, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Outcome of one step of a file lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileLookup {
    Found(String),
    NotFound,
}

/// State of one `Process` call against an external plugin: its inputs, its
/// output sink, and the ordered queue of notifications it has sent.
pub struct SessionContext {
    id: String,
    plugin_name: String,
    config: ConfigurationView,
    inputs: Vec<DataHandle>,
    sink: DataSink,
    results: Mutex<Vec<DataHandle>>,
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl SessionContext {
    pub async fn open(
        plugin_name: &str,
        config: ConfigurationView,
        input: SharedDataSource,
        sink: DataSink,
    ) -> Result<Arc<Self>, ExtensionError> {
        let inputs = input.handles().await.map_err(PipelineError::from)?;
        let id = format!("session_{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(session = %id, plugin = plugin_name, inputs = inputs.len(), "session opened");
        Ok(Arc::new(Self {
            id,
            plugin_name: plugin_name.to_string(),
            config,
            inputs,
            sink,
            results: Mutex::new(Vec::new()),
            tail: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Documents written during the session, in delivery order.
    pub fn results(&self) -> Vec<DataHandle> {
        lock(&self.results).clone()
    }

    pub async fn read_file(&self, name: &str) -> Result<String, RpcError> {
        if let FileLookup::Found(content) = self.lookup_input(name) {
            return Ok(content);
        }
        match lookup_output_folder(&self.config.output_folder(), name).await {
            FileLookup::Found(content) => Ok(content),
            FileLookup::NotFound => Err(RpcError::internal(
                StoreError::NotFound(name.to_string()).to_string(),
            )),
        }
    }

    /// Evaluation errors read as `null`.
    pub fn get_value(&self, key: &str) -> Value {
        match self.config.resolve(key) {
            Ok(Some(value)) => value,
            Ok(None) => Value::Null,
            Err(err) => {
                tracing::debug!(session = %self.id, key, error = %err, "value lookup failed");
                Value::Null
            }
        }
    }

    pub async fn list_inputs(&self, artifact_type: Option<&str>) -> Vec<String> {
        let names: Vec<String> = self
            .inputs
            .iter()
            .filter(|handle| artifact_type.is_none() || handle.artifact_type() == artifact_type)
            .map(|handle| handle.description().to_string())
            .collect();
        match artifact_type {
            Some(artifact_type) if names.is_empty() => {
                staged_outputs(self.config.output_folder(), artifact_type.to_string()).await
            }
            _ => names,
        }
    }

    pub fn write_file(&self, name: &str, content: &str, source_map: Vec<Mapping>) {
        let mappings = self.translate_mappings(source_map);
        match self.sink.write_data(name, content, None, mappings) {
            Ok(handle) => lock(&self.results).push(handle),
            Err(err) => self.report_failure(format!("cannot write '{name}': {err}")),
        }
    }

    pub fn message(&self, mut message: Message, position: Option<Position>, source_file: Option<String>) {
        match message.channel {
            Channel::File => match artifact_details(&message) {
                Some(artifact) => {
                    let mappings = self.translate_mappings(artifact.source_map);
                    let artifact_type = Some(artifact.artifact_type.as_str()).filter(|t| !t.is_empty());
                    match self
                        .sink
                        .write_data(&artifact.uri, artifact.content, artifact_type, mappings)
                    {
                        Ok(handle) => lock(&self.results).push(handle),
                        Err(err) => self.report_failure(format!("cannot write '{}': {err}", artifact.uri)),
                    }
                }
                None => self.report_failure("file message without an artifact".to_string()),
            },
            Channel::Configuration => match artifact_details(&message) {
                Some(artifact) => {
                    if let Err(err) = self.config.update_configuration_file(&artifact.uri, &artifact.content) {
                        self.report_failure(err.to_string());
                    }
                }
                None => self.report_failure("configuration message without a file".to_string()),
            },
            _ => {
                if message.source.is_empty() && (position.is_some() || source_file.is_some()) {
                    let document = source_file.unwrap_or_default();
                    message
                        .source
                        .push(SourceLocation::new(document, position.unwrap_or_default()));
                }
                for source in &mut message.source {
                    source.document = self.key_for(&source.document);
                }
                if message.plugin.is_none() {
                    message.plugin = Some(self.plugin_name.clone());
                }
                self.config.message(message);
            }
        }
    }

    /// Runs `work` after every previously enqueued notification has settled.
    pub fn enqueue<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let previous = lock(&self.tail).replace(done_rx);
        tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            work.await;
            let _ = done_tx.send(());
        });
    }

    /// Waits for the last enqueued notification, and so for all of them.
    pub async fn finish_notifications(&self) {
        let tail = lock(&self.tail).take();
        if let Some(tail) = tail {
            let _ = tail.await;
        }
    }

    fn lookup_input(&self, name: &str) -> FileLookup {
        self.find_input(name)
            .map(|handle| FileLookup::Found(handle.content().to_string()))
            .unwrap_or(FileLookup::NotFound)
    }

    /// Exact friendly-name match first, then a case and escaping insensitive one.
    fn find_input(&self, name: &str) -> Option<&DataHandle> {
        self.inputs
            .iter()
            .find(|handle| handle.description() == name || handle.key() == name)
            .or_else(|| {
                let wanted = normalize_name(name);
                self.inputs
                    .iter()
                    .find(|handle| normalize_name(handle.description()) == wanted)
            })
    }

    fn key_for(&self, friendly: &str) -> String {
        self.find_input(friendly)
            .map(|handle| handle.key().to_string())
            .unwrap_or_else(|| friendly.to_string())
    }

    fn translate_mappings(&self, mappings: Vec<Mapping>) -> Vec<Mapping> {
        mappings
            .into_iter()
            .map(|mut mapping| {
                mapping.source = self.key_for(&mapping.source);
                mapping
            })
            .collect()
    }

    fn report_failure(&self, text: String) {
        tracing::warn!(session = %self.id, plugin = %self.plugin_name, "{text}");
        self.config
            .message(Message::new(Channel::Error, text).with_plugin(&self.plugin_name));
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("plugin_name", &self.plugin_name)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

/// Live sessions of one extension, keyed by session id. Inbound calls are
/// routed to the session named by their first parameter.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Arc<SessionContext>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<SessionContext>) {
        lock(&self.sessions).insert(session.id().to_string(), session);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionContext>> {
        lock(&self.sessions).remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionContext>> {
        lock(&self.sessions).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn session_for(&self, params: &[Value]) -> Result<Arc<SessionContext>, RpcError> {
        let id = string_param(params, 0)?;
        self.get(&id)
            .ok_or_else(|| RpcError::invalid_params(format!("unknown session '{id}'")))
    }
}

#[async_trait]
impl InboundHandler for SessionTable {
    async fn handle_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        if ![READ_FILE, GET_VALUE, LIST_INPUTS].contains(&method) {
            return Err(RpcError::method_not_found(method));
        }
        let session = self.session_for(&params)?;
        match method {
            READ_FILE => {
                let name = string_param(&params, 1)?;
                session.read_file(&name).await.map(Value::String)
            }
            GET_VALUE => Ok(session.get_value(&string_param(&params, 1)?)),
            _ => {
                let artifact_type = optional_string_param(&params, 1);
                let names = session.list_inputs(artifact_type.as_deref()).await;
                Ok(Value::from(names))
            }
        }
    }

    async fn handle_notification(&self, method: &str, params: Vec<Value>) {
        let session = match self.session_for(&params) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(method, error = %err.message, "dropping notification");
                return;
            }
        };
        match method {
            WRITE_FILE => {
                let (Ok(name), Ok(content)) = (string_param(&params, 1), string_param(&params, 2)) else {
                    tracing::warn!(session = %session.id(), "WriteFile without a name and content");
                    return;
                };
                let source_map = params
                    .get(3)
                    .cloned()
                    .filter(|value| !value.is_null())
                    .and_then(|value| serde_json::from_value::<Vec<Mapping>>(value).ok())
                    .unwrap_or_default();
                let target = Arc::clone(&session);
                session.enqueue(async move { target.write_file(&name, &content, source_map) });
            }
            MESSAGE => {
                let message = params
                    .get(1)
                    .cloned()
                    .map(serde_json::from_value::<Message>);
                let Some(Ok(message)) = message else {
                    tracing::warn!(session = %session.id(), "Message without a valid message body");
                    return;
                };
                let position = params
                    .get(2)
                    .cloned()
                    .filter(|value| !value.is_null())
                    .and_then(|value| serde_json::from_value::<Position>(value).ok());
                let source_file = optional_string_param(&params, 3);
                let target = Arc::clone(&session);
                session.enqueue(async move { target.message(message, position, source_file) });
            }
            other => tracing::warn!(method = other, "dropping unknown notification"),
        }
    }
}

fn artifact_details(message: &Message) -> Option<Artifact> {
    message
        .details
        .clone()
        .and_then(|details| serde_json::from_value(details).ok())
}

/// Reads `name` from the output folder. Names that would leave the folder
/// are never found.
pub async fn lookup_output_folder(output_folder: &Path, name: &str) -> FileLookup {
    let Some(path) = contained_path(output_folder, name) else {
        return FileLookup::NotFound;
    };
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => FileLookup::Found(content),
        Err(_) => FileLookup::NotFound,
    }
}

fn contained_path(folder: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name.trim_start_matches('/'));
    relative
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        .then(|| folder.join(relative))
}

/// Files under `output_folder/<artifact_type>`, named relative to the output
/// folder with `/` separators.
async fn staged_outputs(output_folder: PathBuf, artifact_type: String) -> Vec<String> {
    let Some(root) = contained_path(&output_folder, &artifact_type) else {
        return Vec::new();
    };
    let listed = tokio::task::spawn_blocking(move || {
        let mut names: Vec<String> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&output_folder)
                    .ok()
                    .map(|relative| {
                        relative
                            .components()
                            .map(|component| component.as_os_str().to_string_lossy().into_owned())
                            .collect::<Vec<_>>()
                            .join("/")
                    })
            })
            .collect();
        names.sort();
        names
    })
    .await;
    listed.unwrap_or_default()
}

fn normalize_name(name: &str) -> String {
    percent_decode(name).replace('\\', "/").to_lowercase()
}

pub fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let escaped = std::str::from_utf8(&bytes[index + 1..index + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = escaped {
                decoded.push(byte);
                index += 3;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
