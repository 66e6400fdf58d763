use crate::diagnostics;
use crate::directives::Directive;
use crate::errors::{PipelineError, PipelineResult};
use crate::events::{RunEvent, RunEventSink};
use crate::message::{Artifact, Message};
use crate::suppression::Suppressor;
use quill_store::DataStore;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;

const MAX_MACRO_DEPTH: usize = 16;
const MACRO_PATTERN: &str = r"\$\(([^()\s]+)\)";

pub const DEFAULT_BASE_FOLDER: &str = ".";
pub const DEFAULT_OUTPUT_FOLDER: &str = "generated";

/// Run-wide collaborators shared by a view and every view derived from it.
#[derive(Clone, Debug, Default)]
pub struct RunServices {
    pub store: DataStore,
    pub events: RunEventSink,
    pub cancellation: CancellationToken,
}

#[derive(Debug)]
struct SharedState {
    services: RunServices,
    configuration_files: Mutex<BTreeMap<String, String>>,
}

#[derive(Debug)]
struct ViewState {
    values: Value,
    shared: Arc<SharedState>,
    suppressor: OnceLock<Suppressor>,
}

/// Immutable view over a merged configuration object. Nested views are new
/// values that share the run services of their parent.
#[derive(Clone, Debug)]
pub struct ConfigurationView {
    inner: Arc<ViewState>,
}

impl ConfigurationView {
    pub fn new(values: Value) -> PipelineResult<Self> {
        Self::with_services(values, RunServices::default())
    }

    pub fn with_services(values: Value, services: RunServices) -> PipelineResult<Self> {
        let values = match values {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(PipelineError::Configuration(format!(
                    "configuration root must be an object, found {}",
                    value_kind(&other)
                )));
            }
        };
        let shared = Arc::new(SharedState {
            services,
            configuration_files: Mutex::new(BTreeMap::new()),
        });
        Ok(Self::from_parts(values, shared))
    }

    pub fn from_yaml(source: &str) -> PipelineResult<Self> {
        Self::from_yaml_with_services(source, RunServices::default())
    }

    pub fn from_yaml_with_services(source: &str, services: RunServices) -> PipelineResult<Self> {
        let values: Value = serde_yaml::from_str(source)
            .map_err(|err| PipelineError::Configuration(format!("invalid YAML configuration: {err}")))?;
        Self::with_services(values, services)
    }

    fn from_parts(values: Value, shared: Arc<SharedState>) -> Self {
        Self {
            inner: Arc::new(ViewState {
                values,
                shared,
                suppressor: OnceLock::new(),
            }),
        }
    }

    fn derive(&self, values: Value) -> Self {
        Self::from_parts(values, Arc::clone(&self.inner.shared))
    }

    /// The merged configuration before macro expansion.
    pub fn raw(&self) -> &Value {
        &self.inner.values
    }

    /// Looks up a dotted key and expands `$(other.key)` macros in the result.
    pub fn resolve(&self, key: &str) -> PipelineResult<Option<Value>> {
        match lookup(&self.inner.values, key) {
            Some(value) => self.expand(value.clone(), 0).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.resolve(key).ok().flatten()? {
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.resolve(key) {
            Ok(Some(Value::Bool(flag))) => flag,
            Ok(Some(Value::String(text))) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// A string or list-of-strings value; other entries are ignored.
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        match self.resolve(key).ok().flatten() {
            Some(Value::String(text)) => vec![text],
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// One view per configuration instance found under `scope`.
    ///
    /// Arrays yield one view per element, `true` yields the current view
    /// unchanged, `false`/`null`/absent yield nothing and objects are
    /// overlaid on the current configuration.
    pub fn nested_configuration(&self, scope: &str) -> PipelineResult<Vec<ConfigurationView>> {
        let Some(value) = lookup(&self.inner.values, scope) else {
            return Ok(Vec::new());
        };
        let entries = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                Value::Bool(true) => views.push(self.derive(self.inner.values.clone())),
                Value::Bool(false) | Value::Null => {}
                Value::Object(_) => {
                    views.push(self.derive(merge(self.inner.values.clone(), entry.clone())));
                }
                other => {
                    return Err(PipelineError::InvalidScope {
                        scope: scope.to_string(),
                        reason: format!("expected an object or boolean, found {}", value_kind(other)),
                    });
                }
            }
        }
        Ok(views)
    }

    /// Directives in declaration order. Malformed entries are skipped.
    pub fn directives(&self) -> Vec<Directive> {
        let entries = match self.resolve("directive") {
            Ok(Some(Value::Array(items))) => items,
            Ok(Some(value @ Value::Object(_))) => vec![value],
            Ok(_) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "directives could not be resolved");
                Vec::new()
            }
        };
        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Directive>(entry) {
                Ok(directive) => Some(directive),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed directive");
                    None
                }
            })
            .collect()
    }

    pub fn debug_mode(&self) -> bool {
        self.get_bool("debug")
    }

    pub fn verbose_mode(&self) -> bool {
        self.get_bool("verbose")
    }

    pub fn base_folder(&self) -> PathBuf {
        PathBuf::from(
            self.get_str("base-folder")
                .unwrap_or_else(|| DEFAULT_BASE_FOLDER.to_string()),
        )
    }

    /// `output-folder`, relative to the base folder unless absolute.
    pub fn output_folder(&self) -> PathBuf {
        let output = self
            .get_str("output-folder")
            .unwrap_or_else(|| DEFAULT_OUTPUT_FOLDER.to_string());
        let output = Path::new(&output);
        if output.is_absolute() {
            output.to_path_buf()
        } else {
            self.base_folder().join(output)
        }
    }

    pub fn input_files(&self) -> Vec<String> {
        self.get_strings("input-file")
    }

    pub fn message_format(&self) -> Option<String> {
        self.get_str("message-format")
    }

    pub fn data_store(&self) -> &DataStore {
        &self.inner.shared.services.store
    }

    pub fn events(&self) -> &RunEventSink {
        &self.inner.shared.services.events
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.shared.services.cancellation
    }

    pub fn suppressor(&self) -> &Suppressor {
        self.inner
            .suppressor
            .get_or_init(|| Suppressor::new(&self.directives()))
    }

    /// Runs `message` through blame, suppression and formatting, then
    /// dispatches it to subscribers.
    pub fn message(&self, message: Message) {
        diagnostics::emit(self, message);
    }

    pub fn emit_artifact(&self, artifact: Artifact) {
        self.events().emit(RunEvent::Artifact(artifact));
    }

    pub fn update_configuration_file(&self, name: &str, content: &str) -> PipelineResult<()> {
        let mut files = self.configuration_files_lock()?;
        files.insert(name.to_string(), content.to_string());
        tracing::debug!(file = name, "configuration file updated");
        Ok(())
    }

    pub fn configuration_file(&self, name: &str) -> Option<String> {
        self.configuration_files_lock()
            .ok()
            .and_then(|files| files.get(name).cloned())
    }

    pub fn configuration_files(&self) -> BTreeMap<String, String> {
        self.configuration_files_lock()
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    fn configuration_files_lock(
        &self,
    ) -> PipelineResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.inner
            .shared
            .configuration_files
            .lock()
            .map_err(|_| PipelineError::Configuration("configuration file table poisoned".to_string()))
    }

    fn expand(&self, value: Value, depth: usize) -> PipelineResult<Value> {
        if depth > MAX_MACRO_DEPTH {
            return Err(PipelineError::Configuration(format!(
                "macro expansion exceeds {MAX_MACRO_DEPTH} levels"
            )));
        }
        match value {
            Value::String(text) => self.expand_text(text, depth),
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.expand(item, depth))
                .collect::<PipelineResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut expanded = Map::with_capacity(map.len());
                for (key, item) in map {
                    expanded.insert(key, self.expand(item, depth)?);
                }
                Ok(Value::Object(expanded))
            }
            other => Ok(other),
        }
    }

    fn expand_text(&self, text: String, depth: usize) -> PipelineResult<Value> {
        let pattern = macro_pattern()?;
        if !pattern.is_match(&text) {
            return Ok(Value::String(text));
        }

        // A macro spanning the whole string keeps the referenced value's type.
        if let Some(captures) = pattern.captures(&text) {
            let whole = captures.get(0).map(|m| m.as_str()).unwrap_or_default();
            if whole.len() == text.len() {
                let key = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                return match lookup(&self.inner.values, key) {
                    Some(value) => self.expand(value.clone(), depth + 1),
                    None => Ok(Value::String(text)),
                };
            }
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for captures in pattern.captures_iter(&text) {
            let (Some(whole), Some(key)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            out.push_str(&text[last..whole.start()]);
            match lookup(&self.inner.values, key.as_str()) {
                Some(value) => match self.expand(value.clone(), depth + 1)? {
                    Value::String(expanded) => out.push_str(&expanded),
                    other => out.push_str(&other.to_string()),
                },
                None => out.push_str(whole.as_str()),
            }
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(Value::String(out))
    }
}

fn macro_pattern() -> PipelineResult<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(MACRO_PATTERN).ok())
        .as_ref()
        .ok_or_else(|| PipelineError::Configuration("macro pattern failed to compile".to_string()))
}

/// Dotted lookup. Whole keys win over dotted splits, so keys that contain
/// dots stay addressable.
fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return Some(value);
    }
    match value {
        Value::Object(map) => map.get(key).or_else(|| {
            key.match_indices('.').find_map(|(at, _)| {
                map.get(&key[..at])
                    .and_then(|child| lookup(child, &key[at + 1..]))
            })
        }),
        Value::Array(items) => {
            let (head, rest) = key.split_once('.').unwrap_or((key, ""));
            let index = head.parse::<usize>().ok()?;
            lookup(items.get(index)?, rest)
        }
        _ => None,
    }
}

/// Recursively overlays `overlay` on `base`; non-object values in the
/// overlay replace the base value.
pub fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
