//! The message pipeline: gate, blame, range, suppress, format, dispatch.

use crate::config::ConfigurationView;
use crate::errors::PipelineResult;
use crate::events::RunEvent;
use crate::format::format_message;
use crate::message::{Channel, Message, Range, SourceLocation};
use quill_store::{Blame, JsonPath, StoreError, stringify_path};

const DEFAULT_RANGE_LENGTH: u32 = 3;

/// Result of tracing one source location back through the store.
#[derive(Clone, Debug, PartialEq)]
pub struct BlameOutcome {
    pub locations: Vec<SourceLocation>,
    pub attempts: usize,
    /// The shortened path that finally resolved, when shortening was needed.
    pub corrected_path: Option<JsonPath>,
    /// The last failure when no attempt resolved.
    pub failure: Option<StoreError>,
}

/// Resolves `source` to the original locations it was derived from.
///
/// A failing path is shortened and retried: a leading `$` is dropped first,
/// then the last segment on each further failure. A path of length `n` is
/// tried at most `n + 1` times before `source` is returned unchanged.
pub fn blame_source(blame: &dyn Blame, source: &SourceLocation) -> BlameOutcome {
    let mut position = source.position.clone();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match blame.blame(&source.document, &position) {
            Ok(tree) => {
                let corrected_path = (position.path != source.position.path)
                    .then(|| position.path.clone().unwrap_or_default());
                return BlameOutcome {
                    locations: tree
                        .leaves()
                        .into_iter()
                        .map(|leaf| SourceLocation::new(leaf.document.clone(), leaf.position.clone()))
                        .collect(),
                    attempts,
                    corrected_path,
                    failure: None,
                };
            }
            Err(error) => error,
        };

        let shortened = match position.path.as_mut() {
            Some(path) if !path.is_empty() => {
                if path[0].is_root() {
                    path.remove(0);
                } else {
                    path.pop();
                }
                true
            }
            _ => false,
        };
        if !shortened {
            return BlameOutcome {
                locations: vec![source.clone()],
                attempts,
                corrected_path: None,
                failure: Some(error),
            };
        }
    }
}

/// A display range starting at `source`, `length` columns wide (3 if unknown).
pub fn range_for(source: &SourceLocation) -> Range {
    let start = source.position.clone();
    let mut end = start.clone();
    if let Some(column) = start.column {
        end.column = Some(column + start.length.unwrap_or(DEFAULT_RANGE_LENGTH));
    }
    Range {
        document: source.document.clone(),
        start,
        end,
    }
}

pub fn emit(config: &ConfigurationView, mut message: Message) {
    let enabled = match message.channel {
        Channel::Debug => config.debug_mode(),
        Channel::Verbose => config.verbose_mode(),
        _ => true,
    };
    if !enabled {
        return;
    }

    if !message.source.is_empty() {
        let sources = std::mem::take(&mut message.source);
        message.source = resolve_sources(config, sources);
        message.range = message.source.iter().map(range_for).collect();
    }

    let Some(mut message) = config.suppressor().filter(message) else {
        tracing::debug!("message suppressed by directive");
        return;
    };

    let formatted = format_message(&message, config.message_format().as_deref());
    dispatch(config, message, formatted);
}

/// Publishes `message` with its rendering, or an Error-channel message
/// describing the formatting failure in its place.
fn dispatch(config: &ConfigurationView, mut message: Message, formatted: PipelineResult<String>) {
    match formatted {
        Ok(formatted) => {
            message.formatted_message = Some(formatted);
            config.events().emit(RunEvent::Message(message));
        }
        Err(err) => {
            tracing::warn!(error = %err, "message formatting failed");
            let text = format!("failed to format message '{}': {err}", message.text);
            let mut fallback = Message::new(Channel::Error, text.clone());
            fallback.plugin = message.plugin;
            fallback.formatted_message = Some(format!("ERROR: {text}"));
            config.events().emit(RunEvent::Message(fallback));
        }
    }
}

fn resolve_sources(config: &ConfigurationView, sources: Vec<SourceLocation>) -> Vec<SourceLocation> {
    let store = config.data_store();
    let mut resolved = Vec::with_capacity(sources.len());
    for source in sources {
        let outcome = blame_source(store, &source);
        if let Some(error) = &outcome.failure {
            emit(
                config,
                Message::new(
                    Channel::Warning,
                    format!(
                        "failed to blame '{}' at {}: {error}",
                        describe(config, &source.document),
                        source.position
                    ),
                ),
            );
        } else if let Some(path) = &outcome.corrected_path {
            let original = source
                .position
                .path
                .as_deref()
                .map(stringify_path)
                .unwrap_or_default();
            tracing::debug!(
                document = %source.document,
                from = %original,
                to = %stringify_path(path),
                "blame path corrected"
            );
            emit(
                config,
                Message::new(
                    Channel::Verbose,
                    format!(
                        "DEVELOPER WARNING: path '{original}' was corrected to '{}' while blaming '{}'",
                        stringify_path(path),
                        describe(config, &source.document)
                    ),
                ),
            );
        }
        resolved.extend(outcome.locations.into_iter().map(|location| SourceLocation {
            document: describe(config, &location.document),
            position: location.position,
        }));
    }
    resolved
}

fn describe(config: &ConfigurationView, document: &str) -> String {
    config
        .data_store()
        .description(document)
        .unwrap_or_else(|| document.to_string())
}
