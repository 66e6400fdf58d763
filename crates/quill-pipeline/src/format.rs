use crate::errors::{PipelineError, PipelineResult};
use crate::message::{Message, SourceLocation};
use quill_store::stringify_path;
use serde_json::Value;

pub const FORMAT_JSON: &str = "json";
pub const FORMAT_YAML: &str = "yaml";

/// Renders `message` in the style named by the `message-format` setting.
pub fn format_message(message: &Message, style: Option<&str>) -> PipelineResult<String> {
    match style {
        Some(FORMAT_JSON) => format_json(message),
        Some(FORMAT_YAML) => format_yaml(message),
        _ => Ok(format_human(message)),
    }
}

/// `document:line:column (path)`, omitting the parts the position lacks.
pub fn source_reference(source: &SourceLocation) -> String {
    let mut out = source.document.clone();
    if let Some(line) = source.position.line {
        out.push_str(&format!(":{line}"));
        if let Some(column) = source.position.column {
            out.push_str(&format!(":{column}"));
        }
    }
    if let Some(path) = source.position.path.as_deref() {
        out.push_str(&format!(" ({})", stringify_path(path)));
    }
    out
}

fn format_json(message: &Message) -> PipelineResult<String> {
    let mut value = match &message.details {
        Some(details) => details.clone(),
        None => serde_json::to_value(message).map_err(|err| PipelineError::Format(err.to_string()))?,
    };
    if let Value::Object(map) = &mut value {
        let sources = message.source.iter().map(source_reference).map(Value::String).collect();
        map.insert("sources".to_string(), Value::Array(sources));
    }
    serde_json::to_string_pretty(&value).map_err(|err| PipelineError::Format(err.to_string()))
}

fn format_yaml(message: &Message) -> PipelineResult<String> {
    let rendered = match &message.details {
        Some(details) => serde_yaml::to_string(details),
        None => serde_yaml::to_string(message),
    };
    rendered.map_err(|err| PipelineError::Format(err.to_string()))
}

fn format_human(message: &Message) -> String {
    let mut out = message.channel.as_str().to_ascii_uppercase();
    if !message.key.is_empty() {
        out.push_str(&format!(" ({})", message.key.join("/")));
    }
    out.push_str(": ");
    out.push_str(&message.text);
    for source in &message.source {
        out.push_str("\n    - ");
        out.push_str(&source_reference(source));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Channel;
    use quill_store::{Position, json_path};
    use serde_json::json;

    fn sample() -> Message {
        let mut position = Position::at(12, 4);
        position.path = Some(json_path(["paths", "/pets"]));
        Message::new(Channel::Warning, "operation has no id")
            .with_key(["R1001", "OperationId"])
            .with_source(SourceLocation::new("petstore.json", position))
    }

    #[test]
    fn format_default_expected_channel_keys_and_source_lines() {
        let text = format_message(&sample(), None).expect("format should succeed");
        assert_eq!(
            text,
            "WARNING (R1001/OperationId): operation has no id\n    - petstore.json:12:4 ($.paths['/pets'])"
        );
    }

    #[test]
    fn format_json_with_details_expected_sources_added() {
        let message = sample().with_details(json!({"code": "R1001"}));
        let text = format_message(&message, Some("json")).expect("format should succeed");
        let value: Value = serde_json::from_str(&text).expect("output should be JSON");
        assert_eq!(value["code"], "R1001");
        assert_eq!(value["sources"], json!(["petstore.json:12:4 ($.paths['/pets'])"]));
    }

    #[test]
    fn format_yaml_without_details_expected_message_fields() {
        let text = format_message(&sample(), Some("yaml")).expect("format should succeed");
        assert!(text.contains("Text: operation has no id"));
        assert!(text.contains("Channel: warning"));
    }
}
