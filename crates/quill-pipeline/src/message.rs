use quill_store::{Mapping, Position};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Information,
    Warning,
    Error,
    Debug,
    Verbose,
    Fatal,
    Hint,
    File,
    Configuration,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Debug => "debug",
            Self::Verbose => "verbose",
            Self::Fatal => "fatal",
            Self::Hint => "hint",
            Self::File => "file",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub document: String,
    #[serde(rename = "Position")]
    pub position: Position,
}

impl SourceLocation {
    pub fn new(document: impl Into<String>, position: Position) -> Self {
        Self {
            document: document.into(),
            position,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub document: String,
    pub start: Position,
    pub end: Position,
}

/// A diagnostic travelling through the message pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<SourceLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub range: Vec<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_message: Option<String>,
}

impl Message {
    pub fn new(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_key<I, S>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = key.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: SourceLocation) -> Self {
        self.source.push(source);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }
}

/// A generated file handed to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub uri: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub content: String,
    #[serde(default, rename = "sourceMap", skip_serializing_if = "Vec::is_empty")]
    pub source_map: Vec<Mapping>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_serialization_expected_pascal_case_fields() {
        let message = Message::new(Channel::Warning, "careful")
            .with_key(["x", "y"])
            .with_source(SourceLocation::new("doc.json", Position::at(1, 2)));
        let value = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(
            value,
            json!({
                "Channel": "warning",
                "Text": "careful",
                "Key": ["x", "y"],
                "Source": [{"document": "doc.json", "Position": {"line": 1, "column": 2}}],
            })
        );
    }

    #[test]
    fn message_deserialization_missing_fields_expected_defaults() {
        let message: Message =
            serde_json::from_value(json!({"Text": "hi"})).expect("message should parse");
        assert_eq!(message.channel, Channel::Information);
        assert!(message.key.is_empty());
        assert!(message.source.is_empty());
    }
}
