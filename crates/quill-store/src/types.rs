use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::store::{StoreError, StoreResult};

pub type DocumentKey = String;

/// One step of a JSON path. Numbers select array elements, strings select
/// object members; a leading `"$"` key marks the document root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathComponent {
    Index(usize),
    Key(String),
}

impl PathComponent {
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Key(key) if key == "$")
    }
}

impl From<&str> for PathComponent {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<String> for PathComponent {
    fn from(value: String) -> Self {
        Self::Key(value)
    }
}

impl From<usize> for PathComponent {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Key(key) => f.write_str(key),
        }
    }
}

pub type JsonPath = Vec<PathComponent>;

pub fn json_path<I, T>(parts: I) -> JsonPath
where
    I: IntoIterator<Item = T>,
    T: Into<PathComponent>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Renders a path as `$.a['b c'][0]`.
pub fn stringify_path(path: &[PathComponent]) -> String {
    let mut out = String::from("$");
    let parts = match path.first() {
        Some(first) if first.is_root() => &path[1..],
        _ => path,
    };
    for part in parts {
        match part {
            PathComponent::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
            PathComponent::Key(key) if is_identifier(key) => {
                out.push('.');
                out.push_str(key);
            }
            PathComponent::Key(key) => {
                out.push_str("['");
                out.push_str(&key.replace('\'', "\\'"));
                out.push_str("']");
            }
        }
    }
    out
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

/// A location inside a document: line/column, a JSON path, or both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<JsonPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

impl Position {
    pub fn at(line: u32, column: u32) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
            ..Self::default()
        }
    }

    pub fn with_path(path: JsonPath) -> Self {
        Self {
            path: Some(path),
            ..Self::default()
        }
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(line) = self.line {
            write!(f, "{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
            wrote = true;
        }
        if let Some(path) = self.path.as_deref() {
            if wrote {
                f.write_str(" ")?;
            }
            f.write_str(&stringify_path(path))?;
            wrote = true;
        }
        if !wrote {
            f.write_str("<unknown>")?;
        }
        Ok(())
    }
}

/// Maps a position in a generated document to a position in `source`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub generated: Position,
    pub original: Position,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Mapping {
    pub fn path_to_path(generated: JsonPath, source: impl Into<String>, original: JsonPath) -> Self {
        Self {
            generated: Position::with_path(generated),
            original: Position::with_path(original),
            source: source.into(),
            name: None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Document {
    pub key: DocumentKey,
    pub description: String,
    pub artifact_type: Option<String>,
    pub content: String,
    pub mappings: Vec<Mapping>,
    pub forwarded_from: Option<DocumentKey>,
}

/// Cheap, immutable reference to a stored document.
#[derive(Clone, Debug, PartialEq)]
pub struct DataHandle {
    inner: Arc<Document>,
}

impl DataHandle {
    pub(crate) fn new(document: Document) -> Self {
        Self {
            inner: Arc::new(document),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The friendly name shown to plugins and in diagnostics.
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn artifact_type(&self) -> Option<&str> {
        self.inner.artifact_type.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.inner.content
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.inner.mappings
    }

    pub fn forwarded_from(&self) -> Option<&str> {
        self.inner.forwarded_from.as_deref()
    }

    pub fn read_object(&self) -> StoreResult<Value> {
        serde_json::from_str(&self.inner.content)
            .map_err(|err| StoreError::Serialization(format!("{}: {err}", self.description())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringify_path_mixed_components_expected_bracket_notation_for_non_identifiers() {
        let path = json_path::<_, PathComponent>([
            "$".into(),
            "paths".into(),
            "/pets/{id}".into(),
            "get".into(),
            0usize.into(),
        ]);
        assert_eq!(stringify_path(&path), "$.paths['/pets/{id}'].get[0]");
    }

    #[test]
    fn stringify_path_empty_expected_root_marker() {
        assert_eq!(stringify_path(&[]), "$");
    }

    #[test]
    fn path_component_deserialize_number_expected_index() {
        let path: JsonPath = serde_json::from_str(r#"["a", 2, "b"]"#).expect("path should parse");
        assert_eq!(
            path,
            vec![
                PathComponent::Key("a".to_string()),
                PathComponent::Index(2),
                PathComponent::Key("b".to_string()),
            ]
        );
    }

    #[test]
    fn position_display_line_and_path_expected_both_rendered() {
        let position = Position {
            line: Some(3),
            column: Some(7),
            path: Some(json_path(["$", "info"])),
            length: None,
        };
        assert_eq!(position.to_string(), "3:7 $.info");
    }
}
