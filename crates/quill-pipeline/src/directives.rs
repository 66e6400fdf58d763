use serde::{Deserialize, Serialize};

/// A configuration value written either as a single item or a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item.clone()],
            Self::Many(items) => items.clone(),
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// A user directive from the `directive` configuration key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<OneOrMany<String>>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_paths: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Directive {
    pub fn from(&self) -> Vec<String> {
        list(&self.from)
    }

    pub fn where_paths(&self) -> Vec<String> {
        list(&self.where_paths)
    }

    pub fn suppress(&self) -> Vec<String> {
        list(&self.suppress)
    }

    pub fn transform(&self) -> Vec<String> {
        list(&self.transform)
    }

    pub fn test(&self) -> Vec<String> {
        list(&self.test)
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

fn list(value: &Option<OneOrMany<String>>) -> Vec<String> {
    value.as_ref().map(OneOrMany::to_vec).unwrap_or_default()
}
