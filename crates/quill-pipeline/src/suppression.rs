use crate::directives::Directive;
use crate::jsonpath::PathQuery;
use crate::message::{Message, SourceLocation};

#[derive(Debug)]
struct SuppressionRule {
    keys: Vec<String>,
    from: Vec<String>,
    where_queries: Option<Vec<PathQuery>>,
}

impl SuppressionRule {
    fn applies_to(&self, message_keys: &[String]) -> bool {
        message_keys
            .iter()
            .any(|key| self.keys.iter().any(|rule| rule.eq_ignore_ascii_case(key)))
    }

    fn covers(&self, source: &SourceLocation) -> bool {
        let document = source.document.to_ascii_lowercase();
        let from_matches = self.from.is_empty() || self.from.iter().any(|suffix| document.ends_with(suffix));
        if !from_matches {
            return false;
        }
        match &self.where_queries {
            None => true,
            Some(queries) => source
                .position
                .path
                .as_deref()
                .is_some_and(|path| queries.iter().any(|query| query.matches(path))),
        }
    }
}

/// Removes suppressed source locations from messages, dropping messages
/// left without any.
#[derive(Debug, Default)]
pub struct Suppressor {
    rules: Vec<SuppressionRule>,
}

impl Suppressor {
    pub fn new(directives: &[Directive]) -> Self {
        let rules = directives
            .iter()
            .filter(|directive| !directive.suppress().is_empty())
            .map(|directive| SuppressionRule {
                keys: directive.suppress(),
                from: directive
                    .from()
                    .iter()
                    .map(|suffix| suffix.to_ascii_lowercase())
                    .collect(),
                where_queries: directive.where_paths.as_ref().map(|_| {
                    directive
                        .where_paths()
                        .iter()
                        .filter_map(|query| match PathQuery::parse(query) {
                            Ok(query) => Some(query),
                            Err(err) => {
                                tracing::warn!(error = %err, "ignoring unparsable suppression path");
                                None
                            }
                        })
                        .collect()
                }),
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `None` when every source of the message was suppressed.
    pub fn filter(&self, mut message: Message) -> Option<Message> {
        if message.key.is_empty() || message.source.is_empty() {
            return Some(message);
        }

        for rule in &self.rules {
            if rule.applies_to(&message.key) {
                message.source.retain(|source| !rule.covers(source));
            }
        }

        if message.source.is_empty() {
            return None;
        }
        let remaining = &message.source;
        message.range.retain(|range| {
            remaining
                .iter()
                .any(|source| source.document == range.document && source.position == range.start)
        });
        Some(message)
    }
}
