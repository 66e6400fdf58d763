//! Structural JSON-path queries matched against document paths.
//!
//! Supports `$`, `.name`, `['name']`, `[n]`, `*` and the `..` descendant
//! operator. A query matches a path when it selects that path or one of its
//! ancestors, so `$.paths` matches every location below `paths`.

use crate::errors::{PipelineError, PipelineResult};
use quill_store::PathComponent;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
    Descendant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathQuery {
    source: String,
    segments: Vec<Segment>,
}

impl PathQuery {
    pub fn parse(query: &str) -> PipelineResult<Self> {
        let trimmed = query.trim();
        let rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let chars: Vec<char> = rest.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        if !chars.is_empty() && chars[0] != '.' && chars[0] != '[' {
            let (name, next) = read_name(&chars, 0);
            segments.push(selector(&name));
            i = next;
        }

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    if chars.get(i) == Some(&'.') {
                        segments.push(Segment::Descendant);
                        i += 1;
                        if chars.get(i) == Some(&'[') {
                            continue;
                        }
                    }
                    let (name, next) = read_name(&chars, i);
                    if name.is_empty() {
                        return Err(invalid(query, "empty member name"));
                    }
                    segments.push(selector(&name));
                    i = next;
                }
                '[' => {
                    let close = find_close(&chars, i + 1).ok_or_else(|| invalid(query, "unclosed '['"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    segments.push(bracket_segment(inner.trim()).ok_or_else(|| {
                        invalid(query, &format!("unsupported selector '[{inner}]'"))
                    })?);
                    i = close + 1;
                }
                other => return Err(invalid(query, &format!("unexpected '{other}'"))),
            }
        }

        Ok(Self {
            source: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &[PathComponent]) -> bool {
        let path = match path.first() {
            Some(first) if first.is_root() => &path[1..],
            _ => path,
        };
        match_from(&self.segments, path)
    }
}

fn match_from(segments: &[Segment], path: &[PathComponent]) -> bool {
    let Some((head, tail)) = segments.split_first() else {
        return true;
    };
    if *head == Segment::Descendant {
        return (0..=path.len()).any(|skip| match_from(tail, &path[skip..]));
    }
    match path.split_first() {
        Some((component, rest)) => selects(head, component) && match_from(tail, rest),
        None => false,
    }
}

fn selects(segment: &Segment, component: &PathComponent) -> bool {
    match (segment, component) {
        (Segment::Wildcard, _) => true,
        (Segment::Key(key), PathComponent::Key(name)) => key == name,
        (Segment::Key(key), PathComponent::Index(index)) => *key == index.to_string(),
        (Segment::Index(index), PathComponent::Index(other)) => index == other,
        (Segment::Index(index), PathComponent::Key(name)) => index.to_string() == *name,
        (Segment::Descendant, _) => false,
    }
}

fn selector(name: &str) -> Segment {
    if name == "*" {
        Segment::Wildcard
    } else {
        Segment::Key(name.to_string())
    }
}

fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn find_close(chars: &[char], start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut i = start;
    while i < chars.len() {
        let ch = chars[i];
        match quote {
            Some(_) if ch == '\\' => i += 1,
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == ']' => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn bracket_segment(inner: &str) -> Option<Segment> {
    if inner == "*" {
        return Some(Segment::Wildcard);
    }
    if let Ok(index) = inner.parse::<usize>() {
        return Some(Segment::Index(index));
    }
    let quoted = inner
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')))?;
    Some(Segment::Key(quoted.replace("\\'", "'").replace("\\\"", "\"")))
}

fn invalid(query: &str, reason: &str) -> PipelineError {
    PipelineError::Configuration(format!("invalid JSON path '{query}': {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_store::json_path;

    fn query(text: &str) -> PathQuery {
        PathQuery::parse(text).expect("query should parse")
    }

    #[test]
    fn matches_exact_and_descendant_paths_expected_prefix_semantics() {
        let foo = query("$.foo");
        assert!(foo.matches(&json_path(["$", "foo"])));
        assert!(foo.matches(&json_path(["foo", "bar"])));
        assert!(!foo.matches(&json_path(["bar"])));
        assert!(!foo.matches(&[]));
    }

    #[test]
    fn matches_bracket_and_index_selectors_expected_match() {
        let q = query("$.paths['/pets/{id}'].get.parameters[0]");
        let path = vec![
            PathComponent::from("paths"),
            PathComponent::from("/pets/{id}"),
            PathComponent::from("get"),
            PathComponent::from("parameters"),
            PathComponent::from(0usize),
            PathComponent::from("name"),
        ];
        assert!(q.matches(&path));
        assert!(!query("$.paths['/pets'].get").matches(&path));
    }

    #[test]
    fn matches_wildcard_and_recursive_descent_expected_match() {
        let path = json_path(["definitions", "Pet", "properties", "name"]);
        assert!(query("$.definitions.*.properties").matches(&path));
        assert!(query("$..properties.name").matches(&path));
        assert!(query("$..['name']").matches(&path));
        assert!(!query("$..required").matches(&path));
    }

    #[test]
    fn parse_unclosed_bracket_expected_configuration_error() {
        let error = PathQuery::parse("$.a['b'").expect_err("unclosed bracket should fail");
        assert!(matches!(error, PipelineError::Configuration(_)));
    }

    #[test]
    fn parse_root_only_expected_matches_everything() {
        assert!(query("$").matches(&json_path(["anything"])));
    }
}
