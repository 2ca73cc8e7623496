//! Path evaluation against a JSON tree.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::parser::{parse_path, QueryError, Segment, SEPARATOR, WILDCARD};

/// Runtime values that predicate placeholders (`{name}`) resolve against.
pub trait Bindings {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// No bindings: every placeholder is unbound.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBindings;

impl Bindings for NoBindings {
    fn lookup(&self, _name: &str) -> Option<String> {
        None
    }
}

impl Bindings for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigPath {
    segments: Vec<Segment>,
}

impl ConfigPath {
    pub fn parse(path: &str) -> Result<Self, QueryError> {
        Ok(Self {
            segments: parse_path(path)?,
        })
    }

    /// The empty path, addressing the whole tree.
    pub fn root() -> Self {
        Self::default()
    }

    /// Evaluate against `tree`. `None` means nothing is at that path.
    pub fn resolve<'a>(&self, tree: &'a Value) -> Option<&'a Value> {
        self.resolve_with(tree, &NoBindings)
    }

    /// Evaluate against `tree`, substituting `{name}` predicate values from
    /// `bindings`.
    pub fn resolve_with<'a>(&self, tree: &'a Value, bindings: &dyn Bindings) -> Option<&'a Value> {
        let mut current = tree;
        for segment in &self.segments {
            current = match segment {
                Segment::Literal(key) => descend(current, key)?,
                Segment::Wildcard { key, value } => {
                    let wanted = substitute(value, bindings)?;
                    select(current, key, &wanted)?
                }
            };
        }
        Some(current)
    }
}

impl FromStr for ConfigPath {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            match segment {
                Segment::Literal(key) => write!(f, "{key}")?,
                Segment::Wildcard { key, value } => {
                    write!(f, "{}{}{}={}", WILDCARD, SEPARATOR, key, value)?
                }
            }
        }
        Ok(())
    }
}

/// Literal step: record key, or sequence index.
fn descend<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    let child = match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }?;
    // A present-but-null key reads the same as a missing one.
    (!child.is_null()).then_some(child)
}

/// Wildcard step: the first record in a sequence whose `key` field renders
/// to `wanted`. Records themselves cannot be wildcarded.
fn select<'a>(node: &'a Value, key: &str, wanted: &str) -> Option<&'a Value> {
    let Value::Array(items) = node else {
        return None;
    };
    items.iter().find(|item| {
        item.get(key)
            .and_then(render_scalar)
            .is_some_and(|field| field == wanted)
    })
}

/// String form used for predicate comparison. Containers and null never
/// compare equal to anything.
fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Replace a whole-value `{name}` placeholder with its binding.
fn substitute(value: &str, bindings: &dyn Bindings) -> Option<String> {
    match value
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(name) if !name.is_empty() => bindings.lookup(name),
        _ => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(path: &str, tree: &Value) -> Option<Value> {
        ConfigPath::parse(path).unwrap().resolve(tree).cloned()
    }

    #[test]
    fn test_literal_descent() {
        let tree = json!({"a": {"b": {"c": 42}}});

        assert_eq!(resolve("a/b/c", &tree), Some(json!(42)));
        assert_eq!(resolve("a/b/z", &tree), None);
        assert_eq!(resolve("a/b/c/d", &tree), None);
    }

    #[test]
    fn test_root_returns_whole_tree() {
        let tree = json!({"a": 1});
        assert_eq!(ConfigPath::root().resolve(&tree), Some(&tree));
        assert_eq!(resolve("", &tree), Some(tree.clone()));
    }

    #[test]
    fn test_wildcard_predicate() {
        let tree = json!({"items": [
            {"name": "foo", "value": 1},
            {"name": "bar", "value": 2}
        ]});

        assert_eq!(resolve("items/*/name=foo/value", &tree), Some(json!(1)));
        assert_eq!(resolve("items/*/name=bar/value", &tree), Some(json!(2)));
        assert_eq!(resolve("items/*/name=baz/value", &tree), None);
        assert_eq!(
            resolve("items/*/name=bar", &tree),
            Some(json!({"name": "bar", "value": 2}))
        );
    }

    #[test]
    fn test_wildcard_on_record_is_none() {
        let tree = json!({"items": {"first": {"name": "foo"}}});
        assert_eq!(resolve("items/*/name=foo", &tree), None);
    }

    #[test]
    fn test_wildcard_compares_as_strings() {
        let tree = json!([
            {"id": 7, "label": "seven"},
            {"id": true, "label": "yes"},
            {"id": null, "label": "nothing"}
        ]);

        assert_eq!(resolve("*/id=7/label", &tree), Some(json!("seven")));
        assert_eq!(resolve("*/id=true/label", &tree), Some(json!("yes")));
        assert_eq!(resolve("*/id=null/label", &tree), None);
    }

    #[test]
    fn test_first_match_wins() {
        let tree = json!([{"k": "x", "n": 1}, {"k": "x", "n": 2}]);
        assert_eq!(resolve("*/k=x/n", &tree), Some(json!(1)));
    }

    #[test]
    fn test_sequence_index_literal() {
        let tree = json!({"list": ["a", "b"]});
        assert_eq!(resolve("list/1", &tree), Some(json!("b")));
        assert_eq!(resolve("list/2", &tree), None);
        assert_eq!(resolve("list/x", &tree), None);
    }

    #[test]
    fn test_null_reads_as_missing() {
        let tree = json!({"a": null});
        assert_eq!(resolve("a", &tree), None);
    }

    #[test]
    fn test_placeholder_bindings() {
        let tree = json!({"routes": [
            {"name": "home", "layout": "wide"},
            {"name": "blog", "layout": "narrow"}
        ]});
        let path = ConfigPath::parse("routes/*/name={route}/layout").unwrap();
        let mut bindings: HashMap<String, String> = HashMap::new();

        assert_eq!(path.resolve_with(&tree, &bindings), None);

        bindings.insert("route".to_string(), "blog".to_string());
        assert_eq!(path.resolve_with(&tree, &bindings), Some(&json!("narrow")));
    }

    #[test]
    fn test_display_round_trips_source() {
        let source = "layout/routes/*/name=home/blocks";
        assert_eq!(ConfigPath::parse(source).unwrap().to_string(), source);
    }
}
