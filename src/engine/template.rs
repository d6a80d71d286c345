//! Placeholder templates for content bodies and output paths.

use crate::error::BuildError;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([\w.$]+)\}").expect("valid regex"));

/// Whether `s` contains a `{placeholder}` token.
pub fn is_template(s: &str) -> bool {
    PLACEHOLDER_RE.is_match(s)
}

/// Renders a template against JSON data
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, data: &Value) -> Result<String, BuildError>;
}

/// Substitutes `{a.b.c}` with the value at that dotted path.
///
/// Missing and null values render empty. Strings are inserted as-is, other values as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, data: &Value) -> Result<String, BuildError> {
        Ok(PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures| match lookup(data, &caps[1]) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .into_owned())
    }
}

/// Walk a dotted path through objects and arrays.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
