//! `{{input.path}}` interpolation against the run's current data.
//!
//! Paths are resolved from a synthetic root `{ "input": <data> }`, so
//! `{{input.customer.name}}` reads `data.customer.name`. Tokens that do not
//! resolve are left untouched, which makes interpolation idempotent for them.
//! There is no escaping: a literal `{{` cannot be produced.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

/// Name of the single key in the synthetic interpolation root.
pub const ROOT_KEY: &str = "input";

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("token pattern is valid"));

/// Replace every resolvable token in `template`.
pub fn interpolate_str(template: &str, data: &Value) -> String {
    TOKEN
        .replace_all(template, |caps: &Captures| {
            let path = caps[1].trim();
            match resolve(data, path) {
                Some(value) => render(value),
                None => {
                    tracing::debug!(path, "template token left unresolved");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Interpolate the top-level string values of a node config.
/// Non-string values pass through unchanged.
pub fn interpolate_config(config: &Map<String, Value>, data: &Value) -> Map<String, Value> {
    config
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => Value::String(interpolate_str(s, data)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Interpolate every string inside a JSON tree.
pub fn interpolate_value(value: &Value, data: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, data)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(v, data)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, data)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve a dotted path against `{ "input": data }`.
pub fn resolve<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    if segments.next()? != ROOT_KEY {
        return None;
    }
    walk(data, segments)
}

/// Resolve a dotted path directly against `value`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    walk(value, path.split('.'))
}

fn walk<'a, 'p>(mut current: &'a Value, segments: impl Iterator<Item = &'p str>) -> Option<&'a Value> {
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String form used when a value is spliced into text.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
