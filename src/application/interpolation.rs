// Template variable substitution for panel queries
use crate::domain::dashboard::TimeRange;
use chrono::SecondsFormat;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}")
        .unwrap_or_else(|e| panic!("invalid placeholder pattern: {e}"))
});

const TIME_RANGE_VAR: &str = "timeRange";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved variable(s): {}", .missing.join(", "))]
pub struct InterpolationError {
    pub missing: Vec<String>,
}

/// Names referenced by `${...}` placeholders, in order of first appearance.
pub fn placeholders(query: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(query) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Replace every `${name}` (or `${name.field}`) in `query` with the stringified
/// variable value. Any placeholder that cannot be resolved fails the whole
/// query; nothing is left as literal text or blanked out.
pub fn prepare_query(
    query: &str,
    vars: &BTreeMap<String, Value>,
    time_range: Option<&TimeRange>,
) -> Result<String, InterpolationError> {
    let mut result = String::with_capacity(query.len());
    let mut missing: Vec<String> = Vec::new();
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(query) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];
        result.push_str(&query[last..whole.start()]);
        last = whole.end();

        match resolve(name, vars, time_range) {
            Some(value) => result.push_str(&value),
            None => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
            }
        }
    }
    result.push_str(&query[last..]);

    if missing.is_empty() {
        Ok(result)
    } else {
        Err(InterpolationError { missing })
    }
}

/// The subset of `vars` a query actually references (by root name).
pub fn referenced_variables(query: &str, vars: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    placeholders(query)
        .iter()
        .filter_map(|name| {
            let root = name.split('.').next().unwrap_or(name);
            vars.get(root).map(|v| (root.to_string(), v.clone()))
        })
        .collect()
}

fn resolve(name: &str, vars: &BTreeMap<String, Value>, time_range: Option<&TimeRange>) -> Option<String> {
    let mut parts = name.split('.');
    let root = parts.next()?;

    let Some(mut current) = vars.get(root) else {
        return resolve_builtin(name, time_range);
    };
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(stringify(current))
}

fn resolve_builtin(name: &str, time_range: Option<&TimeRange>) -> Option<String> {
    let range = time_range?;
    let format = |t: &chrono::DateTime<chrono::Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
    match name.strip_prefix(TIME_RANGE_VAR)? {
        ".start" => Some(format(&range.start)),
        ".end" => Some(format(&range.end)),
        _ => None,
    }
}

/// Textual form of a variable value inside a query.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}
