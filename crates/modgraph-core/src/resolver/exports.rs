//! Package.json `exports` / `imports` evaluation.
//!
//! Implements conditional subpath resolution:
//! - String, array and condition-object targets
//! - Exact subpath keys (`"./feature"`)
//! - Directory keys (`"./lib/"`) and single-`*` pattern keys (`"./*"`)
//! - Condition matching in the order keys appear in the package file
//!
//! The active condition set is the caller's list plus `default`. Object
//! targets take the first key (in declaration order) that is active.

use crate::config::DEV_PROD_CONDITION;
use serde_json::{Map, Value};

/// Why a subpath lookup produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// No key matches the requested subpath.
    Missing,
    /// A key matched, but none of its condition branches are active.
    NoConditionMatch,
    /// The selected target is not a valid package-relative path.
    InvalidTarget(String),
}

/// Build the ordered condition list for one request.
///
/// The `development|production` placeholder is replaced according to the
/// build mode; `require` or `import` is appended last.
#[must_use]
pub fn get_conditions(configured: &[String], is_production: bool, is_require: bool) -> Vec<String> {
    let mut conditions: Vec<String> = configured
        .iter()
        .map(|c| {
            if c == DEV_PROD_CONDITION {
                if is_production { "production" } else { "development" }.to_string()
            } else {
                c.clone()
            }
        })
        .collect();
    conditions.push(if is_require { "require" } else { "import" }.to_string());
    conditions
}

/// Resolve `subpath` (`"."` or `"./x"`) against an `exports` value.
///
/// Returns the package-relative target (`"./dist/x.js"`).
pub fn resolve_exports(
    exports: &Value,
    subpath: &str,
    conditions: &[String],
) -> Result<String, LookupError> {
    let normalized;
    let map = match exports {
        Value::Object(obj) if obj.keys().next().is_some_and(|k| k.starts_with('.')) => obj,
        other => {
            // String, array or root-level conditions: sugar for `{ ".": ... }`.
            let mut m = Map::new();
            m.insert(".".to_string(), other.clone());
            normalized = m;
            &normalized
        }
    };

    let target = walk(map, subpath, conditions)?;
    if !target.starts_with("./") || target.split('/').any(|segment| segment == "..") {
        return Err(LookupError::InvalidTarget(target));
    }
    Ok(target)
}

/// Resolve a `#`-prefixed specifier against an `imports` value.
///
/// Targets may be package-relative (`"./src/x.js"`) or bare (`"lodash"`).
pub fn resolve_imports(
    imports: &Value,
    specifier: &str,
    conditions: &[String],
) -> Result<String, LookupError> {
    let map = imports.as_object().ok_or(LookupError::Missing)?;
    let target = walk(map, specifier, conditions)?;
    if target.starts_with("./") && target.split('/').any(|segment| segment == "..") {
        return Err(LookupError::InvalidTarget(target));
    }
    Ok(target)
}

fn walk(map: &Map<String, Value>, entry: &str, conditions: &[String]) -> Result<String, LookupError> {
    let (value, replace) = match map.get(entry) {
        Some(v) => (v, None),
        None => {
            let (key, replace) = longest_match(map, entry).ok_or(LookupError::Missing)?;
            (&map[key], Some(replace))
        }
    };

    let target = select_target(value, conditions).ok_or(LookupError::NoConditionMatch)?;
    Ok(match replace {
        Some(rest) => inject(&target, &rest),
        None => target,
    })
}

/// The most specific directory (`"./lib/"`) or pattern (`"./lib/*.js"`) key
/// matching `entry`, with the text it captured.
///
/// Longer keys win. Among equal lengths, the later key wins.
fn longest_match<'a>(map: &'a Map<String, Value>, entry: &str) -> Option<(&'a str, String)> {
    let mut best: Option<(&str, String)> = None;

    for key in map.keys() {
        if best.as_ref().is_some_and(|(k, _)| key.len() < k.len()) {
            continue;
        }
        if key.ends_with('/') && entry.starts_with(key.as_str()) {
            best = Some((key, entry[key.len()..].to_string()));
        } else if key.len() > 1 {
            if let Some(captured) = match_pattern(key, entry) {
                best = Some((key, captured));
            }
        }
    }

    best
}

/// Match a single-`*` pattern key against an entry.
///
/// Returns the non-empty `*` capture.
fn match_pattern(pattern: &str, entry: &str) -> Option<String> {
    let star = pattern.get(1..)?.find('*')? + 1;
    let prefix = &pattern[..star];
    let suffix = &pattern[star + 1..];

    if entry.len() < prefix.len() + suffix.len() {
        return None;
    }
    if !entry.starts_with(prefix) || !entry.ends_with(suffix) {
        return None;
    }

    let captured = &entry[prefix.len()..entry.len() - suffix.len()];
    if captured.is_empty() {
        return None;
    }
    Some(captured.to_string())
}

/// Walk a target value: strings are final, arrays take their first
/// resolvable element, objects take their first active condition.
fn select_target(value: &Value, conditions: &[String]) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|item| select_target(item, conditions)),
        Value::Object(obj) => obj
            .iter()
            .find(|(key, _)| key.as_str() == "default" || conditions.iter().any(|c| c == *key))
            .and_then(|(_, nested)| select_target(nested, conditions)),
        _ => None,
    }
}

/// Substitute the captured text: every `*` in the target, or appended when
/// the target is a directory.
fn inject(target: &str, captured: &str) -> String {
    if target.contains('*') {
        target.replace('*', captured)
    } else if target.ends_with('/') {
        format!("{target}{captured}")
    } else {
        target.to_string()
    }
}
