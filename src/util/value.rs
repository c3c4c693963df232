// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Helpers for treating `serde_json::Value` as a loosely-typed variant with
//! dot-path addressing.

use serde_json::{Map, Number, Value};

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|segment| !segment.is_empty())
}

pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments(path) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn get_path_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in segments(path) {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set `value` at `path`, creating intermediate objects (and replacing scalars) as needed.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = segments(path).collect();
    if parts.is_empty() {
        *root = value;
        return;
    }

    let mut current = root;
    for (index, segment) in parts.iter().enumerate() {
        let last = index == parts.len() - 1;

        if let Ok(position) = segment.parse::<usize>()
            && current
                .as_array()
                .is_some_and(|items| position < items.len())
        {
            let Value::Array(items) = current else {
                unreachable!()
            };
            if last {
                items[position] = value;
                return;
            }
            current = &mut items[position];
            continue;
        }

        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };

        if last {
            map.insert((*segment).to_string(), value);
            return;
        }
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

pub fn remove_path(root: &mut Value, path: &str) -> Option<Value> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (get_path_mut(root, parent)?, leaf),
        None => (root, path),
    };

    match parent {
        Value::Object(map) => map.remove(leaf),
        Value::Array(items) => {
            let position = leaf.parse::<usize>().ok()?;
            if position < items.len() {
                Some(items.remove(position))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Convert a string into the most specific scalar it represents.
pub fn autotype(input: &str) -> Value {
    let trimmed = input.trim();
    match trimmed {
        "" => return Value::String(input.to_string()),
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }

    if let Ok(int) = trimmed.parse::<i64>() {
        // keep leading zeros intact (zip codes, ids)
        if !(trimmed.len() > 1 && trimmed.starts_with('0')) {
            return Value::Number(int.into());
        }
    }
    if trimmed.contains('.')
        && let Ok(float) = trimmed.parse::<f64>()
        && let Some(number) = Number::from_f64(float)
    {
        return Value::Number(number);
    }

    Value::String(input.to_string())
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => {
            let lowered = text.trim().to_ascii_lowercase();
            !(lowered.is_empty()
                || lowered == "false"
                || lowered == "0"
                || lowered == "no"
                || lowered == "off")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a value the way a template would print it: strings unquoted, null empty.
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Produce a JSON number, preferring integers when the float is whole.
pub fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Number((value as i64).into())
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Recursively merge `overlay` into `base`; objects merge key-by-key, anything else is replaced.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Flatten nested objects into `a<sep>b` keyed scalars.
pub fn flatten(value: &Value, separator: &str) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, separator: &str, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let next = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}{}{}", prefix, separator, key)
                    };
                    walk(&next, child, separator, out);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    let next = if prefix.is_empty() {
                        index.to_string()
                    } else {
                        format!("{}{}{}", prefix, separator, index)
                    };
                    walk(&next, child, separator, out);
                }
            }
            other => out.push((prefix.to_string(), to_display(other))),
        }
    }

    let mut out = Vec::new();
    walk("", value, separator, &mut out);
    out
}

/// Convert an arbitrary name into `snake_case` ("Content-Type" and "contentType" become "content_type").
pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous_lower = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && previous_lower && !out.ends_with('_') {
                out.push('_');
            }
            previous_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch.to_ascii_lowercase());
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            previous_lower = false;
        }
    }

    out.trim_matches('_').to_string()
}

/// Environment-variable form of a name: `REQ_HEADER_` + `underscore(name).to_uppercase()`.
pub fn env_name(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, underscore(name).to_ascii_uppercase())
}

/// Wrap scalars into a one-element array, leave arrays alone, drop nulls.
pub fn sliceify(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_and_set_dotted_paths() {
        let mut root = json!({});
        set_path(&mut root, "a.b.c", json!(1));
        set_path(&mut root, "a.list", json!([1, 2, 3]));
        set_path(&mut root, "a.list.1", json!("two"));

        assert_eq!(get_path(&root, "a.b.c"), Some(&json!(1)));
        assert_eq!(get_path(&root, "a.list.1"), Some(&json!("two")));
        assert_eq!(get_path(&root, "a.missing"), None);
    }

    #[test]
    fn set_path_replaces_scalars_with_objects() {
        let mut root = json!({"a": 5});
        set_path(&mut root, "a.b", json!(true));
        assert_eq!(root, json!({"a": {"b": true}}));
    }

    #[test]
    fn remove_path_returns_removed_value() {
        let mut root = json!({"a": {"b": 1, "c": 2}});
        assert_eq!(remove_path(&mut root, "a.b"), Some(json!(1)));
        assert_eq!(root, json!({"a": {"c": 2}}));
    }

    #[test]
    fn autotype_detects_scalars() {
        assert_eq!(autotype("42"), json!(42));
        assert_eq!(autotype("4.5"), json!(4.5));
        assert_eq!(autotype("true"), json!(true));
        assert_eq!(autotype("0042"), json!("0042"));
        assert_eq!(autotype("hello"), json!("hello"));
    }

    #[test]
    fn underscore_handles_headers_and_camel_case() {
        assert_eq!(underscore("Content-Type"), "content_type");
        assert_eq!(underscore("userId"), "user_id");
        assert_eq!(underscore("X-CSRF-Token"), "x_csrf_token");
        assert_eq!(env_name("REQ_PARAM_", "pageSize"), "REQ_PARAM_PAGE_SIZE");
    }

    #[test]
    fn deep_merge_is_right_biased() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 1});
        deep_merge(&mut base, json!({"a": {"y": 3}, "c": 4}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}, "b": 1, "c": 4}));
    }

    #[test]
    fn flatten_joins_nested_keys() {
        let flat = flatten(&json!({"user": {"name": "a", "tags": ["x"]}}), "__");
        assert!(flat.contains(&("user__name".to_string(), "a".to_string())));
        assert!(flat.contains(&("user__tags__0".to_string(), "x".to_string())));
    }

    #[test]
    fn truthiness() {
        assert!(is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!("false")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&Value::Null));
        assert!(is_truthy(&json!([1])));
    }
}
