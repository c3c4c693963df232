// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg, arg_array, arg_f64, arg_f64_or, arg_str, arg_str_or, function_table, require};
use crate::util::value::{deep_merge, get_path, is_truthy, set_path, sliceify, to_display};
use serde_json::{Map, Value, json};
use std::cmp::Ordering;

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "append" => append,
    "prepend" => prepend,
    "reverse" => reverse,
    "filterByKey" => filter_by_key,
    "sortByKey" => sort_by_key,
    "pluck" => pluck,
    "keys" => keys,
    "values" => values,
    "get" => get,
    "set" => set,
    "has" => has,
    "any" => any,
    "all" => all,
    "indexOf" => index_of,
    "slice" => slice,
    "uniq" => uniq,
    "flatten" => flatten,
    "compact" => compact,
    "first" => first,
    "rest" => rest,
    "last" => last,
    "count" => count,
    "sort" => sort,
    "rsort" => rsort,
    "sliceify" => sliceify_fn,
    "intersect" => intersect,
    "difference" => difference,
    "groupBy" => group_by,
    "head" => head,
    "tail" => tail,
    "chunks" => chunks,
    "coalesce" => coalesce,
    "merge" => merge,
    "diffuse" => diffuse,
];

/// Order values the way a person would: numbers numerically, everything else as text.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (crate::util::value::as_f64(a), crate::util::value::as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => to_display(a).cmp(&to_display(b)),
    }
}

fn append(args: &[Value]) -> Result<Value, String> {
    let mut items = arg_array(args, 0);
    items.extend(args.iter().skip(1).cloned());
    Ok(Value::Array(items))
}

fn prepend(args: &[Value]) -> Result<Value, String> {
    let mut items: Vec<Value> = args.iter().skip(1).cloned().collect();
    items.extend(arg_array(args, 0));
    Ok(Value::Array(items))
}

fn reverse(args: &[Value]) -> Result<Value, String> {
    Ok(match arg(args, 0) {
        Value::String(s) => json!(s.chars().rev().collect::<String>()),
        other => {
            let mut items = sliceify(other.clone());
            items.reverse();
            Value::Array(items)
        }
    })
}

fn filter_by_key(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let key = arg_str(args, 1);
    let expected = args.get(2);
    Ok(Value::Array(
        arg_array(args, 0)
            .into_iter()
            .filter(|item| match (get_path(item, &key), expected) {
                (Some(found), Some(expected)) => to_display(found) == to_display(expected),
                (Some(found), None) => is_truthy(found),
                (None, _) => false,
            })
            .collect(),
    ))
}

fn sort_by_key(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let key = arg_str(args, 1);
    let mut items = arg_array(args, 0);
    items.sort_by(|a, b| {
        compare_values(
            get_path(a, &key).unwrap_or(&Value::Null),
            get_path(b, &key).unwrap_or(&Value::Null),
        )
    });
    if is_truthy(arg(args, 2)) {
        items.reverse();
    }
    Ok(Value::Array(items))
}

fn pluck(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let key = arg_str(args, 1);
    Ok(Value::Array(
        arg_array(args, 0)
            .iter()
            .filter_map(|item| get_path(item, &key).cloned())
            .collect(),
    ))
}

fn keys(args: &[Value]) -> Result<Value, String> {
    Ok(match arg(args, 0) {
        Value::Object(map) => json!(map.keys().collect::<Vec<_>>()),
        Value::Array(items) => json!((0..items.len()).collect::<Vec<_>>()),
        _ => json!([]),
    })
}

fn values(args: &[Value]) -> Result<Value, String> {
    Ok(match arg(args, 0) {
        Value::Object(map) => Value::Array(map.values().cloned().collect()),
        Value::Array(items) => Value::Array(items.clone()),
        _ => json!([]),
    })
}

fn get(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    Ok(get_path(arg(args, 0), &arg_str(args, 1))
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| arg(args, 2).clone()))
}

fn set(args: &[Value]) -> Result<Value, String> {
    require(args, 3)?;
    let mut target = match arg(args, 0) {
        Value::Null => json!({}),
        other => other.clone(),
    };
    set_path(&mut target, &arg_str(args, 1), arg(args, 2).clone());
    Ok(target)
}

fn has(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    Ok(json!(get_path(arg(args, 0), &arg_str(args, 1)).is_some()))
}

fn any(args: &[Value]) -> Result<Value, String> {
    let haystack: Vec<String> = arg_array(args, 0).iter().map(to_display).collect();
    if args.len() < 2 {
        return Ok(json!(arg_array(args, 0).iter().any(is_truthy)));
    }
    Ok(json!(args[1..].iter().any(|needle| haystack.contains(&to_display(needle)))))
}

fn all(args: &[Value]) -> Result<Value, String> {
    let haystack: Vec<String> = arg_array(args, 0).iter().map(to_display).collect();
    if args.len() < 2 {
        return Ok(json!(arg_array(args, 0).iter().all(is_truthy)));
    }
    Ok(json!(args[1..].iter().all(|needle| haystack.contains(&to_display(needle)))))
}

fn index_of(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let needle = to_display(arg(args, 1));
    Ok(match arg(args, 0) {
        Value::String(s) => match s.find(&needle) {
            Some(byte) => json!(s[..byte].chars().count()),
            None => json!(-1),
        },
        other => match sliceify(other.clone()).iter().position(|v| to_display(v) == needle) {
            Some(index) => json!(index),
            None => json!(-1),
        },
    })
}

fn clamp_index(index: f64, len: usize) -> usize {
    let index = index as i64;
    let resolved = if index < 0 { len as i64 + index } else { index };
    resolved.clamp(0, len as i64) as usize
}

fn slice(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    match arg(args, 0) {
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let start = clamp_index(arg_f64(args, 1)?, chars.len());
            let end = clamp_index(arg_f64_or(args, 2, chars.len() as f64), chars.len());
            Ok(json!(chars[start..end.max(start)].iter().collect::<String>()))
        }
        other => {
            let items = sliceify(other.clone());
            let start = clamp_index(arg_f64(args, 1)?, items.len());
            let end = clamp_index(arg_f64_or(args, 2, items.len() as f64), items.len());
            Ok(Value::Array(items[start..end.max(start)].to_vec()))
        }
    }
}

fn uniq(args: &[Value]) -> Result<Value, String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for item in arg_array(args, 0) {
        if !seen.contains(&item) {
            seen.push(item.clone());
            out.push(item);
        }
    }
    Ok(Value::Array(out))
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|item| flatten_into(item, out)),
        other => out.push(other),
    }
}

fn flatten(args: &[Value]) -> Result<Value, String> {
    let mut out = Vec::new();
    flatten_into(arg(args, 0).clone(), &mut out);
    Ok(Value::Array(out))
}

fn compact(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Array(
        arg_array(args, 0)
            .into_iter()
            .filter(|item| match item {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(m) => !m.is_empty(),
                _ => true,
            })
            .collect(),
    ))
}

fn first(args: &[Value]) -> Result<Value, String> {
    Ok(match arg(args, 0) {
        Value::String(s) => s.chars().next().map(|c| json!(c.to_string())).unwrap_or(Value::Null),
        other => sliceify(other.clone()).into_iter().next().unwrap_or(Value::Null),
    })
}

fn rest(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Array(arg_array(args, 0).into_iter().skip(1).collect()))
}

fn last(args: &[Value]) -> Result<Value, String> {
    Ok(match arg(args, 0) {
        Value::String(s) => s.chars().last().map(|c| json!(c.to_string())).unwrap_or(Value::Null),
        other => sliceify(other.clone()).pop().unwrap_or(Value::Null),
    })
}

fn count(args: &[Value]) -> Result<Value, String> {
    Ok(json!(match arg(args, 0) {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 1,
    }))
}

fn sort(args: &[Value]) -> Result<Value, String> {
    let mut items = arg_array(args, 0);
    items.sort_by(compare_values);
    Ok(Value::Array(items))
}

fn rsort(args: &[Value]) -> Result<Value, String> {
    let mut items = arg_array(args, 0);
    items.sort_by(|a, b| compare_values(b, a));
    Ok(Value::Array(items))
}

fn sliceify_fn(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Array(arg_array(args, 0)))
}

fn intersect(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let other = arg_array(args, 1);
    let result = uniq(&[Value::Array(
        arg_array(args, 0).into_iter().filter(|v| other.contains(v)).collect(),
    )])?;
    Ok(result)
}

fn difference(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let other = arg_array(args, 1);
    Ok(Value::Array(
        arg_array(args, 0).into_iter().filter(|v| !other.contains(v)).collect(),
    ))
}

fn group_by(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let key = arg_str(args, 1);
    let mut groups = Map::new();
    for item in arg_array(args, 0) {
        let group = get_path(&item, &key).map(to_display).unwrap_or_default();
        if let Value::Array(members) = groups.entry(group).or_insert_with(|| json!([])) {
            members.push(item);
        }
    }
    Ok(Value::Object(groups))
}

fn head(args: &[Value]) -> Result<Value, String> {
    let n = arg_f64_or(args, 1, 1.0).max(0.0) as usize;
    Ok(Value::Array(arg_array(args, 0).into_iter().take(n).collect()))
}

fn tail(args: &[Value]) -> Result<Value, String> {
    let n = arg_f64_or(args, 1, 1.0).max(0.0) as usize;
    let items = arg_array(args, 0);
    let skip = items.len().saturating_sub(n);
    Ok(Value::Array(items.into_iter().skip(skip).collect()))
}

fn chunks(args: &[Value]) -> Result<Value, String> {
    let size = arg_f64(args, 1)?.max(1.0) as usize;
    Ok(Value::Array(
        arg_array(args, 0)
            .chunks(size)
            .map(|chunk| Value::Array(chunk.to_vec()))
            .collect(),
    ))
}

fn coalesce(args: &[Value]) -> Result<Value, String> {
    Ok(args
        .iter()
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
        .cloned()
        .unwrap_or(Value::Null))
}

fn merge(args: &[Value]) -> Result<Value, String> {
    let mut merged = json!({});
    for value in args {
        if value.is_object() {
            deep_merge(&mut merged, value.clone());
        }
    }
    Ok(merged)
}

/// Expand `{"a.b": 1}` into `{"a": {"b": 1}}`.
fn diffuse(args: &[Value]) -> Result<Value, String> {
    let separator = arg_str_or(args, 1, ".");
    let mut out = json!({});
    if let Value::Object(map) = arg(args, 0) {
        for (key, value) in map {
            let path = key.split(separator.as_str()).collect::<Vec<_>>().join(".");
            set_path(&mut out, &path, value.clone());
        }
    }
    Ok(out)
}
