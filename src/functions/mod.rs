// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Helper functions available to every template.
//!
//! Each family exports a table of plain functions over JSON values. Every entry is registered as a
//! global function and, unless the name would shadow a built-in filter, as a filter whose input
//! becomes the first argument.

use minijinja::value::Rest;
use minijinja::{Environment, Error, ErrorKind, Value};
use serde_json::Value as JsonValue;

pub mod codecs;
pub mod collections;
pub mod color;
pub mod compare;
pub mod crypto;
pub mod lang;
pub mod math;
pub mod path;
pub mod request;
pub mod string;
pub mod time;
pub mod types;

pub type TemplateFn = fn(&[JsonValue]) -> Result<JsonValue, String>;

macro_rules! function_table {
    ($($name:literal => $func:path),* $(,)?) => {
        &[$(($name, $func as $crate::functions::TemplateFn)),*]
    };
}
pub(crate) use function_table;

/// Filters minijinja already provides; ours stay reachable as functions.
const BUILTIN_FILTERS: &[&str] = &[
    "abs", "attr", "batch", "bool", "capitalize", "count", "default", "d", "dictsort", "e",
    "escape", "first", "float", "format", "groupby", "indent", "int", "items", "join", "last",
    "length", "lines", "list", "lower", "map", "max", "min", "pprint", "reject", "rejectattr",
    "replace", "reverse", "round", "safe", "select", "selectattr", "slice", "sort", "split",
    "string", "sum", "title", "tojson", "trim", "unique", "upper", "urlencode",
];

/// Functions whose string output is already HTML.
const SAFE_OUTPUT: &[&str] = &["markdown", "sanitize", "highlight"];

static NULL: JsonValue = JsonValue::Null;

pub fn all_functions() -> Vec<(&'static str, TemplateFn)> {
    [
        string::FUNCTIONS,
        time::FUNCTIONS,
        math::FUNCTIONS,
        codecs::FUNCTIONS,
        collections::FUNCTIONS,
        compare::FUNCTIONS,
        types::FUNCTIONS,
        crypto::FUNCTIONS,
        color::FUNCTIONS,
        path::FUNCTIONS,
        lang::FUNCTIONS,
    ]
    .concat()
}

pub fn register_all(env: &mut Environment<'static>) {
    for (name, func) in all_functions() {
        register(env, name, func);
    }
}

fn register(env: &mut Environment<'static>, name: &'static str, func: TemplateFn) {
    env.add_function(name, move |args: Rest<Value>| call(name, func, &args));
    if !BUILTIN_FILTERS.contains(&name) {
        env.add_filter(name, move |value: Value, args: Rest<Value>| {
            let mut all = Vec::with_capacity(args.len() + 1);
            all.push(value);
            all.extend(args.iter().cloned());
            call(name, func, &all)
        });
    }
}

pub(crate) fn to_json(value: &Value) -> Result<JsonValue, Error> {
    if value.is_undefined() {
        return Ok(JsonValue::Null);
    }
    serde_json::to_value(value).map_err(|e| Error::new(ErrorKind::BadSerialization, e.to_string()))
}

fn call(name: &str, func: TemplateFn, args: &[Value]) -> Result<Value, Error> {
    let args = args.iter().map(to_json).collect::<Result<Vec<_>, _>>()?;
    let result = func(&args)
        .map_err(|message| Error::new(ErrorKind::InvalidOperation, format!("{}: {}", name, message)))?;
    Ok(match result {
        JsonValue::String(html) if SAFE_OUTPUT.contains(&name) => Value::from_safe_string(html),
        other => Value::from_serialize(&other),
    })
}

pub(crate) fn arg(args: &[JsonValue], index: usize) -> &JsonValue {
    args.get(index).unwrap_or(&NULL)
}

pub(crate) fn arg_str(args: &[JsonValue], index: usize) -> String {
    crate::util::value::to_display(arg(args, index))
}

pub(crate) fn arg_str_or(args: &[JsonValue], index: usize, default: &str) -> String {
    match args.get(index) {
        None | Some(JsonValue::Null) => default.to_string(),
        Some(value) => crate::util::value::to_display(value),
    }
}

pub(crate) fn arg_f64(args: &[JsonValue], index: usize) -> Result<f64, String> {
    crate::util::value::as_f64(arg(args, index))
        .ok_or_else(|| format!("argument {} is not a number", index + 1))
}

pub(crate) fn arg_f64_or(args: &[JsonValue], index: usize, default: f64) -> f64 {
    crate::util::value::as_f64(arg(args, index)).unwrap_or(default)
}

pub(crate) fn arg_array(args: &[JsonValue], index: usize) -> Vec<JsonValue> {
    crate::util::value::sliceify(arg(args, index).clone())
}

pub(crate) fn require(args: &[JsonValue], count: usize) -> Result<(), String> {
    if args.len() < count {
        Err(format!("expected at least {} argument(s), got {}", count, args.len()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::Value as JsonValue;

    /// Render `source` with the full function library against `data`.
    pub fn render(source: &str, data: JsonValue) -> String {
        let mut env = minijinja::Environment::new();
        super::register_all(&mut env);
        env.render_str(source, minijinja::Value::from_serialize(&data))
            .expect("template renders")
    }
}
