// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg, function_table};
use crate::util::value::{as_f64, autotype, is_truthy, to_display};
use serde_json::{Value, json};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "isBool" => is_bool,
    "isInt" => is_int,
    "isFloat" => is_float,
    "isEmpty" => is_empty,
    "isZero" => is_zero,
    "isArray" => is_array,
    "isMap" => is_map,
    "isString" => is_string,
    "autotype" => autotype_fn,
    "asStr" => as_str,
    "asInt" => as_int,
    "asFloat" => as_float,
    "asBool" => as_bool,
    "typeOf" => type_of,
];

fn typed(args: &[Value]) -> Value {
    match arg(args, 0) {
        Value::String(s) => autotype(s),
        other => other.clone(),
    }
}

fn is_bool(args: &[Value]) -> Result<Value, String> {
    Ok(json!(typed(args).is_boolean()))
}

fn is_int(args: &[Value]) -> Result<Value, String> {
    Ok(json!(typed(args).is_i64() || typed(args).is_u64()))
}

fn is_float(args: &[Value]) -> Result<Value, String> {
    Ok(json!(typed(args).is_f64()))
}

fn is_empty(args: &[Value]) -> Result<Value, String> {
    Ok(json!(match arg(args, 0) {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }))
}

fn is_zero(args: &[Value]) -> Result<Value, String> {
    Ok(json!(match arg(args, 0) {
        Value::Null => true,
        Value::Bool(b) => !b,
        other => as_f64(other) == Some(0.0) || to_display(other).is_empty(),
    }))
}

fn is_array(args: &[Value]) -> Result<Value, String> {
    Ok(json!(arg(args, 0).is_array()))
}

fn is_map(args: &[Value]) -> Result<Value, String> {
    Ok(json!(arg(args, 0).is_object()))
}

fn is_string(args: &[Value]) -> Result<Value, String> {
    Ok(json!(arg(args, 0).is_string()))
}

fn autotype_fn(args: &[Value]) -> Result<Value, String> {
    Ok(typed(args))
}

fn as_str(args: &[Value]) -> Result<Value, String> {
    Ok(json!(to_display(arg(args, 0))))
}

fn as_int(args: &[Value]) -> Result<Value, String> {
    Ok(json!(as_f64(arg(args, 0)).map(|n| n.trunc() as i64).unwrap_or(0)))
}

fn as_float(args: &[Value]) -> Result<Value, String> {
    Ok(json!(as_f64(arg(args, 0)).unwrap_or(0.0)))
}

fn as_bool(args: &[Value]) -> Result<Value, String> {
    Ok(json!(is_truthy(arg(args, 0))))
}

fn type_of(args: &[Value]) -> Result<Value, String> {
    Ok(json!(match arg(args, 0) {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_look_through_strings() {
        assert_eq!(is_int(&[json!("42")]).unwrap(), json!(true));
        assert_eq!(is_float(&[json!("4.2")]).unwrap(), json!(true));
        assert_eq!(is_bool(&[json!("false")]).unwrap(), json!(true));
        assert_eq!(is_empty(&[json!("  ")]).unwrap(), json!(true));
        assert_eq!(is_zero(&[json!("0")]).unwrap(), json!(true));
    }

    #[test]
    fn conversions() {
        assert_eq!(as_int(&[json!("7.9")]).unwrap(), json!(7));
        assert_eq!(as_float(&[json!("x")]).unwrap(), json!(0.0));
        assert_eq!(as_bool(&[json!("off")]).unwrap(), json!(false));
        assert_eq!(as_str(&[json!(3)]).unwrap(), json!("3"));
        assert_eq!(type_of(&[json!({"a": 1})]).unwrap(), json!("map"));
    }
}
