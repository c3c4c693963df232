// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::collections::compare_values;
use super::{TemplateFn, arg, arg_str, function_table, require};
use crate::util::value::{autotype, to_display};
use regex::Regex;
use serde_json::{Value, json};
use std::cmp::Ordering;

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "eqx" => eqx,
    "nex" => nex,
    "gtx" => gtx,
    "gex" => gex,
    "ltx" => ltx,
    "lex" => lex,
    "compare" => compare,
    "match" => matches,
    "switch" => switch,
];

/// Compare after autotyping strings, so `"2" == 2` and `"true" == true`.
fn loose(value: &Value) -> Value {
    match value {
        Value::String(s) => autotype(s),
        other => other.clone(),
    }
}

fn loose_cmp(args: &[Value]) -> Result<Ordering, String> {
    require(args, 2)?;
    Ok(compare_values(&loose(arg(args, 0)), &loose(arg(args, 1))))
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    let (a, b) = (loose(a), loose(b));
    a == b || to_display(&a) == to_display(&b)
}

fn eqx(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    Ok(json!(loose_eq(arg(args, 0), arg(args, 1))))
}

fn nex(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    Ok(json!(!loose_eq(arg(args, 0), arg(args, 1))))
}

fn gtx(args: &[Value]) -> Result<Value, String> {
    Ok(json!(loose_cmp(args)? == Ordering::Greater))
}

fn gex(args: &[Value]) -> Result<Value, String> {
    Ok(json!(loose_cmp(args)? != Ordering::Less))
}

fn ltx(args: &[Value]) -> Result<Value, String> {
    Ok(json!(loose_cmp(args)? == Ordering::Less))
}

fn lex(args: &[Value]) -> Result<Value, String> {
    Ok(json!(loose_cmp(args)? != Ordering::Greater))
}

fn compare(args: &[Value]) -> Result<Value, String> {
    require(args, 3)?;
    let operands = &args[1..];
    match arg_str(args, 0).as_str() {
        "==" | "eq" => eqx(operands),
        "!=" | "ne" => nex(operands),
        ">" | "gt" => gtx(operands),
        ">=" | "ge" => gex(operands),
        "<" | "lt" => ltx(operands),
        "<=" | "le" => lex(operands),
        other => Err(format!("unknown operator {:?}", other)),
    }
}

fn matches(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let pattern = Regex::new(&arg_str(args, 1)).map_err(|e| e.to_string())?;
    Ok(json!(pattern.is_match(&arg_str(args, 0))))
}

/// `switch(value, fallback, case1, result1, case2, result2, ...)`
fn switch(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let input = arg(args, 0);
    for pair in args[2..].chunks(2) {
        if let [case, result] = pair
            && loose_eq(input, case)
        {
            return Ok(result.clone());
        }
    }
    Ok(arg(args, 1).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_comparisons_autotype() {
        assert_eq!(eqx(&[json!("2"), json!(2)]).unwrap(), json!(true));
        assert_eq!(eqx(&[json!("true"), json!(true)]).unwrap(), json!(true));
        assert_eq!(gtx(&[json!("10"), json!(9)]).unwrap(), json!(true));
        assert_eq!(lex(&[json!("a"), json!("b")]).unwrap(), json!(true));
        assert_eq!(compare(&[json!(">="), json!(3), json!("3")]).unwrap(), json!(true));
        assert!(compare(&[json!("~"), json!(1), json!(2)]).is_err());
    }

    #[test]
    fn switch_picks_matching_case() {
        let args = [json!("b"), json!("none"), json!("a"), json!(1), json!("b"), json!(2)];
        assert_eq!(switch(&args).unwrap(), json!(2));
        assert_eq!(switch(&[json!("z"), json!("none"), json!("a"), json!(1)]).unwrap(), json!("none"));
    }

    #[test]
    fn regex_match() {
        assert_eq!(matches(&[json!("abc123"), json!(r"^\w+\d+$")]).unwrap(), json!(true));
    }
}
