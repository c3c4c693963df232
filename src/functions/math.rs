// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg_array, arg_f64, arg_f64_or, arg_str, function_table, require};
use crate::util::value::{as_f64, number};
use serde_json::{Value, json};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "calc" => calc,
    "add" => add,
    "subtract" => subtract,
    "multiply" => multiply,
    "divide" => divide,
    "mod" => modulo,
    "pow" => pow,
    "sequence" => sequence,
    "round" => round,
    "negate" => negate,
    "ceil" => ceil,
    "floor" => floor,
    "maximum" => maximum,
    "minimum" => minimum,
    "sum" => sum,
];

fn numbers(args: &[Value]) -> Result<Vec<f64>, String> {
    let mut out = Vec::new();
    for value in args {
        match value {
            Value::Array(items) => out.extend(numbers(items)?),
            other => out.push(as_f64(other).ok_or_else(|| format!("{} is not a number", other))?),
        }
    }
    Ok(out)
}

fn fold(args: &[Value], op: fn(f64, f64) -> f64) -> Result<Value, String> {
    let values = numbers(args)?;
    let mut iter = values.into_iter();
    let first = iter.next().ok_or("expected at least one number")?;
    Ok(number(iter.fold(first, op)))
}

fn add(args: &[Value]) -> Result<Value, String> {
    fold(args, |a, b| a + b)
}

fn subtract(args: &[Value]) -> Result<Value, String> {
    fold(args, |a, b| a - b)
}

fn multiply(args: &[Value]) -> Result<Value, String> {
    fold(args, |a, b| a * b)
}

fn divide(args: &[Value]) -> Result<Value, String> {
    let values = numbers(args)?;
    if values.iter().skip(1).any(|v| *v == 0.0) {
        return Err("division by zero".to_string());
    }
    fold(args, |a, b| a / b)
}

fn modulo(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let divisor = arg_f64(args, 1)?;
    if divisor == 0.0 {
        return Err("division by zero".to_string());
    }
    Ok(number(arg_f64(args, 0)? % divisor))
}

fn pow(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    Ok(number(arg_f64(args, 0)?.powf(arg_f64(args, 1)?)))
}

fn sequence(args: &[Value]) -> Result<Value, String> {
    let count = arg_f64(args, 0)?.max(0.0) as i64;
    let start = arg_f64_or(args, 1, 0.0) as i64;
    Ok(json!((start..start + count).collect::<Vec<_>>()))
}

fn round(args: &[Value]) -> Result<Value, String> {
    let value = arg_f64(args, 0)?;
    let places = arg_f64_or(args, 1, 0.0) as i32;
    let factor = 10f64.powi(places);
    Ok(number((value * factor).round() / factor))
}

fn negate(args: &[Value]) -> Result<Value, String> {
    Ok(number(-arg_f64(args, 0)?))
}

fn ceil(args: &[Value]) -> Result<Value, String> {
    Ok(number(arg_f64(args, 0)?.ceil()))
}

fn floor(args: &[Value]) -> Result<Value, String> {
    Ok(number(arg_f64(args, 0)?.floor()))
}

fn maximum(args: &[Value]) -> Result<Value, String> {
    fold(args, f64::max)
}

fn minimum(args: &[Value]) -> Result<Value, String> {
    fold(args, f64::min)
}

fn sum(args: &[Value]) -> Result<Value, String> {
    Ok(number(numbers(&arg_array(args, 0))?.iter().sum()))
}

fn calc(args: &[Value]) -> Result<Value, String> {
    let expression = arg_str(args, 0);
    let mut parser = Calculator {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
    };
    let value = parser.expression()?;
    if parser.pos != parser.chars.len() {
        return Err(format!("unexpected {:?} in {:?}", parser.chars[parser.pos], expression));
    }
    Ok(number(value))
}

/// Recursive-descent arithmetic: `+ - * / %`, `^` (right associative), unary minus and parentheses.
struct Calculator {
    chars: Vec<char>,
    pos: usize,
}

impl Calculator {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.power()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let rhs = self.power()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.power()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.peek() == Some('-') {
            self.pos += 1;
            return Ok(-self.unary()?);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<f64, String> {
        if self.peek() == Some('(') {
            self.pos += 1;
            let value = self.expression()?;
            if self.peek() != Some(')') {
                return Err("missing closing parenthesis".to_string());
            }
            self.pos += 1;
            return Ok(value);
        }

        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                Some(c) => format!("unexpected {:?}", c),
                None => "unexpected end of expression".to_string(),
            });
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| "invalid number".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_folds() {
        assert_eq!(add(&[json!(1), json!("2"), json!([3, 4])]).unwrap(), json!(10));
        assert_eq!(subtract(&[json!(10), json!(2.5)]).unwrap(), json!(7.5));
        assert_eq!(divide(&[json!(9), json!(3)]).unwrap(), json!(3));
        assert!(divide(&[json!(1), json!(0)]).is_err());
        assert_eq!(modulo(&[json!(10), json!(3)]).unwrap(), json!(1));
    }

    #[test]
    fn calculator_respects_precedence() {
        assert_eq!(calc(&[json!("1 + 2 * 3")]).unwrap(), json!(7));
        assert_eq!(calc(&[json!("(1 + 2) * 3")]).unwrap(), json!(9));
        assert_eq!(calc(&[json!("2 ^ 3 ^ 2")]).unwrap(), json!(512));
        assert_eq!(calc(&[json!("-4 / 8")]).unwrap(), json!(-0.5));
        assert!(calc(&[json!("1 +")]).is_err());
        assert!(calc(&[json!("(1")]).is_err());
    }

    #[test]
    fn sequences_and_rounding() {
        assert_eq!(sequence(&[json!(3)]).unwrap(), json!([0, 1, 2]));
        assert_eq!(sequence(&[json!(2), json!(5)]).unwrap(), json!([5, 6]));
        assert_eq!(round(&[json!(3.14159), json!(2)]).unwrap(), json!(3.14));
        assert_eq!(maximum(&[json!([3, 9, 1])]).unwrap(), json!(9));
    }
}
