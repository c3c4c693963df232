// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg, arg_array, arg_f64, arg_f64_or, arg_str, arg_str_or, function_table, require};
use crate::util::value::{number, to_display};
use regex::Regex;
use serde_json::{Value, json};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "contains" => contains,
    "lower" => lower,
    "upper" => upper,
    "trim" => trim,
    "ltrim" => ltrim,
    "rtrim" => rtrim,
    "replace" => replace,
    "rxreplace" => rxreplace,
    "concat" => concat,
    "split" => split,
    "join" => join,
    "strcount" => strcount,
    "titleize" => titleize,
    "camelize" => camelize,
    "pascalize" => pascalize,
    "underscore" => underscore,
    "hyphenate" => hyphenate,
    "hasPrefix" => has_prefix,
    "hasSuffix" => has_suffix,
    "surroundedBy" => surrounded_by,
    "percent" => percent,
    "autobyte" => autobyte,
    "thousandify" => thousandify,
    "splitWords" => split_words,
    "elideWords" => elide_words,
    "elide" => elide,
    "section" => section,
    "longestString" => longest_string,
    "shortestString" => shortest_string,
    "lipsum" => lipsum,
];

const LOREM: &str = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod tempor \
incididunt ut labore et dolore magna aliqua ut enim ad minim veniam quis nostrud exercitation \
ullamco laboris nisi ut aliquip ex ea commodo consequat duis aute irure dolor in reprehenderit in \
voluptate velit esse cillum dolore eu fugiat nulla pariatur excepteur sint occaecat cupidatat non \
proident sunt in culpa qui officia deserunt mollit anim id est laborum";

fn contains(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    Ok(match arg(args, 0) {
        Value::Array(items) => Value::Bool(items.iter().any(|item| to_display(item) == arg_str(args, 1))),
        Value::Object(map) => Value::Bool(map.contains_key(&arg_str(args, 1))),
        other => Value::Bool(to_display(other).contains(&arg_str(args, 1))),
    })
}

fn lower(args: &[Value]) -> Result<Value, String> {
    Ok(json!(arg_str(args, 0).to_lowercase()))
}

fn upper(args: &[Value]) -> Result<Value, String> {
    Ok(json!(arg_str(args, 0).to_uppercase()))
}

fn cutset(args: &[Value]) -> Option<Vec<char>> {
    args.get(1)
        .filter(|v| !v.is_null())
        .map(|v| to_display(v).chars().collect())
}

fn trim(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0);
    Ok(json!(match cutset(args) {
        Some(chars) => input.trim_matches(|c| chars.contains(&c)).to_string(),
        None => input.trim().to_string(),
    }))
}

fn ltrim(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0);
    Ok(json!(match cutset(args) {
        Some(chars) => input.trim_start_matches(|c| chars.contains(&c)).to_string(),
        None => input.trim_start().to_string(),
    }))
}

fn rtrim(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0);
    Ok(json!(match cutset(args) {
        Some(chars) => input.trim_end_matches(|c| chars.contains(&c)).to_string(),
        None => input.trim_end().to_string(),
    }))
}

fn replace(args: &[Value]) -> Result<Value, String> {
    require(args, 3)?;
    let input = arg_str(args, 0);
    let from = arg_str(args, 1);
    let to = arg_str(args, 2);
    let count = arg_f64_or(args, 3, -1.0);
    Ok(json!(if count < 0.0 {
        input.replace(&from, &to)
    } else {
        input.replacen(&from, &to, count as usize)
    }))
}

fn rxreplace(args: &[Value]) -> Result<Value, String> {
    require(args, 3)?;
    let pattern = Regex::new(&arg_str(args, 1)).map_err(|e| e.to_string())?;
    Ok(json!(pattern.replace_all(&arg_str(args, 0), arg_str(args, 2).as_str()).into_owned()))
}

fn concat(args: &[Value]) -> Result<Value, String> {
    Ok(json!(args.iter().map(to_display).collect::<String>()))
}

fn split(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0);
    if input.is_empty() {
        return Ok(json!([]));
    }
    let separator = arg_str_or(args, 1, ",");
    Ok(json!(input.split(separator.as_str()).collect::<Vec<_>>()))
}

fn join(args: &[Value]) -> Result<Value, String> {
    let separator = arg_str_or(args, 1, ",");
    Ok(json!(
        arg_array(args, 0)
            .iter()
            .map(to_display)
            .collect::<Vec<_>>()
            .join(&separator)
    ))
}

fn strcount(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let needle = arg_str(args, 1);
    if needle.is_empty() {
        return Ok(json!(0));
    }
    Ok(json!(arg_str(args, 0).matches(needle.as_str()).count()))
}

/// Break an identifier or phrase into lowercase words on case changes and punctuation.
pub(crate) fn words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = input.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        let boundary = c.is_uppercase()
            && !current.is_empty()
            && (chars[i - 1].is_lowercase()
                || chars[i - 1].is_numeric()
                || chars.get(i + 1).is_some_and(|n| n.is_lowercase()));
        if boundary {
            words.push(std::mem::take(&mut current));
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn titleize(args: &[Value]) -> Result<Value, String> {
    Ok(json!(
        arg_str(args, 0)
            .split_whitespace()
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" ")
    ))
}

fn camelize(args: &[Value]) -> Result<Value, String> {
    let words = words(&arg_str(args, 0));
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            out.push_str(word);
        } else {
            out.push_str(&capitalize(word));
        }
    }
    Ok(json!(out))
}

fn pascalize(args: &[Value]) -> Result<Value, String> {
    Ok(json!(words(&arg_str(args, 0)).iter().map(|w| capitalize(w)).collect::<String>()))
}

fn underscore(args: &[Value]) -> Result<Value, String> {
    Ok(json!(words(&arg_str(args, 0)).join("_")))
}

fn hyphenate(args: &[Value]) -> Result<Value, String> {
    Ok(json!(words(&arg_str(args, 0)).join("-")))
}

fn has_prefix(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    Ok(json!(arg_str(args, 0).starts_with(&arg_str(args, 1))))
}

fn has_suffix(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    Ok(json!(arg_str(args, 0).ends_with(&arg_str(args, 1))))
}

fn surrounded_by(args: &[Value]) -> Result<Value, String> {
    require(args, 3)?;
    let input = arg_str(args, 0);
    Ok(json!(input.starts_with(&arg_str(args, 1)) && input.ends_with(&arg_str(args, 2))))
}

fn percent(args: &[Value]) -> Result<Value, String> {
    let value = arg_f64(args, 0)?;
    let total = arg_f64_or(args, 1, 100.0);
    if total == 0.0 {
        return Ok(json!(0));
    }
    Ok(number(value / total * 100.0))
}

fn printf_precision(format: &str) -> Option<usize> {
    format
        .strip_prefix("%.")
        .and_then(|rest| rest.strip_suffix('f'))
        .and_then(|digits| digits.parse().ok())
}

fn autobyte(args: &[Value]) -> Result<Value, String> {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    let mut size = arg_f64(args, 0)?;
    let mut unit = 0;
    while size.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let formatted = match printf_precision(&arg_str(args, 1)) {
        Some(precision) => format!("{:.*}", precision, size),
        None => {
            let fixed = format!("{:.2}", size);
            fixed.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    };
    Ok(json!(format!("{}{}", formatted, UNITS[unit])))
}

fn thousandify(args: &[Value]) -> Result<Value, String> {
    let separator = arg_str_or(args, 1, ",");
    let text = arg_str(args, 0);
    let (sign, rest) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (integer, fraction) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };
    if !integer.chars().all(|c| c.is_ascii_digit()) {
        return Ok(json!(text));
    }

    let mut grouped = String::new();
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push_str(&separator);
        }
        grouped.push(digit);
    }
    Ok(json!(match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }))
}

fn split_words(args: &[Value]) -> Result<Value, String> {
    Ok(json!(words(&arg_str(args, 0))))
}

fn elide_words(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0);
    let count = arg_f64(args, 1)? as usize;
    let all: Vec<&str> = input.split_whitespace().collect();
    if all.len() <= count {
        return Ok(json!(input));
    }
    Ok(json!(format!("{}...", all[..count].join(" "))))
}

fn elide(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0);
    let count = arg_f64(args, 1)? as usize;
    if input.chars().count() <= count {
        return Ok(json!(input));
    }
    Ok(json!(format!("{}...", input.chars().take(count).collect::<String>().trim_end())))
}

fn section(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let input = arg_str(args, 0);
    let index = arg_f64(args, 1)? as i64;
    let separator = arg_str_or(args, 2, " ");
    let parts: Vec<&str> = input.split(separator.as_str()).collect();
    let index = if index < 0 { parts.len() as i64 + index } else { index };
    Ok(match usize::try_from(index).ok().and_then(|i| parts.get(i)) {
        Some(part) => json!(part),
        None => json!(""),
    })
}

fn longest_string(args: &[Value]) -> Result<Value, String> {
    Ok(json!(
        arg_array(args, 0)
            .iter()
            .map(to_display)
            .fold(String::new(), |best, s| if s.chars().count() > best.chars().count() { s } else { best })
    ))
}

fn shortest_string(args: &[Value]) -> Result<Value, String> {
    let items: Vec<String> = arg_array(args, 0).iter().map(to_display).collect();
    Ok(json!(
        items
            .into_iter()
            .reduce(|best, s| if s.chars().count() < best.chars().count() { s } else { best })
            .unwrap_or_default()
    ))
}

fn lipsum(args: &[Value]) -> Result<Value, String> {
    let count = arg_f64_or(args, 0, 50.0).max(0.0) as usize;
    let words: Vec<&str> = LOREM.split(' ').cycle().take(count).collect();
    let mut text = words.join(" ");
    if let Some(first) = text.get(..1) {
        text = format!("{}{}", first.to_uppercase(), &text[1..]);
    }
    Ok(json!(text))
}
