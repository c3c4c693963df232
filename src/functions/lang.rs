// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Language-oriented helpers: code blocks, pluralization and simple translation lookups.

use super::{TemplateFn, arg, arg_f64_or, arg_str, arg_str_or, function_table, require};
use crate::templates::escape_html;
use crate::util::value::{get_path, to_display};
use serde_json::{Value, json};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "highlight" => highlight,
    "pluralize" => pluralize,
    "translate" => translate,
    "ordinalize" => ordinalize,
];

/// `highlight(source, language)` wraps escaped source in a language-tagged code block
/// for client-side highlighters.
fn highlight(args: &[Value]) -> Result<Value, String> {
    let source = arg_str(args, 0);
    let language = arg_str(args, 1);
    let class: String = language
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '+')
        .collect();
    let html = if class.is_empty() {
        format!("<pre><code>{}</code></pre>", escape_html(&source))
    } else {
        format!(
            "<pre><code class=\"language-{}\">{}</code></pre>",
            class,
            escape_html(&source)
        )
    };
    Ok(json!(html))
}

/// `pluralize(count, singular[, plural])`; the plural defaults to an English-ish suffix.
fn pluralize(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let count = arg_f64_or(args, 0, 0.0);
    let singular = arg_str(args, 1);
    if count == 1.0 {
        return Ok(json!(singular));
    }
    let plural = match args.get(2) {
        Some(value) if !value.is_null() => to_display(value),
        _ => english_plural(&singular),
    };
    Ok(json!(plural))
}

fn english_plural(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", word)
    } else if lower.ends_with('y')
        && !matches!(lower.chars().rev().nth(1), Some('a' | 'e' | 'i' | 'o' | 'u'))
    {
        format!("{}ies", &word[..word.len() - 1])
    } else {
        format!("{}s", word)
    }
}

/// `translate(translations, locale, key[, fallback])` looks up `translations.<locale>.<key>`.
fn translate(args: &[Value]) -> Result<Value, String> {
    require(args, 3)?;
    let locale = arg_str(args, 1);
    let key = arg_str(args, 2);
    let fallback = arg_str_or(args, 3, &key);
    let table = arg(args, 0);

    let found = get_path(table, &format!("{}.{}", locale, key)).or_else(|| {
        // "en-US" falls back to "en"
        locale
            .split(['-', '_'])
            .next()
            .filter(|lang| *lang != locale)
            .and_then(|lang| get_path(table, &format!("{}.{}", lang, key)))
    });
    Ok(found.cloned().unwrap_or(json!(fallback)))
}

fn ordinalize(args: &[Value]) -> Result<Value, String> {
    let n = arg_f64_or(args, 0, 0.0) as i64;
    let suffix = match (n % 100, n % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    Ok(json!(format!("{}{}", n, suffix)))
}
