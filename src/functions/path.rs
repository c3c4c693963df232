// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg_str, function_table};
use crate::util::value::to_display;
use serde_json::{Value, json};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "basename" => basename,
    "extname" => extname,
    "dirname" => dirname,
    "pathjoin" => pathjoin,
    "pathsplit" => pathsplit,
    "mimetype" => mimetype,
];

fn base_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn basename(args: &[Value]) -> Result<Value, String> {
    let path = arg_str(args, 0);
    let base = base_of(&path);
    // basename(path, ".ext") strips a known suffix
    let stripped = match args.get(1).map(to_display) {
        Some(suffix) if !suffix.is_empty() && base != suffix => base.strip_suffix(suffix.as_str()).unwrap_or(base),
        _ => base,
    };
    Ok(json!(stripped))
}

fn extname(args: &[Value]) -> Result<Value, String> {
    let path = arg_str(args, 0);
    let base = base_of(&path);
    Ok(json!(match base.rfind('.') {
        Some(index) if index > 0 => &base[index..],
        _ => "",
    }))
}

fn dirname(args: &[Value]) -> Result<Value, String> {
    let path = arg_str(args, 0);
    let trimmed = path.trim_end_matches('/');
    Ok(json!(match trimmed.rfind('/') {
        Some(0) => "/",
        Some(index) => &trimmed[..index],
        None if path.starts_with('/') => "/",
        None => ".",
    }))
}

/// Join segments and clean the result (`.` and `..` resolved, duplicate slashes removed).
fn pathjoin(args: &[Value]) -> Result<Value, String> {
    let joined = args.iter().map(to_display).collect::<Vec<_>>().join("/");
    Ok(json!(clean(&joined)))
}

fn pathsplit(args: &[Value]) -> Result<Value, String> {
    let path = arg_str(args, 0);
    Ok(json!(
        path.split('/')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
    ))
}

fn mimetype(args: &[Value]) -> Result<Value, String> {
    let path = arg_str(args, 0);
    Ok(json!(
        mime_guess::from_path(&path)
            .first()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    ))
}

pub(crate) fn clean(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let body = parts.join("/");
    match (absolute, body.is_empty()) {
        (true, _) => format!("/{}", body),
        (false, true) => ".".to_string(),
        (false, false) => body,
    }
}
