// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use serde_json::Value as JsonValue;

/// Marker in a file name that binds the last request path segment as `id`.
pub const ID_ROUTE_MARKER: &str = "__id.";

fn has_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|name| name.rfind('.').is_some_and(|dot| dot > 0))
}

fn parent_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(index) => &trimmed[..index],
        None => "",
    }
}

fn strip_prefix(path: &str, route_prefix: &str) -> String {
    if route_prefix.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(route_prefix) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

/// Files that may answer a request for `path`, in the order they are tried.
///
/// `route_prefix` has no trailing slash and is stripped from every candidate.
pub fn candidate_paths(
    path: &str,
    index_file: &str,
    try_extensions: &[String],
    route_prefix: &str,
) -> Vec<String> {
    let mut candidates = vec![path.to_string()];
    let index_base = index_file
        .rsplit_once('.')
        .map(|(base, _)| base)
        .unwrap_or(index_file);

    if path.ends_with('/') {
        candidates.push(format!("{}{}", path, index_file));
        for ext in try_extensions {
            candidates.push(format!("{}{}.{}", path, index_base, ext));
        }
        let trimmed = path.trim_end_matches('/');
        if !trimmed.is_empty() {
            for ext in try_extensions {
                candidates.push(format!("{}.{}", trimmed, ext));
            }
        }
    } else if !has_extension(path) {
        candidates.push(format!("{}/{}", path, index_file));
        for ext in try_extensions {
            candidates.push(format!("{}.{}", path, ext));
        }
    }

    if !path.trim_matches('/').is_empty() {
        let parent = parent_of(path);
        for ext in try_extensions {
            candidates.push(format!("{}/index__id.{}", parent, ext));
            candidates.push(format!("{}/__id.{}", parent, ext));
            if !parent.is_empty() {
                candidates.push(format!("{}__id.{}", parent, ext));
            }
        }
    }

    let mut unique: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let candidate = strip_prefix(&candidate, route_prefix);
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// The `id` parameter bound when `matched` is a dynamic route file.
pub fn id_param(matched: &str, request_path: &str) -> Option<JsonValue> {
    if !matched.contains(ID_ROUTE_MARKER) {
        return None;
    }
    let last = request_path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    Some(crate::util::value::autotype(last))
}
