// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::vfs::DirEntryInfo;
use chrono::{DateTime, Utc};
use minijinja::{Value, context};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct ErrorPageContext {
    status: u16,
    message: String,
    request_id: String,
}

impl ErrorPageContext {
    pub fn new(status: u16, message: &str, request_id: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
            request_id: request_id.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        context! {
            status => self.status,
            error => &self.message,
            request_id => &self.request_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct AutoindexEntry {
    name: String,
    href: String,
    is_dir: bool,
    size: u64,
    modified: Option<String>,
}

/// Data handed to an `/_autoindex.html` template.
#[derive(Debug, Clone)]
pub struct AutoindexContext {
    path: String,
    parent: Option<String>,
    entries: Vec<AutoindexEntry>,
}

impl AutoindexContext {
    pub fn new(path: &str, entries: &[DirEntryInfo]) -> Self {
        let base = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };
        let parent = if base == "/" {
            None
        } else {
            let trimmed = base.trim_end_matches('/');
            let cut = trimmed.rfind('/').map(|i| i + 1).unwrap_or(1);
            Some(trimmed[..cut].to_string())
        };

        let entries = entries
            .iter()
            .map(|entry| AutoindexEntry {
                name: entry.name.clone(),
                href: if entry.is_dir {
                    format!("{}{}/", base, entry.name)
                } else {
                    format!("{}{}", base, entry.name)
                },
                is_dir: entry.is_dir,
                size: entry.size,
                modified: entry
                    .modified
                    .map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%d %H:%M").to_string()),
            })
            .collect();

        Self {
            path: base,
            parent,
            entries,
        }
    }

    pub fn to_value(&self) -> Value {
        context! {
            path => &self.path,
            parent => &self.parent,
            entries => Value::from_serialize(&self.entries),
        }
    }

    /// Minimal listing used when the site ships no autoindex template.
    pub fn to_html(&self) -> String {
        let mut html = format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Index of {0}</title></head>\n<body><h1>Index of {0}</h1>\n<ul>\n",
            escape_html(&self.path)
        );
        if let Some(parent) = &self.parent {
            html.push_str(&format!("<li><a href=\"{}\">..</a></li>\n", escape_html(parent)));
        }
        for entry in &self.entries {
            let label = if entry.is_dir {
                format!("{}/", entry.name)
            } else {
                entry.name.clone()
            };
            html.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>\n",
                escape_html(&entry.href),
                escape_html(&label)
            ));
        }
        html.push_str("</ul>\n</body></html>\n");
        html
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autoindex_links_children_and_parent() {
        let entries = vec![
            DirEntryInfo {
                name: "sub".to_string(),
                is_dir: true,
                size: 0,
                modified: None,
            },
            DirEntryInfo {
                name: "a&b.txt".to_string(),
                is_dir: false,
                size: 3,
                modified: None,
            },
        ];
        let index = AutoindexContext::new("/docs/files", &entries);
        let html = index.to_html();
        assert!(html.contains("<a href=\"/docs/\">..</a>"));
        assert!(html.contains("<a href=\"/docs/files/sub/\">sub/</a>"));
        assert!(html.contains("a&amp;b.txt"));
    }

    #[test]
    fn root_has_no_parent() {
        let index = AutoindexContext::new("/", &[]);
        assert!(!index.to_html().contains(".."));
    }
}
