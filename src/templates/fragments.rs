// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::header::{TemplateHeader, split_front_matter};
use crate::error::DiecastError;

pub const CONTENT_TEMPLATE: &str = "content";
pub const LAYOUT_TEMPLATE: &str = "layout";

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub name: String,
    pub header: Option<TemplateHeader>,
    pub data: String,
}

/// Named template pieces that make up one rendered response, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct FragmentSet {
    fragments: Vec<Fragment>,
}

impl FragmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment. Returns `false` (and changes nothing) if the name is already present.
    pub fn set(&mut self, name: &str, header: Option<TemplateHeader>, data: impl Into<String>) -> bool {
        if self.has(name) {
            return false;
        }
        self.fragments.push(Fragment {
            name: name.to_string(),
            header,
            data: data.into(),
        });
        true
    }

    /// Split the front matter off `source` and add the remainder under `name`.
    pub fn parse(&mut self, name: &str, source: &[u8]) -> Result<bool, DiecastError> {
        if self.has(name) {
            return Ok(false);
        }
        let (header, offset) = split_front_matter(source)?;
        let body = String::from_utf8_lossy(&source[offset..]).into_owned();
        Ok(self.set(name, header, body))
    }

    pub fn get(&self, name: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn has_layout(&self) -> bool {
        self.has(LAYOUT_TEMPLATE)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The template rendering starts from.
    pub fn entry_point(&self) -> &str {
        if self.has_layout() {
            LAYOUT_TEMPLATE
        } else {
            CONTENT_TEMPLATE
        }
    }

    /// Merge `base` with every fragment header, in insertion order.
    pub fn header(&self, base: Option<&TemplateHeader>) -> TemplateHeader {
        let mut merged = base.cloned().unwrap_or_default();
        for fragment in &self.fragments {
            if let Some(header) = &fragment.header {
                merged = merged.merge(header);
            }
        }
        merged
    }

    /// Source of every fragment concatenated with boundary comments, for `__viewsource`.
    pub fn debug_output(&self) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            out.push_str(&format!("\n{{# BEGIN FRAGMENT \"{}\" #}}\n", fragment.name));
            out.push_str(&fragment.data);
            out.push_str(&format!("\n{{# END FRAGMENT \"{}\" #}}\n", fragment.name));
        }
        out
    }
}
