// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Turning a fragment set (or raw bytes) into response bytes.

pub mod markdown;
pub mod postprocessors;

use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::templates::{FragmentSet, RenderOptions, TemplateEngine};
use crate::util::globs::GlobSet;
use crate::util::mime_helper::{essence, is_html};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

pub use markdown::MarkdownRenderer;
pub use postprocessors::{PostProcessContext, PostProcessor, PostProcessorRegistry};

pub const TEMPLATE_RENDERER: &str = "html";
pub const PASSTHROUGH_RENDERER: &str = "passthrough";
pub const MARKDOWN_RENDERER: &str = "markdown";

/// Everything a renderer may need for one response.
pub struct RenderJob<'a> {
    pub engine: &'a dyn TemplateEngine,
    pub fragments: &'a FragmentSet,
    pub data: minijinja::Value,
    pub mime_type: &'a str,
    pub scope: &'a Arc<RequestScope>,
    /// The unparsed file, for renderers that do not template.
    pub raw: &'a [u8],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub body: Vec<u8>,
    pub content_type: String,
}

pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    fn render(&self, job: &RenderJob<'_>) -> Result<Rendered, DiecastError>;
}

/// Evaluates the fragment set with the template engine.
pub struct TemplateRenderer;

impl Renderer for TemplateRenderer {
    fn name(&self) -> &'static str {
        TEMPLATE_RENDERER
    }

    fn render(&self, job: &RenderJob<'_>) -> Result<Rendered, DiecastError> {
        let body = job.engine.render(
            job.fragments,
            job.data.clone(),
            &RenderOptions {
                mime_type: job.mime_type,
                scope: Some(job.scope),
            },
        )?;
        Ok(Rendered {
            body: body.into_bytes(),
            content_type: job.mime_type.to_string(),
        })
    }
}

/// Returns the file unchanged.
pub struct PassthroughRenderer;

impl Renderer for PassthroughRenderer {
    fn name(&self) -> &'static str {
        PASSTHROUGH_RENDERER
    }

    fn render(&self, job: &RenderJob<'_>) -> Result<Rendered, DiecastError> {
        Ok(Rendered {
            body: job.raw.to_vec(),
            content_type: job.mime_type.to_string(),
        })
    }
}

/// Renderers by name, plus the glob and MIME mappings that pick one for a file.
pub struct RendererRegistry {
    by_name: HashMap<String, Arc<dyn Renderer>>,
    by_glob: Vec<(GlobSet, String)>,
    by_mime: HashMap<String, String>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        let mut registry = Self {
            by_name: HashMap::new(),
            by_glob: Vec::new(),
            by_mime: HashMap::new(),
        };
        registry.register(Arc::new(TemplateRenderer));
        registry.register(Arc::new(PassthroughRenderer));
        registry.register(Arc::new(MarkdownRenderer));
        registry.map_mime("text/markdown", MARKDOWN_RENDERER);
        registry
    }
}

impl RendererRegistry {
    /// Built-in renderers plus `mappings`; a key without a wildcard or slash is a file extension.
    pub fn with_mappings(mappings: &HashMap<String, String>) -> Result<Self, DiecastError> {
        let mut registry = Self::default();
        let mut keys: Vec<&String> = mappings.keys().collect();
        keys.sort();
        for key in keys {
            let name = &mappings[key];
            if !registry.by_name.contains_key(name) {
                return Err(DiecastError::Config(format!(
                    "renderer mapping {:?} names unknown renderer {:?}",
                    key, name
                )));
            }
            let pattern = if key.contains('*') || key.contains('/') {
                key.clone()
            } else {
                format!("*.{}", key.trim_start_matches('.'))
            };
            registry.map_glob(&pattern, name);
        }
        Ok(registry)
    }

    pub fn register(&mut self, renderer: Arc<dyn Renderer>) {
        self.by_name.insert(renderer.name().to_string(), renderer);
    }

    pub fn map_glob(&mut self, pattern: &str, name: &str) {
        self.by_glob.push((GlobSet::new(&[pattern]), name.to_string()));
    }

    pub fn map_mime(&mut self, mime_type: &str, name: &str) {
        self.by_mime.insert(essence(mime_type), name.to_string());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Renderer>> {
        self.by_name.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pick a renderer: explicit name, then file glob, then MIME type, then the template renderer
    /// for HTML or templated files, and passthrough for everything else.
    pub fn select(
        &self,
        explicit: &str,
        path: &str,
        mime_type: &str,
        templated: bool,
    ) -> Result<Arc<dyn Renderer>, DiecastError> {
        if !explicit.is_empty() {
            return self
                .get(explicit)
                .ok_or_else(|| DiecastError::Validation(format!("unknown renderer {:?}", explicit)));
        }

        let by_glob = self
            .by_glob
            .iter()
            .find(|(globs, _)| globs.is_match(path))
            .map(|(_, name)| name.as_str());
        let by_mime = self.by_mime.get(&essence(mime_type)).map(String::as_str);
        let fallback = if templated || is_html(mime_type) {
            TEMPLATE_RENDERER
        } else {
            PASSTHROUGH_RENDERER
        };

        let name = by_glob.or(by_mime).unwrap_or(fallback);
        debug!("renderer for {} ({}): {}", path, mime_type, name);
        self.get(name)
            .ok_or_else(|| DiecastError::Config(format!("renderer {:?} is not registered", name)))
    }
}
