// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{MARKDOWN_RENDERER, RenderJob, Rendered, Renderer};
use crate::error::DiecastError;
use crate::functions::codecs::render_markdown;
use crate::templates::{CONTENT_TEMPLATE, FragmentSet, RenderOptions};
use minijinja::Value;

const MARKDOWN_HTML_VAR: &str = "__markdown_html";

/// Templates the page, converts it from Markdown to sanitized HTML, then wraps it in the layout.
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn name(&self) -> &'static str {
        MARKDOWN_RENDERER
    }

    fn render(&self, job: &RenderJob<'_>) -> Result<Rendered, DiecastError> {
        let source = match job.fragments.get(CONTENT_TEMPLATE) {
            Some(fragment) => job.engine.render_str(&fragment.data, job.data.clone(), Some(job.scope))?,
            None => String::from_utf8_lossy(job.raw).into_owned(),
        };
        let html = render_markdown(&source);

        if !job.fragments.has_layout() {
            return Ok(Rendered {
                body: html.into_bytes(),
                content_type: "text/html; charset=utf-8".to_string(),
            });
        }

        let mut wrapped = FragmentSet::new();
        wrapped.set(CONTENT_TEMPLATE, None, format!("{{{{ {} }}}}", MARKDOWN_HTML_VAR));
        for fragment in job.fragments.iter() {
            wrapped.set(&fragment.name, fragment.header.clone(), fragment.data.clone());
        }

        let data = minijinja::context! {
            __markdown_html => Value::from_safe_string(html),
            ..job.data.clone()
        };
        let body = job.engine.render(
            &wrapped,
            data,
            &RenderOptions {
                mime_type: "text/html",
                scope: Some(job.scope),
            },
        )?;
        Ok(Rendered {
            body: body.into_bytes(),
            content_type: "text/html; charset=utf-8".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestScope;
    use crate::templates::{LAYOUT_TEMPLATE, MiniJinjaEngine};
    use serde_json::json;
    use std::sync::Arc;

    fn render(fragments: &FragmentSet) -> String {
        let engine = MiniJinjaEngine::default();
        let scope = Arc::new(RequestScope::detached("md", "GET", "/notes.md"));
        let job = RenderJob {
            engine: &engine,
            fragments,
            data: Value::from_serialize(json!({"page": {"title": "Notes"}})),
            mime_type: "text/markdown",
            scope: &scope,
            raw: b"",
        };
        let rendered = MarkdownRenderer.render(&job).expect("render");
        assert!(rendered.content_type.starts_with("text/html"));
        String::from_utf8(rendered.body).expect("utf8")
    }

    #[test]
    fn templates_before_converting() {
        let mut fragments = FragmentSet::new();
        fragments.set(CONTENT_TEMPLATE, None, "# {{ page.title }}\n\n*emphasis*");
        let html = render(&fragments);
        assert!(html.contains("<h1>Notes</h1>"));
        assert!(html.contains("<em>emphasis</em>"));
    }

    #[test]
    fn converted_html_is_wrapped_in_the_layout_unescaped() {
        let mut fragments = FragmentSet::new();
        fragments.set(LAYOUT_TEMPLATE, None, "<main>{% include \"content\" %}</main>");
        fragments.set(CONTENT_TEMPLATE, None, "**bold** <script>alert(1)</script>");
        let html = render(&fragments);
        assert!(html.starts_with("<main><p><strong>bold</strong>"));
        assert!(!html.contains("<script>"));
    }
}
