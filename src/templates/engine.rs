// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::fragments::FragmentSet;
use super::header::split_front_matter;
use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::vfs::Vfs;
use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::sync::Arc;

const EXPRESSION_TEMPLATE: &str = "__expression";

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}").expect("valid tag regex"));
static ROOT_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^\w$])\$\.").expect("valid root reference regex"));

/// Accept `$.name` inside tags as a reference to the top-level `name`.
pub fn rewrite_root_refs(source: &str) -> Cow<'_, str> {
    if !source.contains("$.") {
        return Cow::Borrowed(source);
    }
    TAG_PATTERN.replace_all(source, |caps: &regex::Captures| {
        ROOT_REF_PATTERN.replace_all(&caps[0], "${1}").into_owned()
    })
}

/// Whether a string should be treated as a template rather than a literal.
pub fn is_template_string(source: &str) -> bool {
    (source.contains("{{") && source.contains("}}")) || (source.contains("{%") && source.contains("%}"))
}

pub struct RenderOptions<'a> {
    pub mime_type: &'a str,
    pub scope: Option<&'a Arc<RequestScope>>,
}

impl<'a> RenderOptions<'a> {
    pub fn html() -> Self {
        Self {
            mime_type: "text/html",
            scope: None,
        }
    }
}

pub trait TemplateEngine: Send + Sync {
    /// Render a full fragment set, starting at the layout if there is one.
    fn render(
        &self,
        fragments: &FragmentSet,
        data: Value,
        options: &RenderOptions<'_>,
    ) -> Result<String, DiecastError>;

    /// Render a template loaded by name from the VFS.
    fn render_named(&self, name: &str, data: Value) -> Result<String, DiecastError>;

    /// Render an inline template string.
    fn render_str(
        &self,
        source: &str,
        data: Value,
        scope: Option<&Arc<RequestScope>>,
    ) -> Result<String, DiecastError>;

    /// Evaluate a bare expression and return its value.
    fn eval_expression(
        &self,
        expression: &str,
        data: Value,
        scope: Option<&Arc<RequestScope>>,
    ) -> Result<serde_json::Value, DiecastError>;
}

pub struct MiniJinjaEngine {
    env: Environment<'static>,
}

impl MiniJinjaEngine {
    pub fn new(vfs: Arc<Vfs>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_auto_escape_callback(minijinja::default_auto_escape_callback);
        env.set_formatter(|out, state, value| {
            if value.is_undefined() || value.is_none() {
                Ok(())
            } else {
                minijinja::escape_formatter(out, state, value)
            }
        });
        env.set_loader(move |name| vfs_template_loader(&vfs, name));
        crate::functions::register_all(&mut env);
        Self { env }
    }

    fn scoped_env(&self, auto_escape: AutoEscape, scope: Option<&Arc<RequestScope>>) -> Environment<'static> {
        let mut env = self.env.clone();
        env.set_auto_escape_callback(move |_| auto_escape.clone());
        if let Some(scope) = scope {
            crate::functions::request::register(&mut env, scope.clone());
        }
        env
    }
}

impl Default for MiniJinjaEngine {
    fn default() -> Self {
        Self::new(Arc::new(Vfs::new()))
    }
}

fn escape_for_mime(mime_type: &str) -> AutoEscape {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    match essence {
        "text/html" | "application/xhtml+xml" | "text/xml" | "application/xml" => AutoEscape::Html,
        _ => AutoEscape::None,
    }
}

impl TemplateEngine for MiniJinjaEngine {
    fn render(
        &self,
        fragments: &FragmentSet,
        data: Value,
        options: &RenderOptions<'_>,
    ) -> Result<String, DiecastError> {
        let mut env = self.scoped_env(escape_for_mime(options.mime_type), options.scope);
        for fragment in fragments.iter() {
            env.add_template_owned(
                fragment.name.clone(),
                rewrite_root_refs(&fragment.data).into_owned(),
            )?;
        }
        let template = env.get_template(fragments.entry_point())?;
        Ok(template.render(data)?)
    }

    fn render_named(&self, name: &str, data: Value) -> Result<String, DiecastError> {
        let template = self.env.get_template(name)?;
        Ok(template.render(data)?)
    }

    fn render_str(
        &self,
        source: &str,
        data: Value,
        scope: Option<&Arc<RequestScope>>,
    ) -> Result<String, DiecastError> {
        let env = self.scoped_env(AutoEscape::None, scope);
        Ok(env.render_str(&rewrite_root_refs(source), data)?)
    }

    fn eval_expression(
        &self,
        expression: &str,
        data: Value,
        scope: Option<&Arc<RequestScope>>,
    ) -> Result<serde_json::Value, DiecastError> {
        let mut env = self.scoped_env(AutoEscape::None, scope);
        let source = format!(
            "{{{{ ({}) | tojson }}}}",
            rewrite_root_refs(expression.trim())
        );
        env.add_template_owned(EXPRESSION_TEMPLATE, source)?;
        let rendered = env.get_template(EXPRESSION_TEMPLATE)?.render(data)?;
        Ok(serde_json::from_str(&rendered)?)
    }
}

/// Load `{% include %}`/`{% extends %}` targets from the VFS, minus their front matter.
fn vfs_template_loader(vfs: &Vfs, name: &str) -> Result<Option<String>, minijinja::Error> {
    let path = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    };

    match vfs.open(&path) {
        Ok(file) => {
            let (_, offset) = split_front_matter(&file.data).map_err(|e| {
                minijinja::Error::new(minijinja::ErrorKind::TemplateNotFound, e.to_string())
            })?;
            let body = String::from_utf8_lossy(&file.data[offset..]);
            Ok(Some(rewrite_root_refs(&body).into_owned()))
        }
        Err(err) if err.is_not_found() || err.is_directory() => Ok(None),
        Err(err) => Err(minijinja::Error::new(
            minijinja::ErrorKind::InvalidOperation,
            err.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileOverride;
    use crate::templates::fragments::{CONTENT_TEMPLATE, LAYOUT_TEMPLATE};
    use serde_json::json;

    fn data(value: serde_json::Value) -> Value {
        Value::from_serialize(&value)
    }

    #[test]
    fn rewrites_root_references_only_inside_tags() {
        assert_eq!(
            rewrite_root_refs("cost: $.5 {{ $.page.title }} {% if $.flags.x %}y{% endif %}"),
            "cost: $.5 {{ page.title }} {% if flags.x %}y{% endif %}"
        );
    }

    #[test]
    fn renders_layout_around_content() {
        let engine = MiniJinjaEngine::default();
        let mut fragments = FragmentSet::new();
        fragments.set(LAYOUT_TEMPLATE, None, "<main>{% include \"content\" %}</main>");
        fragments.set(CONTENT_TEMPLATE, None, "<p>{{ $.page.title }}</p>");

        let out = engine
            .render(
                &fragments,
                data(json!({"page": {"title": "A & B"}})),
                &RenderOptions::html(),
            )
            .expect("render");
        assert_eq!(out, "<main><p>A &amp; B</p></main>");
    }

    #[test]
    fn none_and_undefined_render_as_empty() {
        let engine = MiniJinjaEngine::default();
        let mut fragments = FragmentSet::new();
        fragments.set(CONTENT_TEMPLATE, None, "[{{ bindings.api }}][{{ missing.deeply.nested }}]");
        let out = engine
            .render(
                &fragments,
                data(json!({"bindings": {"api": null}})),
                &RenderOptions::html(),
            )
            .expect("render");
        assert_eq!(out, "[][]");
    }

    #[test]
    fn plain_text_is_not_escaped() {
        let engine = MiniJinjaEngine::default();
        let mut fragments = FragmentSet::new();
        fragments.set(CONTENT_TEMPLATE, None, "{{ value }}");
        let out = engine
            .render(
                &fragments,
                data(json!({"value": "<b>"})),
                &RenderOptions {
                    mime_type: "text/plain",
                    scope: None,
                },
            )
            .expect("render");
        assert_eq!(out, "<b>");
    }

    #[test]
    fn includes_load_from_vfs_without_front_matter() {
        let mut vfs = Vfs::new();
        vfs.override_path(FileOverride {
            path: "/_partials/nav.html".to_string(),
            source: String::new(),
            data: Some(json!("---\npage: {x: 1}\n---\n<nav>{{ $.page.title }}</nav>")),
        });
        let engine = MiniJinjaEngine::new(Arc::new(vfs));

        let out = engine
            .render_str(
                "{% include \"/_partials/nav.html\" %}",
                data(json!({"page": {"title": "T"}})),
                None,
            )
            .expect("render");
        assert_eq!(out, "<nav>T</nav>");
    }

    #[test]
    fn evaluates_expressions_to_values() {
        let engine = MiniJinjaEngine::default();
        let value = engine
            .eval_expression("$.a + 1", data(json!({"a": 41})), None)
            .expect("eval");
        assert_eq!(value, json!(42));
        let value = engine
            .eval_expression("page.name == 'x'", data(json!({"page": {"name": "x"}})), None)
            .expect("eval");
        assert_eq!(value, json!(true));
    }
}
