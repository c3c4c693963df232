// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::config::CsrfConfig;
use crate::error::DiecastError;
use crate::util::csrf_helper::FormFieldInjector;
use std::collections::HashMap;
use std::sync::Arc;

pub const TRIM_EMPTY_LINES: &str = "trim-empty-lines";
pub const CSRF_INJECT: &str = "csrf-inject";

pub struct PostProcessContext<'a> {
    pub mime_type: &'a str,
    pub csrf_token: Option<&'a str>,
}

pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, body: String, ctx: &PostProcessContext<'_>) -> Result<String, DiecastError>;
}

/// Drops lines that are empty or whitespace only.
pub struct TrimEmptyLines;

impl PostProcessor for TrimEmptyLines {
    fn name(&self) -> &'static str {
        TRIM_EMPTY_LINES
    }

    fn process(&self, body: String, _ctx: &PostProcessContext<'_>) -> Result<String, DiecastError> {
        let mut out = String::with_capacity(body.len());
        for line in body.lines().filter(|line| !line.trim().is_empty()) {
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Adds the CSRF token as a hidden field to matching forms.
pub struct CsrfFormInjection {
    injector: FormFieldInjector,
}

impl CsrfFormInjection {
    pub fn new(config: &CsrfConfig) -> Self {
        Self {
            injector: FormFieldInjector::new(config),
        }
    }
}

impl PostProcessor for CsrfFormInjection {
    fn name(&self) -> &'static str {
        CSRF_INJECT
    }

    fn process(&self, body: String, ctx: &PostProcessContext<'_>) -> Result<String, DiecastError> {
        match ctx.csrf_token {
            Some(token) if self.injector.applies_to(ctx.mime_type) => Ok(self.injector.inject(&body, token)),
            _ => Ok(body),
        }
    }
}

/// Named post-processors, plus the ones that run on every response.
#[derive(Default)]
pub struct PostProcessorRegistry {
    by_name: HashMap<String, Arc<dyn PostProcessor>>,
    always: Vec<Arc<dyn PostProcessor>>,
}

impl PostProcessorRegistry {
    pub fn new(csrf: Option<&CsrfConfig>) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(TrimEmptyLines));
        if let Some(csrf) = csrf.filter(|csrf| csrf.enable) {
            let injection: Arc<dyn PostProcessor> = Arc::new(CsrfFormInjection::new(csrf));
            registry.register(injection.clone());
            if csrf.inject_form_fields {
                registry.always.push(injection);
            }
        }
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn PostProcessor>) {
        self.by_name.insert(processor.name().to_string(), processor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Run `names` in order, then the always-on processors. Non-UTF-8 bodies are left alone.
    pub fn run(
        &self,
        names: &[String],
        body: Vec<u8>,
        ctx: &PostProcessContext<'_>,
    ) -> Result<Vec<u8>, DiecastError> {
        let mut pipeline: Vec<&Arc<dyn PostProcessor>> = Vec::with_capacity(names.len() + self.always.len());
        for name in names {
            let processor = self
                .by_name
                .get(name)
                .ok_or_else(|| DiecastError::Config(format!("unknown postprocessor {:?}", name)))?;
            pipeline.push(processor);
        }
        for processor in &self.always {
            if !names.iter().any(|name| name == processor.name()) {
                pipeline.push(processor);
            }
        }
        if pipeline.is_empty() {
            return Ok(body);
        }

        let mut text = match String::from_utf8(body) {
            Ok(text) => text,
            Err(err) => return Ok(err.into_bytes()),
        };
        for processor in pipeline {
            text = processor.process(text, ctx)?;
        }
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(token: Option<&'a str>) -> PostProcessContext<'a> {
        PostProcessContext {
            mime_type: "text/html; charset=utf-8",
            csrf_token: token,
        }
    }

    #[test]
    fn trims_blank_lines() {
        let registry = PostProcessorRegistry::new(None);
        let out = registry
            .run(
                &[TRIM_EMPTY_LINES.to_string()],
                b"a\n\n   \nb\n".to_vec(),
                &ctx(None),
            )
            .expect("run");
        assert_eq!(out, b"a\nb\n");
    }

    #[test]
    fn unknown_names_fail() {
        let registry = PostProcessorRegistry::new(None);
        assert!(registry.run(&["sass".to_string()], Vec::new(), &ctx(None)).is_err());
    }

    #[test]
    fn csrf_injection_runs_when_enabled() {
        let csrf = CsrfConfig {
            enable: true,
            inject_form_fields: true,
            ..CsrfConfig::default()
        };
        let registry = PostProcessorRegistry::new(Some(&csrf));
        let out = registry
            .run(&[], b"<form method=\"post\"></form>".to_vec(), &ctx(Some("tok")))
            .expect("run");
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.contains(r#"<input type="hidden" name="csrf_token" value="tok">"#));

        let untouched = registry
            .run(&[], b"<form></form>".to_vec(), &ctx(None))
            .expect("run");
        assert_eq!(untouched, b"<form></form>");
    }
}
