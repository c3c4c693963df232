// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use serde_json::Value as JsonValue;

mod context;
mod engine;
pub mod fragments;
pub mod header;

pub use context::{AutoindexContext, ErrorPageContext, escape_html};
pub use engine::{
    MiniJinjaEngine, RenderOptions, TemplateEngine, is_template_string, rewrite_root_refs,
};
pub use fragments::{CONTENT_TEMPLATE, Fragment, FragmentSet, LAYOUT_TEMPLATE};
pub use header::{
    Redirect, SwitchCase, SwitchInput, SwitchOutcome, TemplateHeader, evaluate_switch,
    join_front_matter, split_front_matter,
};

/// Render `source` when it looks like a template, otherwise hand it back unchanged.
pub fn eval_inline(
    engine: &dyn TemplateEngine,
    source: &str,
    data: &minijinja::Value,
    scope: Option<&std::sync::Arc<crate::context::RequestScope>>,
) -> Result<String, crate::error::DiecastError> {
    if is_template_string(source) {
        engine.render_str(source, data.clone(), scope)
    } else {
        Ok(source.to_string())
    }
}

/// Evaluate a condition written either as a bare expression or as a template.
pub fn eval_condition(
    engine: &dyn TemplateEngine,
    condition: &str,
    data: &minijinja::Value,
    scope: Option<&std::sync::Arc<crate::context::RequestScope>>,
) -> Result<bool, crate::error::DiecastError> {
    let condition = condition.trim();
    if condition.is_empty() {
        return Ok(true);
    }
    let value = if is_template_string(condition) {
        crate::util::value::autotype(engine.render_str(condition, data.clone(), scope)?.trim())
    } else {
        engine.eval_expression(condition, data.clone(), scope)?
    };
    Ok(crate::util::value::is_truthy(&value))
}

/// Evaluate every string leaf of `value` as an inline template and autotype the result.
pub fn eval_leaves(
    engine: &dyn TemplateEngine,
    value: &JsonValue,
    data: &minijinja::Value,
    scope: Option<&std::sync::Arc<crate::context::RequestScope>>,
) -> Result<JsonValue, crate::error::DiecastError> {
    Ok(match value {
        JsonValue::String(s) if is_template_string(s) => {
            crate::util::value::autotype(&eval_inline(engine, s, data, scope)?)
        }
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                out.insert(key.clone(), eval_leaves(engine, item, data, scope)?);
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| eval_leaves(engine, item, data, scope))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inline_evaluation_only_touches_templates() {
        let engine = MiniJinjaEngine::default();
        let data = minijinja::Value::from_serialize(&json!({"n": 2}));
        assert_eq!(eval_inline(&engine, "plain", &data, None).unwrap(), "plain");
        assert_eq!(eval_inline(&engine, "{{ n * 2 }}", &data, None).unwrap(), "4");
    }

    #[test]
    fn conditions_accept_expressions_and_templates() {
        let engine = MiniJinjaEngine::default();
        let data = minijinja::Value::from_serialize(&json!({"n": 2}));
        assert!(eval_condition(&engine, "n > 1", &data, None).unwrap());
        assert!(!eval_condition(&engine, "{{ n > 5 }}", &data, None).unwrap());
        assert!(eval_condition(&engine, "", &data, None).unwrap());
    }

    #[test]
    fn leaves_are_autotyped() {
        let engine = MiniJinjaEngine::default();
        let data = minijinja::Value::from_serialize(&json!({"n": 2}));
        let out = eval_leaves(
            &engine,
            &json!({"a": "{{ n + 1 }}", "b": ["x", "{{ n == 2 }}"]}),
            &data,
            None,
        )
        .unwrap();
        assert_eq!(out, json!({"a": 3, "b": ["x", true]}));
    }
}
