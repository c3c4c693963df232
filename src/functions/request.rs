// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Functions bound to the current request: variables, query strings, headers, params and the body.

use super::to_json;
use crate::context::RequestScope;
use crate::util::value::{autotype, get_path};
use minijinja::value::Rest;
use minijinja::{Environment, Error, Value};
use serde_json::Value as JsonValue;
use std::sync::Arc;

fn from_json(value: &JsonValue) -> Value {
    Value::from_serialize(value)
}

fn fallback_or_none(fallback: Option<Value>) -> Value {
    fallback.unwrap_or(Value::from(()))
}

pub fn register(env: &mut Environment<'static>, scope: Arc<RequestScope>) {
    let s = scope.clone();
    env.add_function("var", move |key: String, value: Option<Value>| -> Result<Value, Error> {
        match value {
            Some(value) => {
                s.vars.set(&key, to_json(&value)?);
                Ok(Value::from(()))
            }
            None => Ok(from_json(&s.vars.get(&key))),
        }
    });

    let s = scope.clone();
    env.add_function("push", move |key: String, value: Value| -> Result<Value, Error> {
        s.vars.push(&key, to_json(&value)?);
        Ok(Value::from(()))
    });

    let s = scope.clone();
    env.add_function("pop", move |key: String| from_json(&s.vars.pop(&key)));

    let s = scope.clone();
    env.add_function("increment", move |key: String, amount: Option<f64>| {
        from_json(&s.vars.increment_by(&key, amount.unwrap_or(1.0)))
    });

    let s = scope.clone();
    env.add_function("qs", move |name: String, fallback: Option<Value>| {
        match s.query_value(&name).filter(|v| !v.is_empty()) {
            Some(value) => from_json(&autotype(value)),
            None => fallback_or_none(fallback),
        }
    });

    let s = scope.clone();
    env.add_function("querystrings", move |_args: Rest<Value>| {
        from_json(&JsonValue::Object(s.query_map(", ")))
    });

    let s = scope.clone();
    env.add_function("headers", move |name: Option<String>, fallback: Option<Value>| match name {
        Some(name) => match s.header(&name).filter(|v| !v.is_empty()) {
            Some(value) => from_json(&autotype(value)),
            None => fallback_or_none(fallback),
        },
        None => from_json(&JsonValue::Object(s.header_map(", "))),
    });

    let s = scope.clone();
    env.add_function("param", move |name: Value, fallback: Option<Value>| {
        let found = match name.as_usize() {
            // positional: segments of the request path
            Some(index) => s
                .path
                .split('/')
                .filter(|part| !part.is_empty())
                .nth(index)
                .map(autotype),
            None => s.param(&name.to_string()),
        };
        match found {
            Some(value) if !value.is_null() => from_json(&value),
            _ => fallback_or_none(fallback),
        }
    });

    let s = scope;
    env.add_function("payload", move |key: Option<String>| {
        let payload = s.payload();
        match key {
            Some(key) => get_path(&payload, &key)
                .map(from_json)
                .unwrap_or(Value::from(())),
            None => from_json(&payload),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{MiniJinjaEngine, TemplateEngine};
    use serde_json::json;

    fn render(scope: RequestScope, source: &str) -> String {
        MiniJinjaEngine::default()
            .render_str(source, minijinja::context! {}, Some(&Arc::new(scope)))
            .expect("render")
    }

    #[test]
    fn vars_round_trip_within_a_render() {
        let scope = RequestScope::detached("r", "GET", "/");
        let out = render(
            scope,
            "{{ var('a.b', 3) }}{{ var('a.b') }}|{{ push('l', 1) }}{{ push('l', 2) }}{{ pop('l') }}|{{ increment('n') }}{{ increment('n', 4) }}",
        );
        assert_eq!(out, "3|2|15");
    }

    #[test]
    fn query_headers_and_params() {
        let scope = RequestScope::detached("r", "GET", "/users/42")
            .with_query(vec![("q".into(), "rust".into())])
            .with_headers(vec![("X-Thing".into(), "7".into())]);
        scope.set_param("id", json!("42"));
        let out = render(
            scope,
            "{{ qs('q') }} {{ qs('missing', 'dflt') }} {{ headers('x-thing') + 1 }} {{ param('id') }} {{ param(0) }}",
        );
        assert_eq!(out, "rust dflt 8 42 users");
    }

    #[test]
    fn payload_reads_json_body() {
        let scope = RequestScope::detached("r", "POST", "/").with_body(br#"{"a":{"b":"c"}}"#.to_vec());
        assert_eq!(render(scope, "{{ payload('a.b') }}"), "c");
    }
}
