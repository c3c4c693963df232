// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Declarative data fetchers evaluated before a template renders.

pub mod shared;

use crate::context::{RequestScope, template_value};
use crate::error::DiecastError;
use crate::protocols::{BINDING_HEADER, ProtocolRegistry, ProtocolRequest};
use crate::templates::{TemplateEngine, eval_condition, eval_inline, eval_leaves, is_template_string};
use crate::timing::RequestTimer;
use crate::util::duration;
use crate::util::globs::{deserialize_string_or_vec, should_apply_to};
use crate::util::value::{autotype, is_truthy, sliceify, to_display};
use log::{debug, warn};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use shared::SharedBindings;

pub const DEFAULT_PARAM_JOINER: &str = ",";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Binding {
    pub name: String,
    /// Regular expressions; when present the request path must match one of them.
    pub restrict: RestrictPatterns,
    pub only_if: String,
    pub not_if: String,
    pub method: String,
    pub resource: String,
    #[serde(alias = "paramJoiner")]
    pub param_joiner: String,
    pub params: Map<String, JsonValue>,
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "body", alias = "bodyParams")]
    pub body_params: Option<Map<String, JsonValue>>,
    #[serde(rename = "rawbody", alias = "rawBody")]
    pub raw_body: String,
    pub formatter: String,
    pub parser: String,
    #[serde(alias = "onlyPaths", deserialize_with = "deserialize_string_or_vec")]
    pub only_paths: Vec<String>,
    #[serde(alias = "exceptPaths", deserialize_with = "deserialize_string_or_vec")]
    pub except_paths: Vec<String>,
    #[serde(with = "duration::option")]
    pub timeout: Option<Duration>,
    /// Non-zero turns this into a shared binding refreshed in the background.
    #[serde(with = "duration::option")]
    pub interval: Option<Duration>,
    pub optional: bool,
    #[serde(alias = "skipInheritHeaders")]
    pub skip_inherit_headers: bool,
    pub insecure: bool,
    #[serde(alias = "tlsCert")]
    pub tls_cert: String,
    #[serde(alias = "tlsKey")]
    pub tls_key: String,
    #[serde(alias = "noTemplate")]
    pub no_template: bool,
    pub fallback: JsonValue,
    #[serde(alias = "onError")]
    pub on_error: String,
    pub repeat: String,
    /// JSONPath applied to the decoded response.
    pub transform: String,
}

/// `restrict` expressions, compiled once when the binding is loaded.
#[derive(Debug, Clone, Default)]
pub struct RestrictPatterns {
    sources: Vec<String>,
    compiled: Vec<Regex>,
}

impl RestrictPatterns {
    pub fn new(sources: Vec<String>) -> Self {
        let compiled = sources
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(rx) => Some(rx),
                Err(err) => {
                    warn!("Ignoring invalid restrict pattern {:?}: {}", pattern, err);
                    None
                }
            })
            .collect();
        Self { sources, compiled }
    }

    pub fn patterns(&self) -> &[String] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// True when any valid expression matches `path`.
    pub fn is_match(&self, path: &str) -> bool {
        self.compiled.iter().any(|rx| rx.is_match(path))
    }
}

impl PartialEq for RestrictPatterns {
    fn eq(&self, other: &Self) -> bool {
        self.sources == other.sources
    }
}

impl Serialize for RestrictPatterns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.sources.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RestrictPatterns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_string_or_vec(deserializer).map(Self::new)
    }
}

/// Shared pieces every evaluation needs.
#[derive(Clone)]
pub struct BindingRuntime {
    pub engine: Arc<dyn TemplateEngine>,
    pub protocols: Arc<ProtocolRegistry>,
    /// Base URL for resources starting with `/` or `:`; empty means the inbound host.
    pub binding_prefix: String,
    pub default_timeout: Duration,
}

impl Binding {
    pub fn should_evaluate(&self, path: &str) -> bool {
        if !self.restrict.is_empty() && !self.restrict.is_match(path) {
            return false;
        }
        should_apply_to(path, &self.only_paths, &self.except_paths)
    }

    pub fn is_shared(&self) -> bool {
        self.interval.is_some_and(|interval| !interval.is_zero())
    }

    fn error(&self, message: impl std::fmt::Display) -> DiecastError {
        DiecastError::Binding {
            name: self.name.clone(),
            message: message.to_string(),
        }
    }

    fn template(
        &self,
        rt: &BindingRuntime,
        source: &str,
        data: &minijinja::Value,
        scope: &Arc<RequestScope>,
    ) -> Result<String, DiecastError> {
        if self.no_template {
            Ok(source.to_string())
        } else {
            eval_inline(rt.engine.as_ref(), source, data, Some(scope))
        }
    }

    /// Resources beginning with `/` or `:` address this server.
    fn absolute_resource(&self, rt: &BindingRuntime, scope: &RequestScope) -> Result<String, DiecastError> {
        let resource = self.resource.trim();
        if !(resource.starts_with('/') || resource.starts_with(':')) {
            return Ok(resource.to_string());
        }
        let prefix = if !rt.binding_prefix.is_empty() {
            rt.binding_prefix.clone()
        } else if !scope.host.is_empty() {
            format!("{}://{}", scope.scheme, scope.host)
        } else {
            return Err(self.error("relative resource without a bindingPrefix or request host"));
        };
        Ok(format!(
            "{}/{}",
            prefix.trim_end_matches('/'),
            resource.trim_start_matches(':').trim_start_matches('/')
        ))
    }

    fn param_value(&self, value: &JsonValue) -> String {
        match value {
            JsonValue::Array(items) => {
                let joiner = if self.param_joiner.is_empty() {
                    DEFAULT_PARAM_JOINER
                } else {
                    self.param_joiner.as_str()
                };
                items.iter().map(to_display).collect::<Vec<_>>().join(joiner)
            }
            other => to_display(other),
        }
    }

    fn encode_body(&self, params: &Map<String, JsonValue>) -> Result<(Vec<u8>, &'static str), DiecastError> {
        match self.formatter.as_str() {
            "" | "json" => Ok((serde_json::to_vec(params)?, "application/json")),
            "form" => {
                let encoded = params
                    .iter()
                    .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(&to_display(v))))
                    .collect::<Vec<_>>()
                    .join("&");
                Ok((encoded.into_bytes(), "application/x-www-form-urlencoded"))
            }
            other => Err(self.error(format!("unknown request formatter {:?}", other))),
        }
    }

    /// Build the outbound request, or `None` when `only_if`/`not_if` skip this binding.
    pub fn prepare(
        &self,
        rt: &BindingRuntime,
        scope: &Arc<RequestScope>,
        data: &minijinja::Value,
    ) -> Result<Option<ProtocolRequest>, DiecastError> {
        if scope.header(BINDING_HEADER) == Some(self.name.as_str()) {
            return Err(self.error("loop detected"));
        }

        if !self.no_template {
            let engine = rt.engine.as_ref();
            if !self.only_if.is_empty() && !eval_condition(engine, &self.only_if, data, Some(scope))? {
                debug!("[{}] binding {:?} skipped by only_if", scope.id, self.name);
                return Ok(None);
            }
            if !self.not_if.is_empty() && eval_condition(engine, &self.not_if, data, Some(scope))? {
                debug!("[{}] binding {:?} skipped by not_if", scope.id, self.name);
                return Ok(None);
            }
        }

        let resource = self.absolute_resource(rt, scope)?;
        let resource = self.template(rt, &resource, data, scope)?;
        debug!("[{}]  binding {:?}: resource={}", scope.id, self.name, resource);

        let mut url = Url::parse(resource.trim())
            .map_err(|e| self.error(format!("invalid resource {:?}: {}", resource, e)))?;

        if !self.params.is_empty() {
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .into_owned()
                .filter(|(key, _)| !self.params.contains_key(key))
                .collect();
            for (key, value) in &self.params {
                let value = self.template(rt, &self.param_value(value), data, scope)?;
                debug!("[{}]  binding {:?}: param {}={}", scope.id, self.name, key, value);
                pairs.push((key.clone(), value));
            }
            url.query_pairs_mut().clear().extend_pairs(&pairs);
        }

        let method = if self.method.is_empty() { "GET" } else { self.method.as_str() };
        let timeout = self.timeout.filter(|t| !t.is_zero()).unwrap_or(rt.default_timeout);
        let mut request = ProtocolRequest::new(&scope.id, method, url, timeout);
        request.binding_name = self.name.clone();
        request.insecure = self.insecure;
        request.tls_cert = self.tls_cert.clone();
        request.tls_key = self.tls_key.clone();

        if !self.skip_inherit_headers {
            for (name, value) in &scope.headers {
                request.set_header(name, value);
            }
        }
        for (name, value) in &self.headers {
            let value = self.template(rt, value, data, scope)?;
            debug!("[{}]  binding {:?}: header {}={}", scope.id, self.name, name, value);
            request.set_header(name, &value);
        }

        if let Some(body_params) = &self.body_params {
            let evaluated = if self.no_template {
                JsonValue::Object(body_params.clone())
            } else {
                eval_leaves(rt.engine.as_ref(), &JsonValue::Object(body_params.clone()), data, Some(scope))?
            };
            if let JsonValue::Object(params) = autotype_leaves(evaluated)
                && !params.is_empty()
            {
                let (body, content_type) = self.encode_body(&params)?;
                request.set_header("Content-Type", content_type);
                request.body = Some(body);
            }
        } else if !self.raw_body.is_empty() {
            let body = self.template(rt, &self.raw_body, data, scope)?;
            request.body = Some(body.into_bytes());
        }

        request.set_header(BINDING_HEADER, &self.name);
        Ok(Some(request))
    }

    /// Fetch and decode this binding once. `None` keeps the fallback value.
    pub async fn evaluate(
        &self,
        rt: &BindingRuntime,
        scope: &Arc<RequestScope>,
        data: &minijinja::Value,
    ) -> Result<Option<JsonValue>, DiecastError> {
        let Some(request) = self.prepare(rt, scope, data)? else {
            return Ok(None);
        };

        let response = rt.protocols.retrieve(&request).await?;
        if response.is_error() {
            return match self.on_error.as_str() {
                "print" => Err(self.error(String::from_utf8_lossy(&response.body).trim())),
                "ignore" => Ok(None),
                _ => Err(self.error(format!(
                    "request {} {} failed: HTTP {}",
                    request.verb, request.url, response.status
                ))),
            };
        }

        let decoded = response.decode(&self.parser).map_err(|e| self.error(e))?;
        let decoded = if self.transform.trim().is_empty() {
            decoded
        } else {
            apply_transform(&self.transform, &decoded).map_err(|e| self.error(e))?
        };

        Ok(match decoded {
            JsonValue::Null => None,
            value => Some(value),
        })
    }

    /// Evaluate once per element of `repeat`, exposing `index` and `item` to templates.
    async fn evaluate_repeated(
        &self,
        rt: &BindingRuntime,
        scope: &Arc<RequestScope>,
        data: &JsonValue,
    ) -> Result<JsonValue, DiecastError> {
        let items = eval_value(rt.engine.as_ref(), &self.repeat, &template_value(scope, data), scope)?;
        let mut results = Vec::new();

        for (index, item) in sliceify(items).into_iter().enumerate() {
            let mut iteration = data.clone();
            if let JsonValue::Object(map) = &mut iteration {
                map.insert("index".to_string(), JsonValue::from(index));
                map.insert("item".to_string(), item);
            }

            match self.evaluate(rt, scope, &template_value(scope, &iteration)).await {
                Ok(Some(value)) => results.push(value),
                Ok(None) => results.push(self.fallback.clone()),
                Err(err) => {
                    warn!(
                        "[{}] Binding {:?} (iteration {}) failed: {}",
                        scope.id, self.name, index, err
                    );
                    match self.on_error.as_str() {
                        "continue" => continue,
                        "break" => break,
                        _ if !self.optional => return Err(err),
                        _ => {}
                    }
                }
            }
        }

        Ok(JsonValue::Array(results))
    }
}

fn autotype_leaves(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => autotype(&s),
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(autotype_leaves).collect()),
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .map(|(key, value)| (key, autotype_leaves(value)))
                .collect(),
        ),
        other => other,
    }
}

/// Evaluate `expression` as a template when it looks like one, otherwise as a bare expression.
pub(crate) fn eval_value(
    engine: &dyn TemplateEngine,
    expression: &str,
    data: &minijinja::Value,
    scope: &Arc<RequestScope>,
) -> Result<JsonValue, DiecastError> {
    if is_template_string(expression) {
        Ok(autotype(engine.render_str(expression, data.clone(), Some(scope))?.trim()))
    } else {
        engine.eval_expression(expression, data.clone(), Some(scope))
    }
}

/// Query `value` with a JSONPath; a single match is returned bare.
pub fn apply_transform(expression: &str, value: &JsonValue) -> Result<JsonValue, String> {
    let path = serde_json_path::JsonPath::parse(expression.trim())
        .map_err(|e| format!("invalid transform {:?}: {}", expression, e))?;
    let mut matches: Vec<JsonValue> = path.query(value).all().into_iter().cloned().collect();
    Ok(match matches.len() {
        0 => JsonValue::Null,
        1 => matches.remove(0),
        _ => JsonValue::Array(matches),
    })
}

fn store_binding(data: &mut JsonValue, name: &str, value: JsonValue) {
    let Some(root) = data.as_object_mut() else {
        return;
    };
    let entry = root
        .entry("bindings".to_string())
        .or_insert_with(|| JsonValue::Object(Map::new()));
    if !entry.is_object() {
        *entry = JsonValue::Object(Map::new());
    }
    if let Some(bindings) = entry.as_object_mut() {
        bindings.insert(name.to_string(), value);
    }
}

fn record_error(data: &mut JsonValue, name: &str, err: &DiecastError) {
    if let JsonValue::Object(root) = data {
        let errors = root
            .entry("errors".to_string())
            .or_insert_with(|| serde_json::json!({"bindings": {}}));
        if let Some(JsonValue::Object(map)) = errors.get_mut("bindings") {
            map.insert(name.to_string(), JsonValue::String(err.to_string()));
        }
    }
}

/// Evaluate per-request bindings in order, storing each result under `bindings.<name>` of
/// `data` so later bindings can read earlier ones.
pub async fn evaluate_all(
    rt: &BindingRuntime,
    bindings: &[Binding],
    scope: &Arc<RequestScope>,
    data: &mut JsonValue,
    timer: &mut RequestTimer,
) -> Result<(), DiecastError> {
    if !data.is_object() {
        *data = JsonValue::Object(Map::new());
    }

    for (index, binding) in bindings.iter().enumerate() {
        if binding.is_shared() {
            continue;
        }
        let name = if binding.name.trim().is_empty() {
            format!("binding{}", index)
        } else {
            binding.name.clone()
        };

        store_binding(data, &name, binding.fallback.clone());
        if !binding.should_evaluate(&scope.path) {
            debug!("[{}] binding {:?} does not apply to {}", scope.id, name, scope.path);
            continue;
        }

        let started = Instant::now();
        let result = if binding.repeat.trim().is_empty() {
            binding
                .evaluate(rt, scope, &template_value(scope, data))
                .await
                .map(|value| value.unwrap_or_else(|| binding.fallback.clone()))
        } else {
            binding.evaluate_repeated(rt, scope, data).await
        };
        timer.record(
            &format!("binding-{}", name),
            &format!("Diecast Bindings: {}", name),
            started.elapsed(),
        );

        match result {
            Ok(value) => store_binding(data, &name, value),
            Err(err) => {
                warn!("[{}] Binding {:?} failed: {}", scope.id, name, err);
                if !binding.optional {
                    return Err(err);
                }
                record_error(data, &name, &err);
            }
        }
    }
    Ok(())
}

/// Evaluate header `flags` against data that already carries bindings.
pub fn evaluate_flags(
    engine: &dyn TemplateEngine,
    definitions: &Map<String, JsonValue>,
    scope: &Arc<RequestScope>,
    data: &JsonValue,
) -> Result<Map<String, JsonValue>, DiecastError> {
    let template_data = template_value(scope, data);
    let mut flags = Map::new();
    for (name, definition) in definitions {
        let value = match definition {
            JsonValue::Bool(flag) => *flag,
            JsonValue::String(expr) => eval_condition(engine, expr, &template_data, Some(scope))?,
            other => is_truthy(other),
        };
        flags.insert(name.clone(), JsonValue::Bool(value));
    }
    Ok(flags)
}
