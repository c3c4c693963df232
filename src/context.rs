// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Per-request state: the inbound request snapshot, the template variable store and the
//! recursion guard used while rendering.

use crate::error::DiecastError;
use crate::templates::{TemplateEngine, TemplateHeader, eval_inline};
use crate::timing::RequestTimer;
use crate::util::value::{autotype, get_path, remove_path, set_path, underscore};
use actix_web::HttpRequest;
use cookie::Cookie;
use actix_web::dev::Payload;
use actix_web::error::PayloadError;
use actix_web::web::{Bytes, Query};
use minijinja::value::{Enumerator, Object};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_JOINER: &str = ", ";

/// Dot-path addressable variables shared between template functions of one request.
#[derive(Debug, Clone)]
pub struct VarStore {
    inner: Arc<Mutex<JsonValue>>,
}

impl VarStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(JsonValue::Object(Map::new()))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JsonValue> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> JsonValue {
        get_path(&self.lock(), key).cloned().unwrap_or(JsonValue::Null)
    }

    pub fn set(&self, key: &str, value: JsonValue) {
        set_path(&mut self.lock(), key, value);
    }

    /// Append to the array at `key`, turning a scalar into a one-element array first.
    pub fn push(&self, key: &str, value: JsonValue) {
        let mut root = self.lock();
        let mut items = match get_path(&root, key).cloned() {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items,
            Some(other) => vec![other],
        };
        items.push(value);
        set_path(&mut root, key, JsonValue::Array(items));
    }

    pub fn pop(&self, key: &str) -> JsonValue {
        let mut root = self.lock();
        match get_path(&root, key).cloned() {
            Some(JsonValue::Array(mut items)) => {
                let last = items.pop().unwrap_or(JsonValue::Null);
                set_path(&mut root, key, JsonValue::Array(items));
                last
            }
            Some(_) => remove_path(&mut root, key).unwrap_or(JsonValue::Null),
            None => JsonValue::Null,
        }
    }

    pub fn increment(&self, key: &str) -> JsonValue {
        self.increment_by(key, 1.0)
    }

    pub fn increment_by(&self, key: &str, amount: f64) -> JsonValue {
        let mut root = self.lock();
        let current = get_path(&root, key)
            .and_then(crate::util::value::as_f64)
            .unwrap_or(0.0);
        let next = crate::util::value::number(current + amount);
        set_path(&mut root, key, next.clone());
        next
    }

    pub fn snapshot(&self) -> JsonValue {
        self.lock().clone()
    }
}

impl Default for VarStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Live view of a [`VarStore`] exposed to templates as `vars`.
#[derive(Debug)]
pub struct VarsObject(pub VarStore);

impl Object for VarsObject {
    fn get_value(self: &Arc<Self>, key: &minijinja::Value) -> Option<minijinja::Value> {
        let key = key.as_str()?;
        match self.0.get(key) {
            JsonValue::Null => None,
            value => Some(minijinja::Value::from_serialize(&value)),
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        let keys = match self.0.snapshot() {
            JsonValue::Object(map) => map.keys().map(|k| minijinja::Value::from(k.as_str())).collect(),
            _ => Vec::new(),
        };
        Enumerator::Values(keys)
    }
}

/// A payload that yields `body` again, for middleware that had to read the request body.
pub fn replay_payload(body: Bytes) -> Payload {
    let stream = futures_util::stream::once(async move { Ok::<Bytes, PayloadError>(body) });
    Payload::Stream {
        payload: Box::pin(stream),
    }
}

/// Immutable snapshot of the inbound request plus the mutable per-request stores.
#[derive(Debug)]
pub struct RequestScope {
    pub id: String,
    pub method: String,
    pub path: String,
    pub uri: String,
    pub query_string: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub remote_addr: Option<String>,
    pub host: String,
    pub scheme: String,
    pub version: String,
    pub vars: VarStore,
    params: Mutex<Map<String, JsonValue>>,
}

impl RequestScope {
    pub fn from_request(req: &HttpRequest, body: Vec<u8>, id: &str) -> Self {
        let query = Query::<Vec<(String, String)>>::from_query(req.query_string())
            .map(Query::into_inner)
            .unwrap_or_default();
        let headers = req
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let info = req.connection_info();

        Self {
            id: id.to_string(),
            method: req.method().as_str().to_string(),
            path: req.path().to_string(),
            uri: req.uri().to_string(),
            query_string: req.query_string().to_string(),
            query,
            headers,
            body,
            remote_addr: req.peer_addr().map(|addr| addr.to_string()),
            host: info.host().to_string(),
            scheme: info.scheme().to_string(),
            version: format!("{:?}", req.version()),
            vars: VarStore::new(),
            params: Mutex::new(Map::new()),
        }
    }

    /// A scope for code paths with no inbound request (shared bindings, tests).
    pub fn detached(id: &str, method: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            uri: path.to_string(),
            query_string: String::new(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
            remote_addr: None,
            host: String::new(),
            scheme: "http".to_string(),
            version: "HTTP/1.1".to_string(),
            vars: VarStore::new(),
            params: Mutex::new(Map::new()),
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query_string = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.query = query;
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("cookie"))
            .flat_map(|(_, value)| Cookie::split_parse(value.clone()))
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_string())
    }

    pub fn set_param(&self, name: &str, value: JsonValue) {
        self.lock_params().insert(name.to_string(), value);
    }

    pub fn param(&self, name: &str) -> Option<JsonValue> {
        self.lock_params().get(name).cloned()
    }

    pub fn params(&self) -> Map<String, JsonValue> {
        self.lock_params().clone()
    }

    fn lock_params(&self) -> MutexGuard<'_, Map<String, JsonValue>> {
        self.params.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Query values by key, repeated keys joined, autotyped.
    pub fn query_map(&self, joiner: &str) -> Map<String, JsonValue> {
        join_pairs(&self.query, joiner, |key| key.to_string())
    }

    /// Header values keyed by their snake_cased names, autotyped.
    pub fn header_map(&self, joiner: &str) -> Map<String, JsonValue> {
        join_pairs(&self.headers, joiner, |key| underscore(&key.to_ascii_lowercase()))
    }

    /// The request body decoded as JSON, then as a form, then as plain text.
    pub fn payload(&self) -> JsonValue {
        if self.body.is_empty() {
            return JsonValue::Null;
        }
        if let Ok(value) = serde_json::from_slice::<JsonValue>(&self.body) {
            return value;
        }
        let text = String::from_utf8_lossy(&self.body);
        let is_form = self
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form
            && let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::from_query(&text)
        {
            return JsonValue::Object(join_pairs(&pairs, DEFAULT_JOINER, |k| k.to_string()));
        }
        JsonValue::String(text.into_owned())
    }

    /// The `request` object exposed to templates.
    pub fn request_data(&self, header: Option<&TemplateHeader>) -> JsonValue {
        let query_joiner = header
            .map(|h| h.query_joiner.as_str())
            .filter(|j| !j.is_empty())
            .unwrap_or(DEFAULT_JOINER);
        let header_joiner = header
            .map(|h| h.header_joiner.as_str())
            .filter(|j| !j.is_empty())
            .unwrap_or(DEFAULT_JOINER);

        let mut query = Map::new();
        let mut headers = Map::new();
        if let Some(header) = header {
            for (key, value) in &header.defaults {
                query.insert(key.clone(), autotype(value));
            }
            for (key, value) in &header.default_headers {
                headers.insert(underscore(&key.to_ascii_lowercase()), autotype(value));
            }
        }
        query.extend(self.query_map(query_joiner));
        headers.extend(self.header_map(header_joiner));

        let (remote_ip, remote_port) = match &self.remote_addr {
            Some(addr) => match addr.rsplit_once(':') {
                Some((ip, port)) => (ip.to_string(), port.parse::<u16>().unwrap_or(0)),
                None => (addr.clone(), 0),
            },
            None => (String::new(), 0),
        };
        let (path, fragment) = match self.path.split_once('#') {
            Some((path, fragment)) => (path, fragment),
            None => (self.path.as_str(), ""),
        };
        let url_params = header
            .map(|h| JsonValue::Object(h.url_params.clone()))
            .unwrap_or_else(|| json!({}));

        json!({
            "id": self.id,
            "timestamp": chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            "method": self.method,
            "protocol": self.version,
            "headers": headers,
            "length": self.body.len(),
            "remote_ip": remote_ip,
            "remote_port": remote_port,
            "remote_address": self.remote_addr.clone().unwrap_or_default(),
            "host": self.host,
            "url": {
                "unmodified": self.uri,
                "string": format!("{}://{}{}", self.scheme, self.host, self.uri),
                "scheme": self.scheme,
                "host": self.host,
                "path": path,
                "fragment": fragment,
                "query": query,
                "params": url_params,
            },
        })
    }
}

fn join_pairs(
    pairs: &[(String, String)],
    joiner: &str,
    key_of: impl Fn(&str) -> String,
) -> Map<String, JsonValue> {
    let mut grouped: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (key, value) in pairs {
        grouped.entry(key_of(key)).or_default().push(value.as_str());
    }
    grouped
        .into_iter()
        .filter_map(|(key, values)| {
            let joined = values.join(joiner);
            if joined.is_empty() {
                None
            } else {
                Some((key, autotype(&joined)))
            }
        })
        .collect()
}

/// Template data for `data` (a JSON object) with the live `vars` store of `scope` attached.
pub fn template_value(scope: &RequestScope, data: &JsonValue) -> minijinja::Value {
    let mut map: BTreeMap<String, minijinja::Value> = BTreeMap::new();
    if let JsonValue::Object(fields) = data {
        for (key, value) in fields {
            map.insert(key.clone(), minijinja::Value::from_serialize(value));
        }
    }
    map.insert(
        "vars".to_string(),
        minijinja::Value::from_object(VarsObject(scope.vars.clone())),
    );
    minijinja::Value::from(map)
}

/// Per-request rendering state. Never shared across requests or handed to spawned tasks.
#[derive(Debug)]
pub struct RequestContext {
    pub scope: Arc<RequestScope>,
    pub timer: RequestTimer,
    seen: HashSet<String>,
    pub type_hint: Option<String>,
}

impl RequestContext {
    pub fn new(scope: Arc<RequestScope>) -> Self {
        Self {
            scope,
            timer: RequestTimer::new(),
            seen: HashSet::new(),
            type_hint: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.scope.id
    }

    /// Record a template as rendered; false when it was already seen.
    pub fn mark_seen(&mut self, name: &str) -> bool {
        self.seen.insert(name.to_string())
    }

    pub fn has_seen(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    /// Template data for `data` (a JSON object) with the live `vars` store attached.
    pub fn template_data(&self, data: &JsonValue) -> minijinja::Value {
        template_value(&self.scope, data)
    }

    /// Render `source` as a template when it looks like one, otherwise return it verbatim.
    pub fn t(
        &self,
        engine: &dyn TemplateEngine,
        source: &str,
        data: &JsonValue,
    ) -> Result<String, DiecastError> {
        eval_inline(engine, source, &self.template_data(data), Some(&self.scope))
    }

    pub fn eval(
        &self,
        engine: &dyn TemplateEngine,
        expression: &str,
        data: &JsonValue,
    ) -> Result<JsonValue, DiecastError> {
        engine.eval_expression(expression, self.template_data(data), Some(&self.scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::MiniJinjaEngine;
    use actix_web::test::TestRequest;

    #[test]
    fn var_store_paths_push_pop_increment() {
        let vars = VarStore::new();
        vars.set("a.b", json!(1));
        assert_eq!(vars.get("a.b"), json!(1));
        assert_eq!(vars.get("a.missing"), JsonValue::Null);

        vars.push("list", json!("x"));
        vars.push("list", json!("y"));
        assert_eq!(vars.get("list"), json!(["x", "y"]));
        assert_eq!(vars.pop("list"), json!("y"));
        assert_eq!(vars.get("list"), json!(["x"]));

        vars.set("scalar", json!(5));
        vars.push("scalar", json!(6));
        assert_eq!(vars.get("scalar"), json!([5, 6]));

        assert_eq!(vars.increment("count"), json!(1));
        assert_eq!(vars.increment_by("count", 2.5), json!(3.5));
    }

    #[test]
    fn scope_reads_query_headers_and_payload() {
        let req = TestRequest::post()
            .uri("/things?tag=a&tag=b&n=3")
            .insert_header(("X-Custom-Thing", "yes"))
            .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
            .to_http_request();
        let scope = RequestScope::from_request(&req, b"name=diecast&size=2".to_vec(), "req-1");

        assert_eq!(scope.query_value("tag"), Some("a"));
        assert_eq!(scope.header("x-custom-thing"), Some("yes"));
        let query = scope.query_map(",");
        assert_eq!(query.get("tag"), Some(&json!("a,b")));
        assert_eq!(query.get("n"), Some(&json!(3)));
        assert_eq!(scope.header_map(", ").get("x_custom_thing"), Some(&json!("yes")));
        assert_eq!(scope.payload(), json!({"name": "diecast", "size": 2}));
    }

    #[test]
    fn request_data_applies_header_defaults() {
        let scope = RequestScope::detached("r", "GET", "/p").with_query(vec![("x".into(), "1".into())]);
        let mut header = TemplateHeader::default();
        header.defaults.insert("y".into(), "two".into());
        let data = scope.request_data(Some(&header));
        assert_eq!(data["url"]["query"], json!({"x": 1, "y": "two"}));
        assert_eq!(data["method"], json!("GET"));
        assert_eq!(data["id"], json!("r"));
    }

    #[test]
    fn seen_set_guards_recursion() {
        let mut ctx = RequestContext::new(Arc::new(RequestScope::detached("r", "GET", "/")));
        assert!(ctx.mark_seen("/a.html"));
        assert!(!ctx.mark_seen("/a.html"));
        assert!(ctx.has_seen("/a.html"));
    }

    #[test]
    fn templates_see_live_vars() {
        let engine = MiniJinjaEngine::default();
        let ctx = RequestContext::new(Arc::new(RequestScope::detached("r", "GET", "/")));
        ctx.scope.vars.set("greeting", json!("hi"));
        let out = ctx
            .t(&engine, "{{ vars.greeting }} {{ name }}", &json!({"name": "there"}))
            .expect("render");
        assert_eq!(out, "hi there");
        assert_eq!(ctx.t(&engine, "literal", &json!({})).expect("literal"), "literal");
    }
}
