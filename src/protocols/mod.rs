// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Scheme-dispatched transports used by bindings and action steps.

pub mod decode;
pub mod file;
pub mod http;
pub mod redis;
pub mod shell;
pub mod unix;

use crate::error::DiecastError;
use crate::util::duration::parse_duration;
use crate::util::value::to_display;
use async_trait::async_trait;
use log::debug;
use reqwest::Url;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use decode::decode_body;

/// Inbound header carrying the name of the binding that issued a request; used for loop detection.
pub const BINDING_HEADER: &str = "X-Diecast-Binding";

/// A fully prepared outbound request. Templating has already been applied.
#[derive(Debug, Clone)]
pub struct ProtocolRequest {
    pub request_id: String,
    pub binding_name: String,
    pub verb: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
    pub insecure: bool,
    pub tls_cert: String,
    pub tls_key: String,
}

impl ProtocolRequest {
    pub fn new(request_id: &str, verb: &str, url: Url, timeout: Duration) -> Self {
        Self {
            request_id: request_id.to_string(),
            binding_name: String::new(),
            verb: verb.to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            body: None,
            timeout,
            insecure: false,
            tls_cert: String::new(),
            tls_key: String::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replace any existing value for `name`.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolResponse {
    pub mime_type: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProtocolResponse {
    pub fn ok(mime_type: &str, body: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    pub fn decode(&self, parser: &str) -> Result<JsonValue, DiecastError> {
        decode_body(&self.body, &self.mime_type, parser)
    }
}

#[async_trait]
pub trait Protocol: Send + Sync {
    async fn retrieve(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, DiecastError>;
}

/// Per-scheme options from the `protocols` config section.
#[derive(Debug, Clone, Default)]
pub struct ProtocolOptions(Map<String, JsonValue>);

impl ProtocolOptions {
    pub fn new(options: Map<String, JsonValue>) -> Self {
        Self(options)
    }

    pub fn string(&self, key: &str, fallback: &str) -> String {
        self.0
            .get(key)
            .map(to_display)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn usize(&self, key: &str, fallback: usize) -> usize {
        self.0
            .get(key)
            .and_then(crate::util::value::as_f64)
            .map(|n| n as usize)
            .unwrap_or(fallback)
    }

    pub fn duration(&self, key: &str, fallback: Duration) -> Duration {
        match self.0.get(key) {
            Some(JsonValue::Number(n)) => n.as_f64().map(Duration::from_secs_f64).unwrap_or(fallback),
            Some(JsonValue::String(s)) => parse_duration(s).unwrap_or(fallback),
            _ => fallback,
        }
    }
}

pub struct ProtocolRegistry {
    protocols: HashMap<String, Arc<dyn Protocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            protocols: HashMap::new(),
        }
    }

    /// Registry with every built-in scheme.
    pub fn with_defaults(
        trusted_root_pems: &[String],
        options: &HashMap<String, Map<String, JsonValue>>,
    ) -> Result<Self, DiecastError> {
        let option = |scheme: &str| ProtocolOptions::new(options.get(scheme).cloned().unwrap_or_default());

        let http: Arc<dyn Protocol> = Arc::new(http::HttpProtocol::new(trusted_root_pems)?);
        let unix: Arc<dyn Protocol> = Arc::new(unix::UnixProtocol);

        let mut registry = Self::new();
        registry.register("http", http.clone());
        registry.register("https", http);
        registry.register("http+unix", unix.clone());
        registry.register("https+unix", unix);
        registry.register("redis", Arc::new(redis::RedisProtocol::new(option("redis"))));
        registry.register("file", Arc::new(file::FileProtocol));
        registry.register("shell", Arc::new(shell::ShellProtocol));
        Ok(registry)
    }

    pub fn register(&mut self, scheme: &str, protocol: Arc<dyn Protocol>) {
        self.protocols.insert(scheme.to_ascii_lowercase(), protocol);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Protocol>> {
        self.protocols.get(&scheme.to_ascii_lowercase()).cloned()
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.protocols.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    pub async fn retrieve(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, DiecastError> {
        let scheme = request.url.scheme();
        let protocol = self.get(scheme).ok_or_else(|| {
            DiecastError::Protocol(format!("no protocol registered for scheme {:?}", scheme))
        })?;
        debug!(
            "[{}] {} {} via {}",
            request.request_id, request.verb, request.url, scheme
        );
        protocol.retrieve(request).await
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Percent-decode one URL component.
pub(crate) fn decode_component(input: &str) -> String {
    urlencoding::decode(input)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| input.to_string())
}
