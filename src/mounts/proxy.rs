// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Mount, MountResponse};
use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::util::duration;
use crate::util::mime_helper::DEFAULT_MIME_TYPE;
use crate::util::value::to_display;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Body, Certificate, Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BODY_BUFFER_SIZE: usize = 16535;
const MAX_REDIRECTS: usize = 10;

/// Headers never copied from the inbound request or the origin response.
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "transfer-encoding",
    "content-encoding",
    "keep-alive",
    "upgrade",
    "accept-encoding",
];

/// Options accepted under a proxy mount's `options` key.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct ProxyOptions {
    pub method: String,
    pub headers: BTreeMap<String, JsonValue>,
    #[serde(alias = "responseHeaders")]
    pub response_headers: BTreeMap<String, JsonValue>,
    #[serde(alias = "responseCode")]
    pub response_code: u16,
    #[serde(alias = "redirectOnSuccess")]
    pub redirect_on_success: String,
    pub params: Map<String, JsonValue>,
    #[serde(with = "duration::option")]
    pub timeout: Option<Duration>,
    pub insecure: bool,
    #[serde(alias = "bodyBufferSize")]
    pub body_buffer_size: usize,
    #[serde(alias = "passthroughRequests")]
    pub passthrough_requests: bool,
    #[serde(alias = "passthroughHeaders")]
    pub passthrough_headers: bool,
    #[serde(alias = "passthroughQueryStrings")]
    pub passthrough_query_strings: bool,
    #[serde(alias = "passthroughBody")]
    pub passthrough_body: bool,
    #[serde(alias = "passthroughErrors")]
    pub passthrough_errors: bool,
    #[serde(alias = "passthroughRedirects")]
    pub passthrough_redirects: bool,
    #[serde(alias = "passthroughUserAgent")]
    pub passthrough_user_agent: bool,
    #[serde(alias = "stripPathPrefix")]
    pub strip_path_prefix: String,
    #[serde(alias = "appendPathPrefix")]
    pub append_path_prefix: String,
    #[serde(alias = "closeConnection")]
    pub close_connection: Option<bool>,
}

impl ProxyOptions {
    pub fn from_options(options: &Map<String, JsonValue>) -> Result<Self, String> {
        serde_json::from_value(JsonValue::Object(options.clone())).map_err(|e| e.to_string())
    }

    pub fn timeout(&self) -> Duration {
        match self.timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_PROXY_TIMEOUT,
        }
    }

    pub fn body_buffer_size(&self) -> usize {
        if self.body_buffer_size == 0 {
            DEFAULT_BODY_BUFFER_SIZE
        } else {
            self.body_buffer_size
        }
    }

    fn forwards_headers(&self) -> bool {
        self.passthrough_requests || self.passthrough_headers
    }

    fn forwards_query(&self) -> bool {
        self.passthrough_requests || self.passthrough_query_strings
    }

    fn forwards_body(&self) -> bool {
        self.passthrough_requests || self.passthrough_body
    }
}

/// Origin rewrite learned from a followed redirect: `(from, to)` as `scheme://host[:port]`.
type OriginRewrite = Arc<Mutex<Option<(String, String)>>>;

fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Forwards requests under a mount point to a remote HTTP(S) origin.
pub struct ProxyMount {
    mount_point: String,
    target: String,
    options: ProxyOptions,
    client: Client,
    rewrite: OriginRewrite,
}

impl ProxyMount {
    pub fn new(
        mount_point: &str,
        target: &str,
        options: ProxyOptions,
        trusted_roots: &[Certificate],
    ) -> Result<Self, DiecastError> {
        Url::parse(target)
            .map_err(|e| DiecastError::Config(format!("invalid proxy target {:?}: {}", target, e)))?;

        let rewrite: OriginRewrite = Arc::new(Mutex::new(None));
        let policy = if options.passthrough_redirects {
            Policy::none()
        } else {
            let rewrite = rewrite.clone();
            Policy::custom(move |attempt| {
                if attempt.previous().len() > MAX_REDIRECTS {
                    return attempt.error("too many redirects");
                }
                if let Some(from) = attempt.previous().last() {
                    let (from, to) = (origin_of(from), origin_of(attempt.url()));
                    if from != to {
                        let mut slot = rewrite.lock().unwrap_or_else(|e| e.into_inner());
                        if slot.is_none() {
                            *slot = Some((from, to));
                        }
                    }
                }
                attempt.follow()
            })
        };

        let mut builder = Client::builder()
            .redirect(policy)
            .timeout(options.timeout());
        for root in trusted_roots {
            builder = builder.add_root_certificate(root.clone());
        }
        if options.insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        if options.close_connection.unwrap_or(false) {
            builder = builder.pool_max_idle_per_host(0);
        }

        Ok(Self {
            mount_point: mount_point.to_string(),
            target: target.to_string(),
            options,
            client: builder.build()?,
            rewrite,
        })
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// The target with any origin rewrite learned from an earlier redirect applied.
    pub fn effective_target(&self) -> String {
        let rewrite = self.rewrite.lock().unwrap_or_else(|e| e.into_inner());
        match rewrite.as_ref() {
            Some((from, to)) if self.target.starts_with(from.as_str()) => {
                format!("{}{}", to, &self.target[from.len()..])
            }
            _ => self.target.clone(),
        }
    }

    /// The outbound URL for `path` (the full request path, mount point included).
    fn outbound_url(&self, path: &str, scope: &RequestScope) -> Result<Url, DiecastError> {
        let target = self.effective_target();
        let parse = |raw: &str| {
            Url::parse(raw)
                .map_err(|e| DiecastError::Config(format!("invalid proxy URL for {}: {}", path, e)))
        };

        let mut url = if self.options.forwards_query() {
            let base = parse(&target)?;
            let mut url = base.clone();
            url.set_path(&scope.path);
            url.set_query(None);
            {
                let mut pairs = url.query_pairs_mut();
                for (name, value) in &scope.query {
                    pairs.append_pair(name, value);
                }
                for (name, value) in base.query_pairs() {
                    pairs.append_pair(&name, &value);
                }
            }
            if url.query() == Some("") {
                url.set_query(None);
            }
            url
        } else {
            parse(&format!(
                "{}/{}",
                target.trim_end_matches('/'),
                path.trim_start_matches('/')
            ))?
        };

        if !self.options.strip_path_prefix.is_empty()
            && let Some(stripped) = url.path().strip_prefix(self.options.strip_path_prefix.as_str())
        {
            let stripped = format!("/{}", stripped.trim_start_matches('/'));
            url.set_path(&stripped);
        }
        if !self.options.append_path_prefix.is_empty() {
            let prefixed = format!(
                "{}/{}",
                self.options.append_path_prefix.trim_end_matches('/'),
                url.path().trim_start_matches('/')
            );
            url.set_path(&prefixed);
        }

        if !self.options.params.is_empty() {
            let existing: Vec<String> = url.query_pairs().map(|(name, _)| name.into_owned()).collect();
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.options.params {
                if !existing.iter().any(|key| key == name) {
                    pairs.append_pair(name, &to_display(value));
                }
            }
        }
        Ok(url)
    }

    fn outbound_body(&self, body: &[u8]) -> Body {
        if body.len() <= self.options.body_buffer_size() {
            return Body::from(body.to_vec());
        }
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = body
            .chunks(self.options.body_buffer_size())
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Body::wrap_stream(futures_util::stream::iter(chunks))
    }
}

fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    Some((
        HeaderName::from_bytes(name.as_bytes()).ok()?,
        HeaderValue::from_str(value).ok()?,
    ))
}

#[async_trait]
impl Mount for ProxyMount {
    fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn kind(&self) -> &'static str {
        "proxy"
    }

    async fn open(&self, path: &str, scope: &Arc<RequestScope>) -> Result<MountResponse, DiecastError> {
        let id = &scope.id;
        let url = self.outbound_url(path, scope)?;
        let verb = if self.options.method.is_empty() {
            scope.method.to_ascii_uppercase()
        } else {
            self.options.method.to_ascii_uppercase()
        };
        let method = Method::from_bytes(verb.as_bytes())
            .map_err(|_| DiecastError::Config(format!("invalid proxy method {:?}", verb)))?;

        let mut request = self.client.request(method, url.clone());

        if self.options.forwards_headers() {
            for (name, value) in &scope.headers {
                let lower = name.to_ascii_lowercase();
                if SKIPPED_HEADERS.contains(&lower.as_str()) || lower == "host" {
                    continue;
                }
                if lower == "user-agent" && !self.options.passthrough_user_agent {
                    continue;
                }
                if let Some((name, value)) = header_pair(name, value) {
                    request = request.header(name, value);
                }
            }
        }
        if !self.options.passthrough_user_agent || scope.header("user-agent").is_none() {
            request = request.header(
                reqwest::header::USER_AGENT,
                concat!("diecast/", env!("CARGO_PKG_VERSION")),
            );
        }
        for (name, value) in &self.options.headers {
            if let Some((name, value)) = header_pair(name, &to_display(value)) {
                request = request.header(name, value);
            }
        }
        if let Some(close) = self.options.close_connection {
            request = request.header(
                reqwest::header::CONNECTION,
                if close { "close" } else { "keep-alive" },
            );
        }
        request = request.header(reqwest::header::ACCEPT_ENCODING, "identity");

        if self.options.forwards_body() && !scope.body.is_empty() {
            request = request.body(self.outbound_body(&scope.body));
        }

        info!("[{}] Proxy: > {} {}", id, verb, url);
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("[{}] Proxy: < error: {}", id, err);
                return Err(DiecastError::HardStop {
                    status: if err.is_timeout() { 504 } else { 502 },
                    message: format!("{} {}: {}", verb, url, err),
                });
            }
        };

        let status = response.status().as_u16();
        info!("[{}] Proxy: < HTTP {}", id, status);

        if response.status().is_redirection()
            && let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
        {
            return Ok(MountResponse::redirect(path, location, status));
        }

        if status >= 400 && !self.options.passthrough_errors {
            let body = response.text().await.unwrap_or_default();
            for line in body.lines().take(20) {
                debug!("[{}] Proxy: < {}", id, line);
            }
            return Err(DiecastError::HardStop {
                status,
                message: format!("{} {} responded with HTTP {}", verb, url, status),
            });
        }

        let mut headers: Vec<(String, String)> = Vec::new();
        let mut content_type = DEFAULT_MIME_TYPE.to_string();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else { continue };
            let lower = name.as_str();
            if SKIPPED_HEADERS.contains(&lower) {
                continue;
            }
            if lower == "content-type" {
                content_type = value.to_string();
                continue;
            }
            headers.push((name.as_str().to_string(), value.to_string()));
        }
        headers.push(("Content-Encoding".to_string(), "identity".to_string()));
        for (name, value) in &self.options.response_headers {
            headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
            headers.push((name.clone(), to_display(value)));
        }

        let data = response.bytes().await.map_err(|e| DiecastError::HardStop {
            status: 502,
            message: format!("{} {}: reading body: {}", verb, url, e),
        })?;

        if status < 300 && !self.options.redirect_on_success.is_empty() {
            return Ok(MountResponse::redirect(
                path,
                &self.options.redirect_on_success,
                StatusCode::TEMPORARY_REDIRECT.as_u16(),
            ));
        }

        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| path.to_string());

        let mut mounted = MountResponse::new(&name, &content_type, data.to_vec());
        mounted.status = if self.options.response_code > 0 {
            self.options.response_code
        } else {
            status
        };
        mounted.headers = headers;
        Ok(mounted)
    }
}
