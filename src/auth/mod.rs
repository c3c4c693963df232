// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Authenticators: ordered, path-scoped gatekeepers run before any content is resolved.

pub mod basic;
pub mod middleware;
pub mod oauth2;
pub mod request;
pub mod shell;

use crate::config::AuthenticatorConfig;
use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::util::duration::parse_duration;
use crate::util::globs::GlobSet;
use actix_web::HttpResponse;
use actix_web::cookie::Cookie;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub use middleware::AuthMiddlewareFactory;

/// What an authenticator decided about one request.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Continue down the pipeline, attaching `cookies` to whatever response it produces.
    Allow { cookies: Vec<Cookie<'static>> },
    /// Stop here and send this response.
    Respond(HttpResponse),
}

impl AuthOutcome {
    pub fn allow() -> Self {
        AuthOutcome::Allow {
            cookies: Vec::new(),
        }
    }

    pub fn forbidden(message: &str) -> Self {
        AuthOutcome::Respond(
            HttpResponse::Forbidden()
                .content_type("text/plain; charset=utf-8")
                .body(message.to_string()),
        )
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthOutcome::Allow { .. })
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the authenticator needs the request body in its scope.
    fn needs_body(&self) -> bool {
        false
    }

    fn is_callback(&self, _path: &str) -> bool {
        false
    }

    async fn callback(&self, scope: &RequestScope) -> Result<HttpResponse, DiecastError> {
        Err(DiecastError::not_found(scope.path.clone()))
    }

    async fn authenticate(&self, scope: &RequestScope) -> Result<AuthOutcome, DiecastError>;
}

/// Typed access to the free-form `options` map of an authenticator or validator.
#[derive(Debug, Clone, Copy)]
pub struct Options<'a>(pub &'a Map<String, Value>);

impl<'a> Options<'a> {
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    pub fn string(&self, key: &str, fallback: &str) -> String {
        match self.get(key) {
            Some(Value::String(value)) => value.clone(),
            Some(Value::Bool(value)) => value.to_string(),
            Some(Value::Number(value)) => value.to_string(),
            _ => fallback.to_string(),
        }
    }

    /// A single string or a list of strings.
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(value)) if !value.is_empty() => vec![value.clone()],
            _ => Vec::new(),
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(value) => Some(*value),
            Value::String(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            Value::Number(value) => value.as_f64().map(|n| n != 0.0),
            _ => None,
        }
    }

    pub fn duration(&self, key: &str) -> Option<Duration> {
        match self.get(key)? {
            Value::String(value) => parse_duration(value).ok(),
            Value::Number(value) => value.as_f64().filter(|n| *n >= 0.0).map(Duration::from_secs_f64),
            _ => None,
        }
    }

    pub fn map(&self, key: &str) -> Map<String, Value> {
        match self.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// Always allows (`always`, `allow`) or always forbids (`never`, `deny`).
pub struct StaticAuthenticator {
    name: String,
    allow: bool,
}

impl StaticAuthenticator {
    pub fn new(name: &str, allow: bool) -> Self {
        Self {
            name: if name.is_empty() {
                "StaticAuthenticator".to_string()
            } else {
                name.to_string()
            },
            allow,
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, _scope: &RequestScope) -> Result<AuthOutcome, DiecastError> {
        if self.allow {
            Ok(AuthOutcome::allow())
        } else {
            Ok(AuthOutcome::forbidden("Forbidden"))
        }
    }
}

pub fn build_authenticator(
    config: &AuthenticatorConfig,
    trusted_roots: &[reqwest::Certificate],
) -> Result<Arc<dyn Authenticator>, DiecastError> {
    let authenticator: Arc<dyn Authenticator> = match config.kind.as_str() {
        "basic" => Arc::new(basic::BasicAuthenticator::from_config(config)?),
        "oauth2" => Arc::new(oauth2::OauthAuthenticator::from_config(config, trusted_roots)?),
        "request" => Arc::new(request::RequestAuthenticator::from_config(config)?),
        "shell" => Arc::new(shell::ShellAuthenticator::from_config(config)?),
        "always" | "allow" => Arc::new(StaticAuthenticator::new(&config.name, true)),
        "never" | "deny" => Arc::new(StaticAuthenticator::new(&config.name, false)),
        other => {
            return Err(DiecastError::Config(format!(
                "unrecognized authenticator type {:?}",
                other
            )));
        }
    };
    Ok(authenticator)
}

struct ScopedAuthenticator {
    paths: GlobSet,
    except: GlobSet,
    authenticator: Arc<dyn Authenticator>,
}

/// The configured authenticators in order, each built once at startup.
#[derive(Default)]
pub struct AuthenticatorSet {
    entries: Vec<ScopedAuthenticator>,
}

impl AuthenticatorSet {
    pub fn from_config(
        configs: &[AuthenticatorConfig],
        trusted_roots: &[reqwest::Certificate],
    ) -> Result<Self, DiecastError> {
        let mut set = Self::default();
        for config in configs {
            set.push(
                &config.paths,
                &config.except,
                build_authenticator(config, trusted_roots)?,
            );
        }
        Ok(set)
    }

    pub fn push(&mut self, paths: &[String], except: &[String], authenticator: Arc<dyn Authenticator>) {
        self.entries.push(ScopedAuthenticator {
            paths: GlobSet::new(paths),
            except: GlobSet::new(except),
            authenticator,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The authenticator that owns `path` as its callback URL, regardless of its path scope.
    pub fn callback_for(&self, path: &str) -> Option<&Arc<dyn Authenticator>> {
        self.entries
            .iter()
            .map(|entry| &entry.authenticator)
            .find(|authenticator| authenticator.is_callback(path))
    }

    /// The first authenticator whose paths match (empty paths match everything) and whose
    /// except patterns do not.
    pub fn for_path(&self, path: &str) -> Option<&Arc<dyn Authenticator>> {
        self.entries
            .iter()
            .find(|entry| entry.paths.allows(path) && !entry.except.is_match(path))
            .map(|entry| &entry.authenticator)
    }
}
