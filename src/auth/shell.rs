// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{AuthOutcome, Authenticator, Options};
use crate::config::AuthenticatorConfig;
use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::util::csrf_helper::same_site;
use crate::util::globs::is_glob_match;
use crate::util::process::feed_and_wait;
use crate::util::value::{env_name, flatten, to_display};
use actix_web::cookie::{Cookie, time::Duration as CookieDuration};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_SHELL_SESSION_COOKIE: &str = "DCSESSION";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellAction {
    Create,
    Verify,
    Remove,
}

impl ShellAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellAction::Create => "create",
            ShellAction::Verify => "verify",
            ShellAction::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SessionCookie {
    name: String,
    path: String,
    domain: String,
    http_only: bool,
    secure: Option<bool>,
    same_site: String,
    lifetime: Option<Duration>,
}

/// Delegates the decision to an external command.
///
/// Without a session cookie the command runs with `DIECAST_AUTH_ACTION=create` and its trimmed
/// stdout becomes the session cookie. With one, it runs as `verify` (or `remove` on the
/// `deauth_path`) with the cookie value on stdin. Exit status 0 means success.
pub struct ShellAuthenticator {
    name: String,
    command: Vec<String>,
    deauth_path: Option<String>,
    disable_cookies: bool,
    cookie: SessionCookie,
    timeout: Duration,
}

impl ShellAuthenticator {
    pub fn from_config(config: &AuthenticatorConfig) -> Result<Self, DiecastError> {
        let options = Options(&config.options);
        let command = match options.get("command") {
            Some(serde_json::Value::Array(_)) => options.strings("command"),
            Some(serde_json::Value::String(line)) if !line.trim().is_empty() => {
                vec!["sh".to_string(), "-c".to_string(), line.clone()]
            }
            _ => Vec::new(),
        };
        if command.is_empty() {
            return Err(DiecastError::Config(
                "shell authenticator: command cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            name: if config.name.is_empty() {
                "ShellAuthenticator".to_string()
            } else {
                config.name.clone()
            },
            command,
            deauth_path: Some(options.string("deauth_path", "")).filter(|p| !p.is_empty()),
            disable_cookies: options.bool("disable_cookies").unwrap_or(false),
            cookie: SessionCookie {
                name: options.string("cookie_name", DEFAULT_SHELL_SESSION_COOKIE),
                path: options.string("cookie_path", ""),
                domain: options.string("cookie_domain", ""),
                http_only: options.bool("cookie_http_only").unwrap_or(false),
                secure: options.bool("cookie_secure"),
                same_site: options.string("cookie_samesite", ""),
                lifetime: options.duration("cookie_lifetime").filter(|d| !d.is_zero()),
            },
            timeout: options.duration("timeout").unwrap_or(DEFAULT_COMMAND_TIMEOUT),
        })
    }

    /// Which action a request maps to, plus the session value to feed on stdin.
    pub fn action_for(&self, scope: &RequestScope) -> (ShellAction, Option<String>) {
        let session = scope.cookie(&self.cookie.name);
        match session {
            Some(_) if self.disable_cookies => (ShellAction::Create, None),
            None => (ShellAction::Create, None),
            Some(value)
                if self
                    .deauth_path
                    .as_deref()
                    .is_some_and(|pattern| is_glob_match(&scope.path, pattern)) =>
            {
                (ShellAction::Remove, Some(value))
            }
            Some(value) => (ShellAction::Verify, Some(value)),
        }
    }

    /// `DIECAST_AUTH_*` variables describing the request.
    pub fn environment(&self, scope: &RequestScope, action: ShellAction) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("DIECAST_AUTH_ACTION".to_string(), action.as_str().to_string());
        env.insert("DIECAST_AUTH_URL".to_string(), scope.uri.clone());
        env.insert("DIECAST_AUTH_PATH".to_string(), scope.path.clone());
        env.insert("DIECAST_AUTH_METHOD".to_string(), scope.method.clone());
        env.insert(
            "DIECAST_AUTH_REMOTE_ADDR".to_string(),
            scope.remote_addr.clone().unwrap_or_default(),
        );

        let payload = scope.payload();
        if payload.is_object() {
            for (key, value) in flatten(&payload, "__") {
                env.insert(env_name("DIECAST_AUTH_BODY_", &key), value);
            }
        }
        for (name, value) in scope.header_map(",") {
            env.insert(env_name("DIECAST_AUTH_HEADER_", &name), to_display(&value));
        }
        for (name, value) in scope.query_map(",") {
            env.insert(env_name("DIECAST_AUTH_QUERY_", &name), to_display(&value));
        }
        env
    }

    fn build_cookie(&self, value: String) -> Cookie<'static> {
        let mut cookie = Cookie::build(self.cookie.name.clone(), value)
            .http_only(self.cookie.http_only)
            .secure(true)
            .finish();
        if !self.cookie.path.is_empty() {
            cookie.set_path(self.cookie.path.clone());
        }
        if !self.cookie.domain.is_empty() {
            cookie.set_domain(self.cookie.domain.clone());
        }
        cookie
    }

    async fn run(
        &self,
        scope: &RequestScope,
        action: ShellAction,
        stdin: Option<String>,
    ) -> Result<(bool, String), DiecastError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| DiecastError::Config("empty command".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .envs(self.environment(scope, action))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let input = stdin.as_deref().unwrap_or_default().as_bytes();
        let output = tokio::time::timeout(self.timeout, feed_and_wait(child, input))
            .await
            .map_err(|_| DiecastError::Timeout(format!("auth command timed out after {:?}", self.timeout)))??;

        for line in String::from_utf8_lossy(&output.stderr).lines().filter(|l| !l.trim().is_empty()) {
            warn!("[{}] {}: {}", scope.id, self.name, line);
        }
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }
}

#[async_trait]
impl Authenticator for ShellAuthenticator {
    fn name(&self) -> &str {
        &self.name
    }

    fn needs_body(&self) -> bool {
        true
    }

    async fn authenticate(&self, scope: &RequestScope) -> Result<AuthOutcome, DiecastError> {
        let (action, stdin) = self.action_for(scope);
        let (success, stdout) = self.run(scope, action, stdin).await?;
        debug!(
            "[{}] shell auth {} exited {}",
            scope.id,
            action.as_str(),
            if success { "successfully" } else { "with failure" }
        );

        match (action, success) {
            (ShellAction::Create, true) => {
                let mut cookies = Vec::new();
                if !self.disable_cookies && !stdout.is_empty() {
                    let mut cookie = self.build_cookie(stdout);
                    if let Some(lifetime) = self.cookie.lifetime {
                        cookie.set_max_age(CookieDuration::seconds(lifetime.as_secs() as i64));
                    }
                    if let Some(secure) = self.cookie.secure {
                        cookie.set_secure(secure);
                    }
                    if let Some(same_site) = same_site(&self.cookie.same_site) {
                        cookie.set_same_site(same_site);
                    }
                    cookies.push(cookie);
                }
                Ok(AuthOutcome::Allow { cookies })
            }
            (ShellAction::Verify, true) => Ok(AuthOutcome::allow()),
            (ShellAction::Remove, true) => {
                let mut cookie = self.build_cookie(String::new());
                cookie.make_removal();
                Ok(AuthOutcome::Respond(
                    actix_web::HttpResponse::Forbidden()
                        .cookie(cookie)
                        .content_type("text/plain; charset=utf-8")
                        .body("Session removed"),
                ))
            }
            (_, false) => Ok(AuthOutcome::forbidden("Forbidden")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn authenticator(options: serde_json::Value) -> ShellAuthenticator {
        ShellAuthenticator::from_config(&AuthenticatorConfig {
            kind: "shell".to_string(),
            options: options.as_object().cloned().expect("object"),
            ..AuthenticatorConfig::default()
        })
        .expect("authenticator")
    }

    fn with_cookie(path: &str, value: &str) -> RequestScope {
        RequestScope::detached("shell-auth", "GET", path)
            .with_headers(vec![("Cookie".to_string(), format!("DCSESSION={}", value))])
    }

    #[test]
    fn command_is_required() {
        assert!(ShellAuthenticator::from_config(&AuthenticatorConfig::default()).is_err());
    }

    #[test]
    fn cookies_choose_the_action() {
        let auth = authenticator(json!({"command": "true", "deauth_path": "/logout"}));
        let fresh = RequestScope::detached("shell-auth", "GET", "/");
        assert_eq!(auth.action_for(&fresh), (ShellAction::Create, None));
        assert_eq!(
            auth.action_for(&with_cookie("/", "s1")),
            (ShellAction::Verify, Some("s1".to_string()))
        );
        assert_eq!(auth.action_for(&with_cookie("/logout", "s1")).0, ShellAction::Remove);

        let cookieless = authenticator(json!({"command": "true", "disable_cookies": true}));
        assert_eq!(cookieless.action_for(&with_cookie("/", "s1")).0, ShellAction::Create);
    }

    #[test]
    fn environment_describes_the_request() {
        let auth = authenticator(json!({"command": "true"}));
        let scope = RequestScope::detached("shell-auth", "POST", "/login")
            .with_query(vec![("next".to_string(), "/home".to_string())])
            .with_headers(vec![
                ("X-Forwarded-For".to_string(), "1.2.3.4".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ])
            .with_body(br#"{"user":{"name":"ann"}}"#.to_vec());
        let env = auth.environment(&scope, ShellAction::Create);
        assert_eq!(env.get("DIECAST_AUTH_ACTION").map(String::as_str), Some("create"));
        assert_eq!(env.get("DIECAST_AUTH_METHOD").map(String::as_str), Some("POST"));
        assert_eq!(env.get("DIECAST_AUTH_PATH").map(String::as_str), Some("/login"));
        assert_eq!(env.get("DIECAST_AUTH_QUERY_NEXT").map(String::as_str), Some("/home"));
        assert_eq!(env.get("DIECAST_AUTH_HEADER_X_FORWARDED_FOR").map(String::as_str), Some("1.2.3.4"));
        assert_eq!(env.get("DIECAST_AUTH_BODY_USER_NAME").map(String::as_str), Some("ann"));
    }

    #[actix_web::test]
    async fn create_issues_the_command_output_as_session() {
        let auth = authenticator(json!({
            "command": "echo token-$DIECAST_AUTH_ACTION",
            "cookie_path": "/",
            "cookie_samesite": "strict"
        }));
        let outcome = auth
            .authenticate(&RequestScope::detached("shell-auth", "GET", "/"))
            .await
            .expect("outcome");
        match outcome {
            AuthOutcome::Allow { cookies } => {
                assert_eq!(cookies.len(), 1);
                assert_eq!(cookies[0].name(), DEFAULT_SHELL_SESSION_COOKIE);
                assert_eq!(cookies[0].value(), "token-create");
                assert_eq!(cookies[0].path(), Some("/"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[actix_web::test]
    async fn verify_follows_the_exit_status() {
        let checker = authenticator(json!({"command": r#"read token; test "$token" = good"#}));
        assert!(checker.authenticate(&with_cookie("/", "good")).await.expect("outcome").is_allowed());
        assert!(!checker.authenticate(&with_cookie("/", "bad")).await.expect("outcome").is_allowed());
    }

    #[actix_web::test]
    async fn deauth_clears_the_cookie() {
        let auth = authenticator(json!({"command": ["true"], "deauth_path": "/logout"}));
        match auth.authenticate(&with_cookie("/logout", "s1")).await.expect("outcome") {
            AuthOutcome::Respond(response) => {
                let cleared = response
                    .cookies()
                    .find(|cookie| cookie.name() == DEFAULT_SHELL_SESSION_COOKIE)
                    .expect("removal cookie");
                assert_eq!(cleared.value(), "");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
