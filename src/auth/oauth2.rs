// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{AuthOutcome, Authenticator, Options};
use crate::config::AuthenticatorConfig;
use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::util::csrf_helper::form_value;
use actix_web::HttpResponse;
use actix_web::cookie::{Cookie, SameSite, time::Duration as CookieDuration};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

pub const DEFAULT_OAUTH2_SESSION_COOKIE: &str = "DCO2SESSION";
const MAX_SESSIONS: usize = 10_000;
const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Authorization and token endpoints of an OAuth2 provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub auth_url: String,
    pub token_url: String,
}

impl Endpoint {
    fn new(auth_url: &str, token_url: &str) -> Self {
        Self {
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
        }
    }
}

/// Endpoints of the well-known providers.
pub fn provider_endpoint(provider: &str) -> Option<Endpoint> {
    let endpoint = match provider {
        "amazon" => Endpoint::new("https://www.amazon.com/ap/oa", "https://api.amazon.com/auth/o2/token"),
        "facebook" => Endpoint::new(
            "https://www.facebook.com/v3.2/dialog/oauth",
            "https://graph.facebook.com/v3.2/oauth/access_token",
        ),
        "github" => Endpoint::new(
            "https://github.com/login/oauth/authorize",
            "https://github.com/login/oauth/access_token",
        ),
        "gitlab" => Endpoint::new("https://gitlab.com/oauth/authorize", "https://gitlab.com/oauth/token"),
        "google" => Endpoint::new(
            "https://accounts.google.com/o/oauth2/auth",
            "https://oauth2.googleapis.com/token",
        ),
        "microsoft-live" => Endpoint::new(
            "https://login.live.com/oauth20_authorize.srf",
            "https://login.live.com/oauth20_token.srf",
        ),
        "slack" => Endpoint::new("https://slack.com/oauth/authorize", "https://slack.com/api/oauth.access"),
        "spotify" => Endpoint::new(
            "https://accounts.spotify.com/authorize",
            "https://accounts.spotify.com/api/token",
        ),
        _ => return None,
    };
    Some(endpoint)
}

#[derive(Debug, Clone, Default)]
struct OauthSession {
    /// Where the user was headed when the flow started.
    path: String,
    scheme: String,
    domain: String,
    token: Option<String>,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, OauthSession>,
    order: VecDeque<String>,
}

impl SessionTable {
    fn insert(&mut self, id: String, session: OauthSession) {
        if self.sessions.insert(id.clone(), session).is_none() {
            self.order.push_back(id);
        }
        while self.sessions.len() > MAX_SESSIONS {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.sessions.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

/// Three-legged OAuth2 authorization-code flow with in-memory sessions.
///
/// Leg 1 redirects cookieless visitors to the provider with a fresh session id as `state`.
/// Leg 2 lands on the callback path, exchanges the code for a token and sets the session cookie.
pub struct OauthAuthenticator {
    name: String,
    client_id: String,
    secret: String,
    callback: String,
    scopes: Vec<String>,
    endpoint: Endpoint,
    cookie_name: String,
    lifetime: Option<Duration>,
    client: reqwest::Client,
    sessions: RwLock<SessionTable>,
}

impl OauthAuthenticator {
    pub fn from_config(
        config: &AuthenticatorConfig,
        trusted_roots: &[reqwest::Certificate],
    ) -> Result<Self, DiecastError> {
        let options = Options(&config.options);
        let required = |key: &str| {
            let value = options.string(key, "");
            if value.is_empty() {
                Err(DiecastError::Config(format!(
                    "the '{}' option is required for the oauth2 authenticator",
                    key
                )))
            } else {
                Ok(value)
            }
        };
        let client_id = required("client_id")?;
        let secret = required("secret")?;
        if config.callback_path.is_empty() {
            return Err(DiecastError::Config(
                "the 'callback' option is required for the oauth2 authenticator".to_string(),
            ));
        }

        let provider = options.string("provider", "");
        let endpoint = match provider_endpoint(&provider) {
            Some(endpoint) => endpoint,
            None => {
                let custom = Endpoint::new(&options.string("auth_url", ""), &options.string("token_url", ""));
                if custom.auth_url.is_empty() || custom.token_url.is_empty() {
                    return Err(DiecastError::Config(format!(
                        "unrecognized OAuth2 provider {:?}; custom endpoints need 'auth_url' and 'token_url'",
                        provider
                    )));
                }
                custom
            }
        };

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(TOKEN_EXCHANGE_TIMEOUT);
        for root in trusted_roots {
            builder = builder.add_root_certificate(root.clone());
        }
        let client = builder.build()?;

        Ok(Self {
            name: if config.name.is_empty() {
                "OauthAuthenticator".to_string()
            } else {
                config.name.clone()
            },
            client_id,
            secret,
            callback: config.callback_path.clone(),
            scopes: options.strings("scopes"),
            endpoint,
            cookie_name: options.string("cookie_name", DEFAULT_OAUTH2_SESSION_COOKIE),
            lifetime: options.duration("lifetime").filter(|d| !d.is_zero()),
            client,
            sessions: RwLock::new(SessionTable::default()),
        })
    }

    /// The path component of the configured callback, which may be a full URL.
    fn callback_path(&self) -> &str {
        let callback = self.callback.as_str();
        let without_scheme = callback
            .split_once("://")
            .map(|(_, rest)| rest.find('/').map(|i| &rest[i..]).unwrap_or("/"))
            .unwrap_or(callback);
        without_scheme.split(['?', '#']).next().unwrap_or("/")
    }

    /// The provider consent URL for a session id.
    pub fn auth_code_url(&self, state: &str) -> String {
        let mut params = vec![
            ("response_type", "code".to_string()),
            ("client_id", self.client_id.clone()),
            ("redirect_uri", self.callback.clone()),
        ];
        if !self.scopes.is_empty() {
            params.push(("scope", self.scopes.join(" ")));
        }
        params.push(("state", state.to_string()));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let joiner = if self.endpoint.auth_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.endpoint.auth_url, joiner, query)
    }

    fn session(&self, id: &str) -> Option<OauthSession> {
        let table = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        table.sessions.get(id).cloned()
    }

    fn begin(&self, scope: &RequestScope) -> AuthOutcome {
        let state = crate::headers::generate_request_id();
        let session = OauthSession {
            path: scope.uri.clone(),
            scheme: scope.scheme.clone(),
            domain: scope.host.split(':').next().unwrap_or("").to_string(),
            token: None,
        };
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(state.clone(), session);
        debug!("[{}] oauth2: starting session, redirecting to provider", scope.id);

        AuthOutcome::Respond(
            HttpResponse::TemporaryRedirect()
                .insert_header(("Location", self.auth_code_url(&state)))
                .finish(),
        )
    }

    async fn exchange(&self, code: &str) -> Result<String, String> {
        let response = self
            .client
            .post(&self.endpoint.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.callback.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.secret.as_str()),
            ])
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| err.to_string())?;
        if !status.is_success() {
            return Err(format!("token endpoint returned HTTP {}", status.as_u16()));
        }

        let token = match serde_json::from_slice::<Value>(&body) {
            Ok(json) => json
                .get("access_token")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(_) => form_value(&body, "access_token"),
        };
        token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| "token response did not include an access_token".to_string())
    }
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest()
        .content_type("text/plain; charset=utf-8")
        .body(message.to_string())
}

#[async_trait]
impl Authenticator for OauthAuthenticator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_callback(&self, path: &str) -> bool {
        self.callback_path().trim_end_matches('/') == path.trim_end_matches('/')
    }

    async fn callback(&self, scope: &RequestScope) -> Result<HttpResponse, DiecastError> {
        let state = scope.query_value("state").unwrap_or("");
        let code = scope.query_value("code").unwrap_or("");

        let Some(session) = self.session(state).filter(|_| !state.is_empty()) else {
            return Ok(bad_request("OAuth2 session does not exist"));
        };

        let token = match self.exchange(code).await {
            Ok(token) => token,
            Err(err) => {
                warn!("[{}] oauth2: code exchange failed: {}", scope.id, err);
                return Ok(bad_request(&err));
            }
        };

        {
            let mut table = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            if let Some(stored) = table.sessions.get_mut(state) {
                stored.token = Some(token);
            }
        }

        let mut cookie = Cookie::build(self.cookie_name.clone(), state.to_string())
            .path("/")
            .secure(session.scheme == "https")
            .http_only(true)
            .same_site(SameSite::Lax)
            .finish();
        if !session.domain.is_empty() && session.domain != "localhost" && !session.domain.starts_with("127.") {
            cookie.set_domain(session.domain.clone());
        }
        if let Some(lifetime) = self.lifetime {
            cookie.set_max_age(CookieDuration::seconds(lifetime.as_secs() as i64));
        }

        let destination = if session.path.is_empty() { "/".to_string() } else { session.path };
        Ok(HttpResponse::TemporaryRedirect()
            .cookie(cookie)
            .insert_header(("Location", destination))
            .finish())
    }

    async fn authenticate(&self, scope: &RequestScope) -> Result<AuthOutcome, DiecastError> {
        match scope.cookie(&self.cookie_name) {
            Some(id) => match self.session(&id) {
                Some(session) if session.token.is_some() => Ok(AuthOutcome::allow()),
                Some(_) => Ok(AuthOutcome::forbidden("OAuth2 session is not authorized")),
                None => Ok(self.begin(scope)),
            },
            None => Ok(self.begin(scope)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpServer, web};
    use serde_json::json;

    async fn token_handler(form: web::Form<HashMap<String, String>>) -> HttpResponse {
        if form.get("code").map(String::as_str) == Some("good-code")
            && form.get("client_secret").map(String::as_str) == Some("s3cret")
        {
            HttpResponse::Ok().json(json!({"access_token": "tok-1", "token_type": "bearer"}))
        } else {
            HttpResponse::BadRequest().json(json!({"error": "invalid_grant"}))
        }
    }

    fn spawn_provider() -> String {
        let server = HttpServer::new(|| App::new().route("/token", web::post().to(token_handler)))
            .workers(1)
            .bind(("127.0.0.1", 0))
            .expect("bind provider");
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        format!("http://{}", addr)
    }

    fn authenticator(provider: &str) -> OauthAuthenticator {
        OauthAuthenticator::from_config(
            &AuthenticatorConfig {
                kind: "oauth2".to_string(),
                callback_path: "http://site.example/_auth/callback".to_string(),
                options: json!({
                    "client_id": "cid",
                    "secret": "s3cret",
                    "scopes": ["read", "email"],
                    "auth_url": format!("{}/authorize", provider),
                    "token_url": format!("{}/token", provider),
                })
                .as_object()
                .cloned()
                .expect("object"),
                ..AuthenticatorConfig::default()
            },
            &[],
        )
        .expect("authenticator")
    }

    fn location(response: &HttpResponse) -> String {
        response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn known_providers_and_required_options() {
        assert!(provider_endpoint("github").is_some());
        assert!(provider_endpoint("microsoft-live").is_some());
        assert!(provider_endpoint("myspace").is_none());

        let missing = AuthenticatorConfig {
            kind: "oauth2".to_string(),
            options: json!({"client_id": "x", "secret": "y", "provider": "myspace"})
                .as_object()
                .cloned()
                .expect("object"),
            callback_path: "/cb".to_string(),
            ..AuthenticatorConfig::default()
        };
        assert!(OauthAuthenticator::from_config(&missing, &[]).is_err());
    }

    #[test]
    fn consent_url_carries_client_and_state() {
        let auth = authenticator("https://id.example");
        let url = auth.auth_code_url("abc");
        assert!(url.starts_with("https://id.example/authorize?response_type=code&client_id=cid"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Fsite.example%2F_auth%2Fcallback"));
        assert!(url.contains("scope=read%20email"));
        assert!(url.ends_with("&state=abc"));
        assert!(auth.is_callback("/_auth/callback/"));
        assert!(!auth.is_callback("/_auth"));
    }

    #[actix_web::test]
    async fn full_flow_sets_a_session_cookie() {
        let provider = spawn_provider();
        let auth = authenticator(&provider);

        let visitor = RequestScope::detached("oauth-test", "GET", "/members");
        let state = match auth.authenticate(&visitor).await.expect("leg 1") {
            AuthOutcome::Respond(response) => {
                assert_eq!(response.status().as_u16(), 307);
                let location = location(&response);
                location.rsplit("state=").next().unwrap_or_default().to_string()
            }
            other => panic!("expected a redirect, got {:?}", other),
        };
        assert!(!state.is_empty());

        let rejected = RequestScope::detached("oauth-test", "GET", "/_auth/callback").with_query(vec![
            ("state".to_string(), state.clone()),
            ("code".to_string(), "bad-code".to_string()),
        ]);
        assert_eq!(auth.callback(&rejected).await.expect("callback").status().as_u16(), 400);

        let callback = RequestScope::detached("oauth-test", "GET", "/_auth/callback").with_query(vec![
            ("state".to_string(), state.clone()),
            ("code".to_string(), "good-code".to_string()),
        ]);
        let response = auth.callback(&callback).await.expect("callback");
        assert_eq!(response.status().as_u16(), 307);
        assert_eq!(location(&response), "/members");
        let cookie = response
            .cookies()
            .find(|cookie| cookie.name() == DEFAULT_OAUTH2_SESSION_COOKIE)
            .expect("session cookie");
        assert_eq!(cookie.value(), state);

        let returning = RequestScope::detached("oauth-test", "GET", "/members").with_headers(vec![(
            "Cookie".to_string(),
            format!("{}={}", DEFAULT_OAUTH2_SESSION_COOKIE, state),
        )]);
        assert!(auth.authenticate(&returning).await.expect("leg 3").is_allowed());
    }

    #[actix_web::test]
    async fn unknown_state_is_refused() {
        let auth = authenticator("https://id.example");
        let scope = RequestScope::detached("oauth-test", "GET", "/_auth/callback")
            .with_query(vec![("state".to_string(), "nope".to_string())]);
        assert_eq!(auth.callback(&scope).await.expect("callback").status().as_u16(), 400);
    }
}
