// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{AuthOutcome, Authenticator, Options};
use crate::config::AuthenticatorConfig;
use crate::context::RequestScope;
use crate::error::DiecastError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::warn;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::PathBuf;

const APR1_MAGIC: &str = "$apr1$";
const ITOA64: &[u8] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// HTTP Basic authentication against htpasswd files and inline `credentials`.
pub struct BasicAuthenticator {
    name: String,
    realm: String,
    /// One map per htpasswd file, in configuration order.
    htpasswd: Vec<HashMap<String, String>>,
    credentials: HashMap<String, String>,
}

fn expand_user(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Parse `user:hash` lines; blank lines and `#` comments are skipped.
pub fn parse_htpasswd(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let parsed = line.split_once(':');
            if parsed.is_none() {
                warn!("BasicAuthenticator: ignoring malformed htpasswd line");
            }
            parsed
        })
        .map(|(user, hash)| (user.to_string(), hash.to_string()))
        .collect()
}

fn to64(out: &mut String, mut value: u32, count: usize) {
    for _ in 0..count {
        out.push(ITOA64[(value & 0x3f) as usize] as char);
        value >>= 6;
    }
}

/// Apache's MD5-based crypt (`$apr1$salt$hash`).
pub fn apr1_crypt(password: &str, salt: &str) -> String {
    let password = password.as_bytes();
    let salt: &[u8] = {
        let raw = salt.strip_prefix(APR1_MAGIC).unwrap_or(salt).as_bytes();
        let end = raw.iter().position(|b| *b == b'$').unwrap_or(raw.len()).min(8);
        &raw[..end]
    };

    let mut alternate = md5::Context::new();
    alternate.consume(password);
    alternate.consume(salt);
    alternate.consume(password);
    let alternate = alternate.compute();

    let mut ctx = md5::Context::new();
    ctx.consume(password);
    ctx.consume(APR1_MAGIC.as_bytes());
    ctx.consume(salt);
    let mut remaining = password.len();
    while remaining > 0 {
        let take = remaining.min(16);
        ctx.consume(&alternate.0[..take]);
        remaining -= take;
    }
    let mut bits = password.len();
    while bits != 0 {
        if bits & 1 == 1 {
            ctx.consume([0u8]);
        } else {
            ctx.consume(&password[..1]);
        }
        bits >>= 1;
    }
    let mut digest = ctx.compute().0;

    for round in 0..1000 {
        let mut ctx = md5::Context::new();
        if round & 1 == 1 {
            ctx.consume(password);
        } else {
            ctx.consume(digest);
        }
        if round % 3 != 0 {
            ctx.consume(salt);
        }
        if round % 7 != 0 {
            ctx.consume(password);
        }
        if round & 1 == 1 {
            ctx.consume(digest);
        } else {
            ctx.consume(password);
        }
        digest = ctx.compute().0;
    }

    let d = |i: usize| digest[i] as u32;
    let mut out = String::with_capacity(37);
    out.push_str(APR1_MAGIC);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push('$');
    to64(&mut out, (d(0) << 16) | (d(6) << 8) | d(12), 4);
    to64(&mut out, (d(1) << 16) | (d(7) << 8) | d(13), 4);
    to64(&mut out, (d(2) << 16) | (d(8) << 8) | d(14), 4);
    to64(&mut out, (d(3) << 16) | (d(9) << 8) | d(15), 4);
    to64(&mut out, (d(4) << 16) | (d(10) << 8) | d(5), 4);
    to64(&mut out, d(11), 2);
    out
}

/// Check `password` against an htpasswd-style hash: bcrypt, apr1, `{SHA}`, `{SSHA}` or plain text.
pub fn verify_password(password: &str, hash: &str) -> bool {
    if hash.starts_with("$2") {
        bcrypt::verify(password, hash).unwrap_or(false)
    } else if hash.starts_with(APR1_MAGIC) {
        apr1_crypt(password, hash) == hash
    } else if let Some(encoded) = hash.strip_prefix("{SHA}") {
        STANDARD.encode(Sha1::digest(password.as_bytes())) == encoded
    } else if let Some(encoded) = hash.strip_prefix("{SSHA}") {
        match STANDARD.decode(encoded) {
            Ok(raw) if raw.len() > 20 => {
                let (expected, salt) = raw.split_at(20);
                let mut hasher = Sha1::new();
                hasher.update(password.as_bytes());
                hasher.update(salt);
                hasher.finalize().as_slice() == expected
            }
            _ => false,
        }
    } else {
        !hash.is_empty() && hash == password
    }
}

impl BasicAuthenticator {
    pub fn from_config(config: &AuthenticatorConfig) -> Result<Self, DiecastError> {
        let options = Options(&config.options);
        let mut htpasswd = Vec::new();
        for filename in options.strings("htpasswd") {
            let path = expand_user(&filename);
            let content = std::fs::read_to_string(&path).map_err(|err| {
                DiecastError::Config(format!("htpasswd file {}: {}", path.display(), err))
            })?;
            htpasswd.push(parse_htpasswd(&content));
        }

        let credentials: HashMap<String, String> = options
            .map("credentials")
            .into_iter()
            .map(|(user, hash)| {
                let hash = match hash {
                    serde_json::Value::String(hash) => hash,
                    other => other.to_string(),
                };
                (user, hash)
            })
            .collect();

        if htpasswd.is_empty() && credentials.is_empty() {
            return Err(DiecastError::Config(
                "basic authenticator needs at least one user database via the 'htpasswd' or 'credentials' option"
                    .to_string(),
            ));
        }

        Ok(Self {
            name: if config.name.is_empty() {
                "BasicAuthenticator".to_string()
            } else {
                config.name.clone()
            },
            realm: options.string("realm", &format!("diecast/{}", env!("CARGO_PKG_VERSION"))),
            htpasswd,
            credentials,
        })
    }

    fn matches(&self, username: &str, password: &str) -> bool {
        self.htpasswd
            .iter()
            .filter_map(|file| file.get(username))
            .chain(self.credentials.get(username))
            .any(|hash| verify_password(password, hash))
    }

    fn challenge(&self) -> AuthOutcome {
        let mut www_authenticate = "Basic".to_string();
        if !self.realm.is_empty() {
            www_authenticate.push_str(&format!(" realm=\"{}\"", self.realm));
        }
        AuthOutcome::Respond(
            actix_web::HttpResponse::Unauthorized()
                .insert_header(("WWW-Authenticate", www_authenticate))
                .finish(),
        )
    }
}

/// The `user:password` pair of a Basic `Authorization` header.
pub fn basic_credentials(authorization: &str) -> Option<(String, String)> {
    let (_, encoded) = authorization.trim().split_once(' ')?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));
    Some((user.to_string(), password.to_string()))
}

#[async_trait]
impl Authenticator for BasicAuthenticator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, scope: &RequestScope) -> Result<AuthOutcome, DiecastError> {
        let Some(authorization) = scope.header("authorization").filter(|h| !h.trim().is_empty()) else {
            return Ok(self.challenge());
        };

        match basic_credentials(authorization) {
            Some((username, password)) if self.matches(&username, &password) => Ok(AuthOutcome::allow()),
            Some(_) => Ok(AuthOutcome::forbidden("Authorization Failed")),
            None => {
                warn!("[{}] malformed authorization header", scope.id);
                Ok(AuthOutcome::forbidden("Authorization Failed"))
            }
        }
    }
}
