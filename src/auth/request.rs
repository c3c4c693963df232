// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{AuthOutcome, Authenticator, Options};
use crate::config::AuthenticatorConfig;
use crate::context::RequestScope;
use crate::error::DiecastError;
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};

/// An address range in CIDR notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    base: IpAddr,
    prefix: u8,
}

impl Network {
    pub fn parse(cidr: &str) -> Result<Self, String> {
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| format!("{:?} is not in CIDR notation", cidr))?;
        let base: IpAddr = addr
            .trim()
            .parse()
            .map_err(|err| format!("bad remote {:?}: {}", cidr, err))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|err| format!("bad remote {:?}: {}", cidr, err))?;
        let max = if base.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(format!("bad remote {:?}: prefix longer than {}", cidr, max));
        }
        Ok(Self { base, prefix })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.base, ip) {
            (IpAddr::V4(base), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(base) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(base), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(base) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

enum Remote {
    Exact(String),
    Network(Network),
}

/// Permits requests by method, remote address and header patterns.
pub struct RequestAuthenticator {
    name: String,
    methods: Vec<String>,
    remotes: Vec<Remote>,
    headers: Vec<(String, Regex)>,
}

fn remote_ip(remote_addr: &str) -> String {
    match remote_addr.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => remote_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(remote_addr)
            .trim_matches(['[', ']'])
            .to_string(),
    }
}

impl RequestAuthenticator {
    pub fn from_config(config: &AuthenticatorConfig) -> Result<Self, DiecastError> {
        let options = Options(&config.options);

        let mut remotes = Vec::new();
        for remote in options.strings("remotes") {
            if remote.contains('/') {
                remotes.push(Remote::Network(Network::parse(&remote).map_err(DiecastError::Config)?));
            } else {
                remotes.push(Remote::Exact(remote));
            }
        }

        let mut headers = Vec::new();
        for (name, pattern) in options.map("headers") {
            let pattern = match pattern {
                serde_json::Value::String(pattern) => pattern,
                other => other.to_string(),
            };
            let regex = Regex::new(&pattern)
                .map_err(|err| DiecastError::Config(format!("header {}: {}", name, err)))?;
            headers.push((name, regex));
        }

        Ok(Self {
            name: if config.name.is_empty() {
                "RequestAuthenticator".to_string()
            } else {
                config.name.clone()
            },
            methods: options
                .strings("methods")
                .into_iter()
                .map(|method| method.to_ascii_uppercase())
                .collect(),
            remotes,
            headers,
        })
    }

    fn check(&self, scope: &RequestScope) -> Result<(), String> {
        if !self.methods.is_empty() && !self.methods.contains(&scope.method.to_ascii_uppercase()) {
            return Err(format!("HTTP method {} is not permitted", scope.method));
        }

        for (name, pattern) in &self.headers {
            let value = scope.header(name).unwrap_or("");
            if !pattern.is_match(value) {
                return Err(format!("Header {} is not permitted", name));
            }
        }

        if !self.remotes.is_empty() {
            let Some(addr) = scope.remote_addr.as_deref().map(remote_ip).filter(|a| !a.is_empty()) else {
                return Err("Address could not be determined".to_string());
            };
            let ip = addr.parse::<IpAddr>().ok();
            let permitted = self.remotes.iter().enumerate().find(|(_, remote)| match remote {
                Remote::Exact(exact) => *exact == addr,
                Remote::Network(network) => ip.as_ref().is_some_and(|ip| network.contains(ip)),
            });
            match permitted {
                Some((index, _)) => {
                    debug!("[{}] request-auth: permitting address {} (remote {})", scope.id, addr, index);
                }
                None => return Err(format!("Address {} is not permitted", addr)),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Authenticator for RequestAuthenticator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, scope: &RequestScope) -> Result<AuthOutcome, DiecastError> {
        match self.check(scope) {
            Ok(()) => Ok(AuthOutcome::allow()),
            Err(reason) => {
                debug!("[{}] request-auth: {}", scope.id, reason);
                Ok(AuthOutcome::forbidden(&reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn authenticator(options: serde_json::Value) -> RequestAuthenticator {
        RequestAuthenticator::from_config(&AuthenticatorConfig {
            kind: "request".to_string(),
            options: options.as_object().cloned().expect("object"),
            ..AuthenticatorConfig::default()
        })
        .expect("authenticator")
    }

    fn scope(method: &str, remote: Option<&str>) -> RequestScope {
        let mut scope = RequestScope::detached("request-auth", method, "/");
        scope.remote_addr = remote.map(str::to_string);
        scope
    }

    #[test]
    fn networks_contain_their_members() {
        let net = Network::parse("10.1.0.0/16").expect("net");
        assert!(net.contains(&"10.1.200.3".parse().expect("ip")));
        assert!(!net.contains(&"10.2.0.1".parse().expect("ip")));
        assert!(Network::parse("0.0.0.0/0").expect("net").contains(&"8.8.8.8".parse().expect("ip")));
        assert!(Network::parse("fd00::/8").expect("net").contains(&"fd12::1".parse().expect("ip")));
        assert!(Network::parse("10.0.0.0/40").is_err());
        assert!(Network::parse("nonsense/8").is_err());
    }

    #[test]
    fn remote_addresses_lose_their_port() {
        assert_eq!(remote_ip("127.0.0.1:8080"), "127.0.0.1");
        assert_eq!(remote_ip("[::1]:8080"), "::1");
        assert_eq!(remote_ip("192.168.1.1"), "192.168.1.1");
    }

    #[actix_web::test]
    async fn methods_remotes_and_headers_are_enforced() {
        let auth = authenticator(json!({
            "methods": ["get", "head"],
            "remotes": ["192.168.0.0/24", "10.0.0.5"]
        }));
        assert!(auth.authenticate(&scope("GET", Some("192.168.0.44:5555"))).await.expect("outcome").is_allowed());
        assert!(auth.authenticate(&scope("GET", Some("10.0.0.5:1"))).await.expect("outcome").is_allowed());
        assert!(!auth.authenticate(&scope("POST", Some("10.0.0.5:1"))).await.expect("outcome").is_allowed());
        assert!(!auth.authenticate(&scope("GET", Some("172.16.0.1:1"))).await.expect("outcome").is_allowed());
        assert!(!auth.authenticate(&scope("GET", None)).await.expect("outcome").is_allowed());

        let by_header = authenticator(json!({"headers": {"X-Api-Key": "^k-[0-9]+$"}}));
        let with_key = RequestScope::detached("request-auth", "GET", "/")
            .with_headers(vec![("X-Api-Key".to_string(), "k-123".to_string())]);
        assert!(by_header.authenticate(&with_key).await.expect("outcome").is_allowed());
        assert!(!by_header.authenticate(&scope("GET", None)).await.expect("outcome").is_allowed());
    }
}
