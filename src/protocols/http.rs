// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Protocol, ProtocolRequest, ProtocolResponse};
use crate::error::DiecastError;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Certificate, Client, ClientBuilder, Identity, Method};
use std::fs;

/// Headers that describe the inbound connection rather than the outbound request.
const HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "accept-encoding",
    "keep-alive",
    "upgrade",
];

pub struct HttpProtocol {
    roots: Vec<Certificate>,
    client: Client,
    insecure_client: Client,
}

/// Load a PEM bundle given inline or as a file path.
pub(crate) fn load_pem(source: &str) -> Result<Vec<u8>, DiecastError> {
    if source.trim_start().starts_with("-----BEGIN") {
        Ok(source.as_bytes().to_vec())
    } else {
        fs::read(source).map_err(|e| {
            DiecastError::Config(format!("failed to read PEM file {:?}: {}", source, e))
        })
    }
}

pub(crate) fn load_root_certificates(sources: &[String]) -> Result<Vec<Certificate>, DiecastError> {
    let mut roots = Vec::new();
    for source in sources {
        let pem = load_pem(source)?;
        let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
            DiecastError::Config(format!("invalid trusted root PEM {:?}: {}", source, e))
        })?;
        roots.extend(certs);
    }
    Ok(roots)
}

impl HttpProtocol {
    pub fn new(trusted_root_pems: &[String]) -> Result<Self, DiecastError> {
        let roots = load_root_certificates(trusted_root_pems)?;
        let client = Self::builder(&roots, false).build()?;
        let insecure_client = Self::builder(&roots, true).build()?;
        Ok(Self {
            roots,
            client,
            insecure_client,
        })
    }

    fn builder(roots: &[Certificate], insecure: bool) -> ClientBuilder {
        let mut builder = Client::builder().user_agent(concat!("diecast/", env!("CARGO_PKG_VERSION")));
        for root in roots {
            builder = builder.add_root_certificate(root.clone());
        }
        if insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        builder
    }

    /// Client certificates need their own client; everything else reuses the shared pool.
    fn client_for(&self, request: &ProtocolRequest) -> Result<Client, DiecastError> {
        if request.tls_cert.is_empty() {
            return Ok(if request.insecure {
                self.insecure_client.clone()
            } else {
                self.client.clone()
            });
        }

        let mut pem = load_pem(&request.tls_cert)?;
        if !request.tls_key.is_empty() {
            pem.push(b'\n');
            pem.extend(load_pem(&request.tls_key)?);
        }
        let identity = Identity::from_pem(&pem)
            .map_err(|e| DiecastError::Config(format!("invalid client certificate: {}", e)))?;
        Ok(Self::builder(&self.roots, request.insecure)
            .identity(identity)
            .build()?)
    }
}

#[async_trait]
impl Protocol for HttpProtocol {
    async fn retrieve(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, DiecastError> {
        let id = &request.request_id;
        let method = Method::from_bytes(request.verb.as_bytes())
            .map_err(|_| DiecastError::Protocol(format!("invalid HTTP method {:?}", request.verb)))?;

        if request.url.scheme() == "https" && request.insecure {
            warn!(
                "[{}] TLS certificate validation is disabled for binding {:?}",
                id, request.binding_name
            );
        }

        let mut builder = self
            .client_for(request)?
            .request(method, request.url.clone())
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            if HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => debug!("[{}] skipping unrepresentable header {:?}", id, name),
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        info!("[{}] Binding: > {} {}", id, request.verb, request.url);
        let response = builder.send().await.map_err(|e| {
            warn!("[{}] Binding: < error: {}", id, e);
            DiecastError::from(e)
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.bytes().await?.to_vec();

        info!("[{}] Binding: < HTTP {} (body: {} bytes)", id, status, body.len());
        for (name, value) in &headers {
            debug!("[{}]  [H] {}: {}", id, name, value);
        }

        Ok(ProtocolResponse {
            mime_type,
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
    use reqwest::Url;
    use std::time::Duration;

    async fn echo(req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let marker = req
            .headers()
            .get("x-marker")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        HttpResponse::Ok().content_type("application/json").json(serde_json::json!({
            "method": req.method().as_str(),
            "query": req.query_string(),
            "marker": marker,
            "body": String::from_utf8_lossy(&body),
        }))
    }

    fn spawn_origin() -> std::net::SocketAddr {
        let server = HttpServer::new(|| App::new().default_service(web::to(echo)))
            .workers(1)
            .bind(("127.0.0.1", 0))
            .expect("bind");
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        addr
    }

    #[actix_web::test]
    async fn sends_method_headers_and_body() {
        let addr = spawn_origin();
        let protocol = HttpProtocol::new(&[]).expect("protocol");
        let url = Url::parse(&format!("http://{}/thing?a=1", addr)).expect("url");
        let mut request = ProtocolRequest::new("t", "POST", url, Duration::from_secs(5));
        request.set_header("X-Marker", "m1");
        request.set_header("Host", "ignored.example");
        request.body = Some(b"payload".to_vec());

        let response = protocol.retrieve(&request).await.expect("response");
        assert_eq!(response.status, 200);
        assert_eq!(
            response.decode("").expect("json"),
            serde_json::json!({"method": "POST", "query": "a=1", "marker": "m1", "body": "payload"})
        );
    }

    #[actix_web::test]
    async fn unreachable_origin_is_a_protocol_error() {
        let protocol = HttpProtocol::new(&[]).expect("protocol");
        let url = Url::parse("http://127.0.0.1:1/nope").expect("url");
        let request = ProtocolRequest::new("t", "GET", url, Duration::from_secs(2));
        assert!(protocol.retrieve(&request).await.is_err());
    }

    #[test]
    fn inline_pem_is_used_verbatim() {
        let pem = "-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n";
        assert_eq!(load_pem(pem).expect("inline"), pem.as_bytes());
        assert!(load_pem("/definitely/not/here.pem").is_err());
    }
}
