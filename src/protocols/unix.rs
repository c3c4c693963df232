// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Protocol, ProtocolRequest, ProtocolResponse, decode_component};
use crate::error::DiecastError;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use log::{debug, info};
use std::io::Read;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// HTTP over a Unix domain socket. The socket path is the percent-encoded host:
/// `http+unix://%2Fvar%2Frun%2Fapp.sock/status`.
pub struct UnixProtocol;

fn socket_path(request: &ProtocolRequest) -> Result<String, DiecastError> {
    request
        .url
        .host_str()
        .map(decode_component)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| DiecastError::Protocol(format!("no socket path in {}", request.url)))
}

fn encode_request(request: &ProtocolRequest) -> Vec<u8> {
    let mut target = request.url.path().to_string();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = request.url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut head = format!("{} {} HTTP/1.0\r\nHost: localhost\r\n", request.verb, target);
    for (name, value) in &request.headers {
        if matches!(
            name.to_ascii_lowercase().as_str(),
            "host" | "content-length" | "connection" | "transfer-encoding"
        ) {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    let body = request.body.as_deref().unwrap_or_default();
    head.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));

    let mut raw = head.into_bytes();
    raw.extend_from_slice(body);
    raw
}

/// Parse a complete HTTP/1.x response read until EOF.
pub(crate) fn parse_response(raw: &[u8]) -> Result<ProtocolResponse, DiecastError> {
    let split = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| DiecastError::Protocol("malformed HTTP response".to_string()))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let mut body = raw[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| DiecastError::Protocol(format!("bad status line {:?}", status_line)))?;

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    if header("content-encoding").is_some_and(|enc| enc.eq_ignore_ascii_case("gzip")) {
        let mut decoded = Vec::new();
        GzDecoder::new(body.as_slice()).read_to_end(&mut decoded)?;
        body = decoded;
    }

    Ok(ProtocolResponse {
        mime_type: header("content-type").unwrap_or_default(),
        status,
        headers,
        body,
    })
}

#[async_trait]
impl Protocol for UnixProtocol {
    async fn retrieve(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, DiecastError> {
        let socket = socket_path(request)?;
        debug!("[{}] connecting to unix socket {}", request.request_id, socket);

        let exchange = async {
            let mut stream = UnixStream::connect(&socket).await?;
            stream.write_all(&encode_request(request)).await?;
            let mut raw = Vec::new();
            stream.read_to_end(&mut raw).await?;
            Ok::<_, DiecastError>(raw)
        };

        let raw = tokio::time::timeout(request.timeout, exchange)
            .await
            .map_err(|_| DiecastError::Timeout(format!("unix socket {} timed out", socket)))??;

        let response = parse_response(&raw)?;
        info!(
            "[{}] Binding: < HTTP {} (body: {} bytes)",
            request.request_id,
            response.status,
            response.body.len()
        );
        Ok(response)
    }
}
