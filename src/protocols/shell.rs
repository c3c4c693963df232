// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Protocol, ProtocolRequest, ProtocolResponse, decode_component};
use crate::error::DiecastError;
use crate::util::process::feed_and_wait;
use async_trait::async_trait;
use log::{debug, warn};
use std::process::Stdio;
use tokio::process::Command;

/// Runs `shell://` resources as a command line through `sh -c`.
///
/// The command is the decoded host and path (`shell://echo%20hi` or `shell:///usr/bin/date`).
/// A request body is written to stdin; stdout becomes the response body.
pub struct ShellProtocol;

pub(crate) fn command_line(request: &ProtocolRequest) -> String {
    let host = request.url.host_str().map(decode_component).unwrap_or_default();
    let path = decode_component(request.url.path());
    let mut line = format!("{}{}", host, path);
    if let Some(query) = request.url.query() {
        line.push('?');
        line.push_str(&decode_component(query));
    }
    line.trim().to_string()
}

#[async_trait]
impl Protocol for ShellProtocol {
    async fn retrieve(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, DiecastError> {
        let line = command_line(request);
        if line.is_empty() {
            return Err(DiecastError::Protocol("empty shell command".to_string()));
        }
        debug!("[{}] shell: {}", request.request_id, line);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let body = request.body.as_deref().unwrap_or_default();
        let output = tokio::time::timeout(request.timeout, feed_and_wait(child, body))
            .await
            .map_err(|_| {
                DiecastError::Timeout(format!("shell command timed out after {:?}", request.timeout))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                "[{}] shell command exited with {}: {}",
                request.request_id, output.status, stderr
            );
            return Ok(ProtocolResponse {
                mime_type: "text/plain".to_string(),
                status: 500,
                headers: Vec::new(),
                body: if stderr.is_empty() { output.stdout } else { stderr.into_bytes() },
            });
        }

        Ok(ProtocolResponse::ok("", output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;
    use serde_json::json;
    use std::time::Duration;

    fn request(url: &str, timeout: Duration) -> ProtocolRequest {
        ProtocolRequest::new("t", "GET", Url::parse(url).expect("url"), timeout)
    }

    #[test]
    fn command_line_is_decoded_host_and_path() {
        let req = request("shell://echo%20hello/world", Duration::from_secs(1));
        assert_eq!(command_line(&req), "echo hello/world");
    }

    #[actix_web::test]
    async fn stdout_becomes_body() {
        let req = request("shell://echo%20%5B1,2%5D", Duration::from_secs(5));
        let response = ShellProtocol.retrieve(&req).await.expect("run");
        assert_eq!(response.decode("").expect("decode"), json!([1, 2]));
    }

    #[actix_web::test]
    async fn body_is_piped_to_stdin() {
        let mut req = request("shell://cat", Duration::from_secs(5));
        req.body = Some(b"from stdin".to_vec());
        let response = ShellProtocol.retrieve(&req).await.expect("run");
        assert_eq!(response.body, b"from stdin");
    }

    #[actix_web::test]
    async fn failing_command_is_an_error_response() {
        let req = request("shell://exit%203", Duration::from_secs(5));
        let response = ShellProtocol.retrieve(&req).await.expect("run");
        assert_eq!(response.status, 500);
    }

    #[actix_web::test]
    async fn slow_command_times_out() {
        let req = request("shell://sleep%205", Duration::from_millis(100));
        assert!(matches!(
            ShellProtocol.retrieve(&req).await,
            Err(DiecastError::Timeout(_))
        ));
    }
}
