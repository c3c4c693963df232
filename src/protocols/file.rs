// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Protocol, ProtocolRequest, ProtocolResponse, decode_component};
use crate::error::DiecastError;
use async_trait::async_trait;
use log::debug;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Reads `file://` resources from the local filesystem.
pub struct FileProtocol;

fn local_path(request: &ProtocolRequest) -> PathBuf {
    // file://relative/path keeps the host as the first segment
    let host = request.url.host_str().unwrap_or("");
    let path = decode_component(request.url.path());
    if host.is_empty() {
        PathBuf::from(path)
    } else {
        PathBuf::from(format!("{}{}", decode_component(host), path))
    }
}

#[async_trait]
impl Protocol for FileProtocol {
    async fn retrieve(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, DiecastError> {
        let path = local_path(request);
        debug!("[{}] reading {}", request.request_id, path.display());

        match tokio::fs::read(&path).await {
            Ok(body) => {
                let mime_type = mime_guess::from_path(&path)
                    .first_raw()
                    .unwrap_or("application/octet-stream");
                Ok(ProtocolResponse::ok(mime_type, body))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ProtocolResponse {
                status: 404,
                mime_type: "text/plain".to_string(),
                body: e.to_string().into_bytes(),
                ..Default::default()
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_fixtures::TestFixtureRoot;
    use reqwest::Url;
    use serde_json::json;
    use std::time::Duration;

    #[actix_web::test]
    async fn reads_local_file_with_mime_type() {
        let root = TestFixtureRoot::new_unique("file-protocol").expect("fixture");
        root.write("data.json", r#"{"ok":true}"#).expect("write");

        let url = Url::from_file_path(root.path().join("data.json")).expect("url");
        let request = ProtocolRequest::new("t", "GET", url, Duration::from_secs(1));
        let response = FileProtocol.retrieve(&request).await.expect("read");

        assert_eq!(response.mime_type, "application/json");
        assert_eq!(response.decode("").expect("json"), json!({"ok": true}));
    }

    #[actix_web::test]
    async fn missing_file_is_a_404_response() {
        let url = Url::parse("file:///definitely/not/here.txt").expect("url");
        let request = ProtocolRequest::new("t", "GET", url, Duration::from_secs(1));
        let response = FileProtocol.retrieve(&request).await.expect("response");
        assert_eq!(response.status, 404);
        assert!(response.is_error());
    }
}
