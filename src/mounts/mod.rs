// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Path-prefixed sources of bytes consulted before (or after) the VFS.

pub mod file;
pub mod proxy;

use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::vfs::DiskFile;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use std::sync::Arc;

pub use file::FileMount;
pub use proxy::{ProxyMount, ProxyOptions};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MountConfig {
    pub mount: String,
    pub to: String,
    pub options: Map<String, JsonValue>,
}

impl MountConfig {
    pub fn is_proxy(&self) -> bool {
        let scheme = self.to.split_once("://").map(|(scheme, _)| scheme).unwrap_or("");
        matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https")
    }

    pub fn build(
        &self,
        root: &Path,
        trusted_roots: &[reqwest::Certificate],
    ) -> Result<Arc<dyn Mount>, DiecastError> {
        if self.is_proxy() {
            let options = ProxyOptions::from_options(&self.options)
                .map_err(|e| DiecastError::Config(format!("mount {}: {}", self.mount, e)))?;
            Ok(Arc::new(ProxyMount::new(&self.mount, &self.to, options, trusted_roots)?))
        } else {
            Ok(Arc::new(FileMount::from_config(self, root)?))
        }
    }
}

/// Split a `MOUNT:SOURCE` spec. A spec without a source mounts the path onto itself.
pub fn parse_spec(spec: &str) -> Result<(String, String), String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err("empty mount spec".to_string());
    }
    let (mount, source) = match spec.split_once(':') {
        Some((mount, source)) if !source.is_empty() => (mount, source),
        Some((mount, _)) => (mount, mount),
        None => (spec, spec),
    };
    if !mount.starts_with('/') {
        return Err(format!("mount point must start with '/': {:?}", spec));
    }
    Ok((mount.to_string(), source.to_string()))
}

/// What a mount produced: bytes to serve, a file to stream, or a redirect to issue.
#[derive(Debug, Clone, PartialEq)]
pub enum MountPayload {
    Data(Vec<u8>),
    File(DiskFile),
    Redirect { location: String, code: u16 },
}

#[derive(Debug, Clone)]
pub struct MountResponse {
    pub name: String,
    pub content_type: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub payload: MountPayload,
}

impl MountResponse {
    pub fn new(name: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            content_type: content_type.to_string(),
            status: 200,
            headers: Vec::new(),
            payload: MountPayload::Data(data),
        }
    }

    pub fn file(name: &str, file: DiskFile) -> Self {
        Self {
            name: name.to_string(),
            content_type: file.mime_type.clone(),
            status: 200,
            headers: Vec::new(),
            payload: MountPayload::File(file),
        }
    }

    pub fn redirect(name: &str, location: &str, code: u16) -> Self {
        Self {
            name: name.to_string(),
            content_type: String::new(),
            status: code,
            headers: Vec::new(),
            payload: MountPayload::Redirect {
                location: location.to_string(),
                code,
            },
        }
    }

    /// Buffered bytes, when the mount produced them in memory.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.payload {
            MountPayload::Data(data) => Some(data),
            MountPayload::File(_) | MountPayload::Redirect { .. } => None,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.payload {
            MountPayload::Data(data) => data.len() as u64,
            MountPayload::File(file) => file.size,
            MountPayload::Redirect { .. } => 0,
        }
    }

    /// The full body, reading streamed files from disk.
    pub async fn read_body(&self) -> Result<Vec<u8>, DiecastError> {
        match &self.payload {
            MountPayload::Data(data) => Ok(data.clone()),
            MountPayload::File(file) => Ok(file.read_async().await?),
            MountPayload::Redirect { .. } => Ok(Vec::new()),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Whether `path` falls under `mount_point` on a segment boundary.
pub fn prefix_matches(mount_point: &str, path: &str) -> bool {
    let mount_point = mount_point.trim_end_matches('*');
    if mount_point.is_empty() || mount_point == "/" {
        return true;
    }
    if mount_point.ends_with('/') {
        return path.starts_with(mount_point) || path == mount_point.trim_end_matches('/');
    }
    path == mount_point
        || path
            .strip_prefix(mount_point)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait]
pub trait Mount: Send + Sync {
    fn mount_point(&self) -> &str;

    fn target(&self) -> &str;

    fn kind(&self) -> &'static str;

    fn will_respond_to(&self, path: &str, _scope: &RequestScope) -> bool {
        prefix_matches(self.mount_point(), path)
    }

    /// Open `path`. Errors that are hard stops end the whole lookup; anything else lets the
    /// next mount try.
    async fn open(&self, path: &str, scope: &Arc<RequestScope>) -> Result<MountResponse, DiecastError>;

    fn summary(&self) -> String {
        format!("{}: {} -> {}", self.kind(), self.mount_point(), self.target())
    }
}

/// Mounts in configuration order.
#[derive(Default, Clone)]
pub struct MountSet {
    mounts: Vec<Arc<dyn Mount>>,
}

impl MountSet {
    pub fn new(mounts: Vec<Arc<dyn Mount>>) -> Self {
        Self { mounts }
    }

    pub fn from_config(
        configs: &[MountConfig],
        root: &Path,
        trusted_roots: &[reqwest::Certificate],
    ) -> Result<Self, DiecastError> {
        let mut mounts = Vec::with_capacity(configs.len());
        for config in configs {
            let mount = config.build(root, trusted_roots)?;
            info!("Mounted {}", mount.summary());
            mounts.push(mount);
        }
        Ok(Self { mounts })
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn summaries(&self) -> Vec<String> {
        self.mounts.iter().map(|mount| mount.summary()).collect()
    }

    /// First response from a mount that claims `path`. `Ok(None)` means no mount served it.
    pub async fn open(
        &self,
        path: &str,
        scope: &Arc<RequestScope>,
    ) -> Result<Option<MountResponse>, DiecastError> {
        for mount in &self.mounts {
            if !mount.will_respond_to(path, scope) {
                continue;
            }
            match mount.open(path, scope).await {
                Ok(response) => {
                    debug!("[{}] {} served {}", scope.id, mount.summary(), path);
                    return Ok(Some(response));
                }
                Err(err) if err.is_hard_stop() => return Err(err),
                Err(err) => debug!("[{}] {} skipped {}: {}", scope.id, mount.summary(), path, err),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        point: String,
        result: fn() -> Result<MountResponse, DiecastError>,
    }

    #[async_trait]
    impl Mount for Fixed {
        fn mount_point(&self) -> &str {
            &self.point
        }
        fn target(&self) -> &str {
            "fixed"
        }
        fn kind(&self) -> &'static str {
            "fixed"
        }
        async fn open(&self, _path: &str, _scope: &Arc<RequestScope>) -> Result<MountResponse, DiecastError> {
            (self.result)()
        }
    }

    fn fixed(point: &str, result: fn() -> Result<MountResponse, DiecastError>) -> Arc<dyn Mount> {
        Arc::new(Fixed {
            point: point.to_string(),
            result,
        })
    }

    #[test]
    fn parse_spec_forms() {
        assert_eq!(parse_spec("/a:/b"), Ok(("/a".to_string(), "/b".to_string())));
        assert_eq!(parse_spec("/a"), Ok(("/a".to_string(), "/a".to_string())));
        assert_eq!(
            parse_spec("/api:http://origin:8080/v1"),
            Ok(("/api".to_string(), "http://origin:8080/v1".to_string()))
        );
        assert!(parse_spec("relative:/b").is_err());
        assert!(parse_spec("").is_err());
    }

    #[test]
    fn proxy_detection_uses_scheme() {
        let mount = |to: &str| MountConfig {
            mount: "/m".to_string(),
            to: to.to_string(),
            options: Map::new(),
        };
        assert!(mount("https://origin.example").is_proxy());
        assert!(mount("HTTP://origin.example").is_proxy());
        assert!(!mount("/srv/files").is_proxy());
    }

    #[test]
    fn prefixes_match_on_segment_boundaries() {
        assert!(prefix_matches("/js", "/js/app.js"));
        assert!(prefix_matches("/js", "/js"));
        assert!(!prefix_matches("/js", "/json"));
        assert!(prefix_matches("/api/*", "/api/users"));
        assert!(prefix_matches("/", "/anything"));
    }

    #[actix_web::test]
    async fn first_successful_mount_wins_and_hard_stops_halt() {
        let scope = Arc::new(RequestScope::detached("r", "GET", "/m/x"));
        let set = MountSet::new(vec![
            fixed("/m", || Err(DiecastError::not_found("/m/x"))),
            fixed("/m", || Ok(MountResponse::new("x", "text/plain", b"second".to_vec()))),
            fixed("/m", || Ok(MountResponse::new("x", "text/plain", b"third".to_vec()))),
        ]);
        let response = set.open("/m/x", &scope).await.expect("open").expect("served");
        assert_eq!(response.data(), Some(&b"second"[..]));

        let halting = MountSet::new(vec![
            fixed("/m", || {
                Err(DiecastError::HardStop {
                    status: 502,
                    message: "origin down".to_string(),
                })
            }),
            fixed("/m", || Ok(MountResponse::new("x", "text/plain", Vec::new()))),
        ]);
        assert!(halting.open("/m/x", &scope).await.is_err());
        assert!(set.open("/other", &scope).await.expect("open").is_none());
    }
}
