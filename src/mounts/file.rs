// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Mount, MountConfig, MountResponse};
use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::util::value::to_display;
use crate::vfs::local::disk_file;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileMountOptions {
    #[serde(alias = "headers", alias = "responseHeaders")]
    response_headers: BTreeMap<String, JsonValue>,
    #[serde(alias = "status", alias = "responseCode")]
    response_code: u16,
}

/// Serves files from a directory on the local filesystem.
pub struct FileMount {
    mount_point: String,
    target: String,
    root: PathBuf,
    response_headers: Vec<(String, String)>,
    response_code: u16,
}

impl FileMount {
    pub fn new(mount_point: &str, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            mount_point: mount_point.to_string(),
            target: root.display().to_string(),
            root,
            response_headers: Vec::new(),
            response_code: 0,
        }
    }

    /// Relative targets resolve against the site root.
    pub fn from_config(config: &MountConfig, site_root: &Path) -> Result<Self, DiecastError> {
        let options: FileMountOptions =
            serde_json::from_value(JsonValue::Object(config.options.clone()))
                .map_err(|e| DiecastError::Config(format!("mount {}: {}", config.mount, e)))?;

        let target = Path::new(&config.to);
        let root = if target.is_absolute() {
            target.to_path_buf()
        } else {
            site_root.join(target)
        };

        let mut mount = Self::new(&config.mount, root);
        mount.target = config.to.clone();
        mount.response_code = options.response_code;
        mount.response_headers = options
            .response_headers
            .iter()
            .map(|(name, value)| (name.clone(), to_display(value)))
            .collect();
        Ok(mount)
    }

    /// Map a request path to a file under the root, refusing anything that climbs out of it.
    fn resolve(&self, path: &str) -> Result<PathBuf, DiecastError> {
        let mount_point = self.mount_point.trim_end_matches('*').trim_end_matches('/');
        let relative = path.strip_prefix(mount_point).unwrap_or(path);

        let mut resolved = self.root.clone();
        for component in Path::new(relative.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(DiecastError::not_found(path)),
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Mount for FileMount {
    fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn kind(&self) -> &'static str {
        "file"
    }

    async fn open(&self, path: &str, scope: &Arc<RequestScope>) -> Result<MountResponse, DiecastError> {
        let file_path = self.resolve(path)?;
        let metadata = match tokio::fs::metadata(&file_path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiecastError::not_found(path));
            }
            Err(err) => return Err(err.into()),
        };

        if metadata.is_dir() {
            if path.ends_with('/') {
                return Err(DiecastError::IsDirectory(path.to_string()));
            }
            debug!("[{}] {} is a directory; redirecting", scope.id, path);
            return Ok(MountResponse::redirect(path, &format!("{}/", scope.path), 301));
        }

        let name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let request_path = path.to_string();
        let file = tokio::task::spawn_blocking(move || disk_file(&request_path, file_path, &metadata))
            .await
            .map_err(|e| DiecastError::Io(std::io::Error::other(e.to_string())))??;

        let mut response = MountResponse::file(&name, file);
        response.headers = self.response_headers.clone();
        if self.response_code > 0 {
            response.status = self.response_code;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mounts::MountPayload;
    use crate::util::test_fixtures::TestFixtureRoot;
    use serde_json::json;

    fn scope(path: &str) -> Arc<RequestScope> {
        Arc::new(RequestScope::detached("test", "GET", path))
    }

    #[actix_web::test]
    async fn serves_files_under_the_mount_point() {
        let fixture = TestFixtureRoot::new_unique("file-mount").expect("fixture");
        fixture.write("lib/app.css", "body{}").expect("write");

        let mount = FileMount::new("/js", fixture.path().join("lib"));
        let response = mount.open("/js/app.css", &scope("/js/app.css")).await.expect("open");
        assert_eq!(response.name, "app.css");
        assert_eq!(response.content_type, "text/css");
        assert_eq!(response.size(), 6);
        assert!(matches!(response.payload, MountPayload::File(_)));
        assert_eq!(response.read_body().await.expect("body"), b"body{}");
        assert_eq!(response.status, 200);

        let missing = mount.open("/js/none.js", &scope("/js/none.js")).await;
        assert!(missing.expect_err("missing").is_not_found());
    }

    #[actix_web::test]
    async fn directories_redirect_or_report() {
        let fixture = TestFixtureRoot::new_unique("file-mount-dir").expect("fixture");
        fixture.write("docs/guide/index.html", "<p>guide</p>").expect("write");

        let mount = FileMount::new("/docs", fixture.path().join("docs"));
        let response = mount.open("/docs/guide", &scope("/docs/guide")).await.expect("open");
        assert_eq!(
            response.payload,
            MountPayload::Redirect {
                location: "/docs/guide/".to_string(),
                code: 301
            }
        );

        let err = mount
            .open("/docs/guide/", &scope("/docs/guide/"))
            .await
            .expect_err("directory");
        assert!(err.is_directory());
    }

    #[actix_web::test]
    async fn traversal_is_refused() {
        let fixture = TestFixtureRoot::new_unique("file-mount-escape").expect("fixture");
        fixture.write("secret.txt", "nope").expect("write");
        fixture.write("public/ok.txt", "ok").expect("write");

        let mount = FileMount::new("/p", fixture.path().join("public"));
        let err = mount
            .open("/p/../secret.txt", &scope("/p/../secret.txt"))
            .await
            .expect_err("escape");
        assert!(err.is_not_found());
    }

    #[actix_web::test]
    async fn options_layer_headers_and_status() {
        let fixture = TestFixtureRoot::new_unique("file-mount-opts").expect("fixture");
        fixture.write("static/robots.txt", "User-agent: *").expect("write");

        let config = MountConfig {
            mount: "/static".to_string(),
            to: "static".to_string(),
            options: json!({"responseHeaders": {"Cache-Control": "max-age=60"}, "status": 203})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        };
        let mount = FileMount::from_config(&config, fixture.path()).expect("mount");
        let response = mount
            .open("/static/robots.txt", &scope("/static/robots.txt"))
            .await
            .expect("open");
        assert_eq!(response.status, 203);
        assert_eq!(response.header("cache-control"), Some("max-age=60"));
    }
}
