// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

#![allow(dead_code)]

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, Error, HttpServer, test, web};
use diecast::config::Config;
use diecast::public;
use diecast::server::Server;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A site root on disk plus the configuration that serves it.
pub struct TestHarness {
    pub dir: TempDir,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_yaml("")
    }

    /// Start from a YAML configuration; `root` always points at the temporary site.
    pub fn with_yaml(yaml: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix("diecast-it-")
            .tempdir()
            .expect("create temp site");
        let mut config = Config::from_yaml_str(yaml).expect("parse config");
        config.root = dir.path().display().to_string();
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` at the site-relative `path`, creating parent directories.
    pub fn write(&self, path: &str, content: &str) -> PathBuf {
        let target = self.dir.path().join(path.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&target, content).expect("write fixture");
        target
    }

    pub fn server(&self) -> Arc<Server> {
        let validated = self.config.clone().validate().expect("valid config");
        Arc::new(Server::new(validated).expect("build server"))
    }

    /// The application exactly as `main` assembles it for each worker.
    pub fn app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody + use<>>,
            Error = Error,
            InitError = (),
        > + use<>,
    > {
        public::build_app(self.server())
    }
}

pub async fn body_text<B: MessageBody>(response: ServiceResponse<B>) -> String {
    let bytes = test::read_body(response).await;
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn header<B>(response: &ServiceResponse<B>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Spawn a real HTTP origin on an ephemeral port and return its base URL.
pub fn spawn_origin(configure: fn(&mut web::ServiceConfig)) -> String {
    let server = HttpServer::new(move || App::new().configure(configure))
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("bind origin");
    let address = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}", address)
}
