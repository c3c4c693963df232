// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Reply, Step, StepConfig, StepFailure, StepInput, StepOutput};
use crate::error::DiecastError;
use crate::protocols::ProtocolRequest;
use crate::util::value::to_display;
use async_trait::async_trait;
use log::debug;
use reqwest::Url;
use serde_json::Value as JsonValue;

/// Fetch a resource through the protocol registry and decode it.
///
/// `data` is the URL or `{url, method}`. Methods that carry a body send the working value as JSON.
pub struct RequestStep;

fn sends_body(method: &str) -> bool {
    !matches!(method, "GET" | "HEAD" | "DELETE" | "OPTIONS")
}

#[async_trait]
impl Step for RequestStep {
    async fn perform(
        &self,
        config: &StepConfig,
        input: StepInput<'_>,
        _reply: &mut Reply,
    ) -> Result<StepOutput, StepFailure> {
        let (url, method) = match &config.data {
            JsonValue::Object(options) => (
                options.get("url").map(to_display).unwrap_or_default(),
                options.get("method").map(to_display).unwrap_or_default(),
            ),
            other => (to_display(other), String::new()),
        };
        let method = if method.trim().is_empty() {
            "GET".to_string()
        } else {
            method.trim().to_ascii_uppercase()
        };

        if url.trim().is_empty() {
            return Err(DiecastError::Action("request steps must specify a URL".to_string()).into());
        }
        let url = Url::parse(url.trim())
            .map_err(|err| DiecastError::Action(format!("invalid url {:?}: {}", url, err)))?;

        let mut request = ProtocolRequest::new(&input.scope.id, &method, url, input.timeout);
        if sends_body(&request.verb) && !input.prev.is_null() {
            request.set_header("Content-Type", "application/json");
            request.body = Some(serde_json::to_vec(input.prev).map_err(DiecastError::from)?);
        }
        debug!("[{}]   request: {} {}", input.scope.id, request.verb, request.url);

        let response = input
            .runtime
            .protocols
            .retrieve(&request)
            .await
            .map_err(|err| DiecastError::Action(format!("request failed: {}", err)))?;
        if response.is_error() {
            let body = String::from_utf8_lossy(&response.body).trim().to_string();
            return Err(StepFailure::with_output(
                DiecastError::Action(format!(
                    "request {} {} failed: HTTP {}",
                    request.verb, request.url, response.status
                )),
                StepOutput::Value(JsonValue::String(body)),
            ));
        }

        Ok(StepOutput::Value(response.decode("")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionRuntime};
    use crate::context::RequestScope;
    use crate::protocols::ProtocolRegistry;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpResponse, HttpServer, web};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    async fn echo(body: web::Json<JsonValue>) -> HttpResponse {
        HttpResponse::Ok().json(json!({"received": body.into_inner()}))
    }

    async fn broken() -> HttpResponse {
        HttpResponse::InternalServerError().body("upstream exploded")
    }

    async fn items() -> HttpResponse {
        HttpResponse::Ok().json(json!(["b", "a"]))
    }

    fn spawn_origin() -> String {
        let server = HttpServer::new(|| {
            App::new()
                .route("/echo", web::post().to(echo))
                .route("/items", web::get().to(items))
                .route("/broken", web::get().to(broken))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("bind origin");
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        format!("http://{}", addr)
    }

    fn runtime() -> ActionRuntime {
        let protocols = ProtocolRegistry::with_defaults(&[], &HashMap::new()).expect("protocols");
        ActionRuntime::new(Arc::new(protocols), Duration::from_secs(5))
    }

    fn step(kind: &str, data: JsonValue) -> StepConfig {
        StepConfig {
            kind: kind.to_string(),
            data,
            ..StepConfig::default()
        }
    }

    async fn run(steps: Vec<StepConfig>, body: &[u8]) -> (StatusCode, JsonValue) {
        let action = Action {
            path: "/fetch".to_string(),
            method: vec!["POST".to_string()],
            steps,
            ..Action::default()
        };
        let scope = RequestScope::detached("request-step", "POST", "/fetch").with_body(body.to_vec());
        let response = action.run(&scope, &runtime()).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[actix_web::test]
    async fn fetched_data_feeds_later_steps() {
        let origin = spawn_origin();
        let (status, body) = run(
            vec![
                step("request", json!(format!("{}/items", origin))),
                step("process", json!("sort")),
            ],
            b"",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["a", "b"]));
    }

    #[actix_web::test]
    async fn posts_send_the_working_value() {
        let origin = spawn_origin();
        let (status, body) = run(
            vec![step("request", json!({"url": format!("{}/echo", origin), "method": "post"}))],
            b"{\"name\":\"x\"}",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"received": {"name": "x"}}));
    }

    #[actix_web::test]
    async fn error_statuses_fail_the_step() {
        let origin = spawn_origin();
        let (status, body) = run(vec![step("request", json!(format!("{}/broken", origin)))], b"").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap_or("").contains("HTTP 500"));

        let (status, _) = run(vec![step("request", json!(""))], b"").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn other_schemes_go_through_the_registry() {
        let (status, body) = run(vec![step("request", json!("shell://echo%20%27%5B1%2C2%5D%27"))], b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([1, 2]));
    }
}
