// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Actions: ordered step pipelines installed at a URL path that answer with JSON instead of a
//! rendered template.
//!
//! Each run threads a working value through the steps. The first value is the request body,
//! every step receives the previous step's output and produces the next one. A step failing with
//! the `stop` signal ends the run early with the current output; any other failure ends it with a
//! `500` describing the error.

pub mod filter;
pub mod process;
pub mod request;
pub mod respond;
pub mod shell;

use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::protocols::ProtocolRegistry;
use crate::util::duration;
use crate::util::globs::deserialize_string_or_vec;
use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Step types accepted in configuration.
pub const STEP_TYPES: &[&str] = &["shell", "process", "filter", "request", "respond"];

/// Setting this to `true` permits actions while running as root.
pub const ALLOW_ROOT_ACTIONS_ENV: &str = "DIECAST_ALLOW_ROOT_ACTIONS";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StepConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: JsonValue,
    #[serde(with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// How raw step output is turned into a value: `json` (the default), `lines` or `raw`.
    pub parser: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Action {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub path: String,
    /// Methods this action answers; none means `GET` only.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub method: Vec<String>,
    pub steps: Vec<StepConfig>,
}

/// What a step produced. Raw bytes still go through the step's parser.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Raw(Vec<u8>),
    Value(JsonValue),
}

/// A step failure, optionally carrying whatever the step produced before failing.
#[derive(Debug)]
pub struct StepFailure {
    pub error: DiecastError,
    pub output: Option<StepOutput>,
}

impl StepFailure {
    pub fn with_output(error: DiecastError, output: StepOutput) -> Self {
        Self {
            error,
            output: Some(output),
        }
    }
}

impl From<DiecastError> for StepFailure {
    fn from(error: DiecastError) -> Self {
        Self { error, output: None }
    }
}

impl From<std::io::Error> for StepFailure {
    fn from(err: std::io::Error) -> Self {
        DiecastError::from(err).into()
    }
}

/// Response status and headers accumulated while steps run.
#[derive(Debug, Default)]
pub struct Reply {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
}

impl Reply {
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }
}

/// Everything a step can read while it runs.
pub struct StepInput<'a> {
    pub scope: &'a RequestScope,
    pub runtime: &'a ActionRuntime,
    pub prev: &'a JsonValue,
    pub timeout: Duration,
}

#[async_trait]
pub trait Step: Send + Sync {
    async fn perform(
        &self,
        config: &StepConfig,
        input: StepInput<'_>,
        reply: &mut Reply,
    ) -> Result<StepOutput, StepFailure>;
}

/// Shared services and the step registry used by every action.
#[derive(Clone)]
pub struct ActionRuntime {
    pub protocols: Arc<ProtocolRegistry>,
    pub default_timeout: Duration,
    steps: HashMap<String, Arc<dyn Step>>,
}

impl ActionRuntime {
    pub fn new(protocols: Arc<ProtocolRegistry>, default_timeout: Duration) -> Self {
        let mut runtime = Self {
            protocols,
            default_timeout,
            steps: HashMap::new(),
        };
        runtime.register("shell", Arc::new(shell::ShellStep));
        runtime.register("process", Arc::new(process::ProcessStep));
        runtime.register("filter", Arc::new(filter::FilterStep));
        runtime.register("request", Arc::new(request::RequestStep));
        runtime.register("respond", Arc::new(respond::RespondStep));
        runtime
    }

    pub fn register(&mut self, kind: &str, step: Arc<dyn Step>) {
        self.steps.insert(kind.to_string(), step);
    }

    fn step(&self, kind: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(kind).cloned()
    }
}

/// Turn raw step output into the working value.
pub fn postprocess(output: StepOutput, parser: &str) -> Result<JsonValue, DiecastError> {
    let bytes = match output {
        StepOutput::Value(JsonValue::String(text)) if parser == "lines" => text.into_bytes(),
        StepOutput::Value(value) => return Ok(value),
        StepOutput::Raw(bytes) => bytes,
    };

    match parser {
        "" | "json" => Ok(parse_json_output(&bytes)),
        "lines" => Ok(JsonValue::Array(non_empty_lines(&String::from_utf8_lossy(&bytes)))),
        "raw" | "text" => Ok(if bytes.is_empty() {
            JsonValue::Null
        } else {
            JsonValue::String(String::from_utf8_lossy(&bytes).into_owned())
        }),
        other => Err(DiecastError::Action(format!("unsupported step parser {:?}", other))),
    }
}

fn non_empty_lines(text: &str) -> Vec<JsonValue> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(|line| JsonValue::String(line.to_string()))
        .collect()
}

/// A JSON document, else newline-delimited JSON objects, else the non-empty lines.
fn parse_json_output(bytes: &[u8]) -> JsonValue {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return JsonValue::Null;
    }
    if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
        return value;
    }

    let mut objects = Vec::new();
    for line in trimmed.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match serde_json::from_str::<JsonValue>(line) {
            Ok(object @ JsonValue::Object(_)) => objects.push(object),
            _ => return JsonValue::Array(non_empty_lines(&text)),
        }
    }
    JsonValue::Array(objects)
}

fn is_stop(err: &DiecastError) -> bool {
    err.is_stop() || matches!(err, DiecastError::Action(message) if message == "stop")
}

impl Action {
    pub fn display_name(&self, scope: &RequestScope) -> String {
        if self.name.is_empty() {
            format!("{} {}", scope.method, scope.path)
        } else {
            self.name.clone()
        }
    }

    pub fn responds_to(&self, method: &str) -> bool {
        if self.method.is_empty() {
            return method.eq_ignore_ascii_case("GET");
        }
        self.method.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// The implicit first value: the request body.
    fn input(scope: &RequestScope) -> JsonValue {
        let is_form = scope
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            scope.payload()
        } else {
            parse_json_output(&scope.body)
        }
    }

    /// Run every step against `scope` and build the response.
    pub async fn run(&self, scope: &RequestScope, runtime: &ActionRuntime) -> HttpResponse {
        let started = Instant::now();
        let name = self.display_name(scope);
        if self.steps.is_empty() {
            return HttpResponse::NoContent().finish();
        }

        debug!("[{}] run action {}", scope.id, name);
        let mut reply = Reply::default();
        let mut prev = Self::input(scope);
        let mut failure: Option<(DiecastError, JsonValue)> = None;

        for (index, config) in self.steps.iter().enumerate() {
            let timeout = config
                .timeout
                .filter(|t| !t.is_zero())
                .unwrap_or(runtime.default_timeout);
            debug!("[{}]  step {}: type={} timeout={:?}", scope.id, index, config.kind, timeout);

            let result = match runtime.step(&config.kind) {
                Some(step) => {
                    let input = StepInput {
                        scope,
                        runtime,
                        prev: &prev,
                        timeout,
                    };
                    match tokio::time::timeout(timeout, step.perform(config, input, &mut reply)).await {
                        Ok(result) => result,
                        Err(_) => Err(StepFailure::from(DiecastError::Timeout(format!(
                            "step {} ({}) timed out after {:?}",
                            index, config.kind, timeout
                        )))),
                    }
                }
                None => Err(StepFailure::from(DiecastError::Action(format!(
                    "unrecognized action step type {:?}",
                    config.kind
                )))),
            };

            match result {
                Ok(output) => match postprocess(output, &config.parser) {
                    Ok(value) => prev = value,
                    Err(err) => {
                        failure = Some((err, JsonValue::Null));
                        break;
                    }
                },
                Err(StepFailure { error, .. }) if is_stop(&error) => {
                    debug!("[{}]  step {}: stop", scope.id, index);
                    break;
                }
                Err(StepFailure { error, output }) => {
                    let output = output
                        .and_then(|output| postprocess(output, &config.parser).ok())
                        .unwrap_or(JsonValue::Null);
                    failure = Some((error, output));
                    break;
                }
            }
        }

        let response = match failure {
            Some((error, output)) => {
                warn!("[{}] action {} failed: {}", scope.id, name, error);
                reply.status = Some(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
                respond_json(&reply, &json!({"error": error.to_string(), "output": output}))
            }
            None => respond_json(&reply, &prev),
        };

        info!(
            "[{}] action {} answered {} in {:?}",
            scope.id,
            name,
            response.status().as_u16(),
            started.elapsed()
        );
        response
    }
}

fn respond_json(reply: &Reply, body: &JsonValue) -> HttpResponse {
    let status = reply
        .status
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);
    let mut builder = HttpResponse::build(status);
    for (name, value) in &reply.headers {
        builder.insert_header((name.as_str(), value.as_str()));
    }

    if matches!(status.as_u16(), 204 | 205 | 304) {
        return builder.finish();
    }
    match serde_json::to_vec(body) {
        Ok(encoded) => builder.content_type("application/json").body(encoded),
        Err(err) => HttpResponse::InternalServerError()
            .content_type("text/plain; charset=utf-8")
            .body(err.to_string()),
    }
}

/// Actions installed under the route prefix.
#[derive(Default)]
pub struct ActionSet {
    route_prefix: String,
    actions: Vec<Action>,
}

impl ActionSet {
    pub fn new(route_prefix: &str, actions: &[Action]) -> Self {
        Self {
            route_prefix: route_prefix.trim_end_matches('/').to_string(),
            actions: actions.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.actions.iter().map(|action| self.full_path(action)).collect()
    }

    fn full_path(&self, action: &Action) -> String {
        format!("{}/{}", self.route_prefix, action.path.trim_start_matches('/'))
    }

    /// The action installed at exactly `path` for `method`.
    pub fn find(&self, method: &str, path: &str) -> Option<&Action> {
        self.actions
            .iter()
            .find(|action| self.full_path(action) == path && action.responds_to(method))
    }
}

/// Refuse actions when running as root unless explicitly allowed.
pub fn ensure_safe_to_run(actions: &[Action]) -> Result<(), DiecastError> {
    if actions.is_empty() {
        return Ok(());
    }
    // SAFETY: geteuid has no preconditions and cannot fail.
    let is_root = unsafe { libc::geteuid() } == 0;
    let allowed = std::env::var(ALLOW_ROOT_ACTIONS_ENV)
        .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
        .unwrap_or(false);
    if is_root && !allowed {
        return Err(DiecastError::Config(format!(
            "refusing to start as root with actions configured; set {}=true to override",
            ALLOW_ROOT_ACTIONS_ENV
        )));
    }
    Ok(())
}
