// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Reply, Step, StepConfig, StepFailure, StepInput, StepOutput};
use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::util::process::feed_and_wait;
use crate::util::value::{env_name, is_truthy, to_display};
use async_trait::async_trait;
use log::debug;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command;

/// Run a command and use its combined output as the step output.
///
/// `data` is a command line (run by `sh -c`), an argument array (run directly) or
/// `{command, env, inherit}`. Multi-line command strings are written to a temporary script and run
/// with the user's shell. The working value is written to stdin.
pub struct ShellStep;

enum Invocation {
    Line(String),
    Script(String),
    Argv(Vec<String>),
}

struct ShellOptions {
    invocation: Invocation,
    env: BTreeMap<String, String>,
    inherit: bool,
}

impl ShellOptions {
    fn parse(data: &JsonValue) -> Result<Self, DiecastError> {
        let (command, env, inherit) = match data {
            JsonValue::Object(options) => (
                options.get("command").cloned().unwrap_or(JsonValue::Null),
                options
                    .get("env")
                    .and_then(JsonValue::as_object)
                    .map(|env| env.iter().map(|(k, v)| (k.clone(), to_display(v))).collect())
                    .unwrap_or_default(),
                options.get("inherit").is_none_or(is_truthy),
            ),
            other => (other.clone(), BTreeMap::new(), true),
        };

        let invocation = match command {
            JsonValue::Array(args) => {
                let args: Vec<String> = args.iter().map(to_display).collect();
                if args.is_empty() {
                    return Err(DiecastError::Action("command array cannot be empty".to_string()));
                }
                Invocation::Argv(args)
            }
            other => {
                let script = to_display(&other);
                if script.trim().is_empty() {
                    return Err(DiecastError::Action("shell steps require a command".to_string()));
                }
                if script.trim_end().contains('\n') {
                    Invocation::Script(script)
                } else {
                    Invocation::Line(script)
                }
            }
        };

        Ok(Self {
            invocation,
            env,
            inherit,
        })
    }
}

/// `REQ_HEADER_*` and `REQ_PARAM_*` variables describing the request.
pub fn request_environment(scope: &RequestScope) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for (name, value) in &scope.headers {
        env.insert(env_name("REQ_HEADER_", name), value.clone());
    }
    for (name, value) in &scope.query {
        env.insert(env_name("REQ_PARAM_", name.trim_start_matches(':')), value.clone());
    }
    for (name, value) in scope.params() {
        env.insert(env_name("REQ_PARAM_", name.trim_start_matches(':')), to_display(&value));
    }
    env
}

fn user_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.trim().is_empty())
        .unwrap_or_else(|| "sh".to_string())
}

fn stdin_bytes(prev: &JsonValue) -> Result<Vec<u8>, DiecastError> {
    Ok(match prev {
        JsonValue::Null => Vec::new(),
        JsonValue::String(text) => text.clone().into_bytes(),
        other => serde_json::to_vec(other)?,
    })
}

#[async_trait]
impl Step for ShellStep {
    async fn perform(
        &self,
        config: &StepConfig,
        input: StepInput<'_>,
        _reply: &mut Reply,
    ) -> Result<StepOutput, StepFailure> {
        let options = ShellOptions::parse(&config.data)?;

        // the script file must outlive the child process
        let mut script_file = None;
        let mut command = match &options.invocation {
            Invocation::Argv(args) => {
                let mut command = Command::new(&args[0]);
                command.args(&args[1..]);
                command
            }
            Invocation::Line(line) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(line);
                command
            }
            Invocation::Script(script) => {
                let mut file = tempfile::Builder::new().prefix("diecast-").tempfile()?;
                file.write_all(script.as_bytes())?;
                file.flush()?;
                debug!("[{}]   shell: multiline script written to {}", input.scope.id, file.path().display());
                let mut command = Command::new(user_shell());
                command.arg(file.path());
                script_file = Some(file);
                command
            }
        };

        if !options.inherit {
            command.env_clear();
        }
        command
            .envs(&options.env)
            .envs(request_environment(input.scope))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let stdin = stdin_bytes(input.prev)?;
        let child = command.spawn()?;
        let output = feed_and_wait(child, &stdin).await?;
        drop(script_file);

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        debug!("[{}]   shell: {} ({} bytes)", input.scope.id, output.status, combined.len());

        if output.status.success() {
            Ok(StepOutput::Raw(combined))
        } else {
            Err(StepFailure::with_output(
                DiecastError::Action(format!("command failed: {}", output.status)),
                StepOutput::Raw(combined),
            ))
        }
    }
}
