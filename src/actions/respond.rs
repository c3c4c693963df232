// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Reply, Step, StepConfig, StepFailure, StepInput, StepOutput};
use crate::util::value::{as_f64, to_display};
use async_trait::async_trait;
use log::debug;
use serde_json::Value as JsonValue;

/// Set the response status, headers and redirect; the working value passes through.
///
/// `data` is `{status, headers, redirect}`. A redirect without a 3xx status answers `307`, and
/// `204`/`205` drop the body.
pub struct RespondStep;

#[async_trait]
impl Step for RespondStep {
    async fn perform(
        &self,
        config: &StepConfig,
        input: StepInput<'_>,
        reply: &mut Reply,
    ) -> Result<StepOutput, StepFailure> {
        let options = config.data.as_object().cloned().unwrap_or_default();
        let status = options
            .get("status")
            .and_then(as_f64)
            .map(|code| code as u16)
            .filter(|code| *code > 0);

        if let Some(JsonValue::Object(headers)) = options.get("headers") {
            for (name, value) in headers {
                reply.set_header(name, &to_display(value));
            }
        }

        let redirect = options.get("redirect").map(to_display).unwrap_or_default();
        if !redirect.is_empty() {
            reply.set_header("Location", &redirect);
            reply.status = Some(status.filter(|code| (300..400).contains(code)).unwrap_or(307));
        } else if status.is_some() {
            reply.status = status;
        }
        debug!("[{}]   respond: status={:?}", input.scope.id, reply.status);

        if matches!(status, Some(204) | Some(205)) {
            return Ok(StepOutput::Value(JsonValue::Null));
        }
        Ok(StepOutput::Value(input.prev.clone()))
    }
}
