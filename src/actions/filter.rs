// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Reply, Step, StepConfig, StepFailure, StepInput, StepOutput};
use crate::bindings::apply_transform;
use crate::error::DiecastError;
use crate::util::value::{is_truthy, to_display};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;

/// Narrow the working value with a JSONPath query or a line-matching regular expression.
///
/// `data` is either the query string (JSONPath) or `{language: jsonpath|regex, query, negate}`.
pub struct FilterStep;

fn filter_lines(data: &JsonValue, pattern: &Regex, negate: bool) -> Result<JsonValue, DiecastError> {
    let lines: Vec<String> = match data {
        JsonValue::Array(items) => items.iter().map(to_display).collect(),
        JsonValue::Object(_) => {
            return Err(DiecastError::Action(
                "regex filters only process strings and arrays of strings".to_string(),
            ));
        }
        scalar => to_display(scalar).split('\n').map(str::to_string).collect(),
    };

    Ok(JsonValue::Array(
        lines
            .into_iter()
            .filter(|line| pattern.is_match(line) != negate)
            .map(JsonValue::String)
            .collect(),
    ))
}

#[async_trait]
impl Step for FilterStep {
    async fn perform(
        &self,
        config: &StepConfig,
        input: StepInput<'_>,
        _reply: &mut Reply,
    ) -> Result<StepOutput, StepFailure> {
        let (language, query, negate) = match &config.data {
            JsonValue::Object(options) => (
                options.get("language").map(to_display).unwrap_or_default(),
                options.get("query").map(to_display).unwrap_or_default(),
                options.get("negate").is_some_and(is_truthy),
            ),
            other => (String::new(), to_display(other), false),
        };

        if query.trim().is_empty() {
            return Ok(StepOutput::Value(input.prev.clone()));
        }

        let filtered = match language.as_str() {
            "" | "jsonpath" => apply_transform(&query, input.prev)
                .map_err(|err| DiecastError::Action(format!("jsonpath: {}", err)))?,
            "regex" => {
                let pattern = Regex::new(&query)
                    .map_err(|err| DiecastError::Action(format!("regex: {}", err)))?;
                filter_lines(input.prev, &pattern, negate)?
            }
            other => {
                return Err(DiecastError::Action(format!("unrecognized filter language {:?}", other)).into());
            }
        };
        Ok(StepOutput::Value(filtered))
    }
}
