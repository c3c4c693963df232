// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Reply, Step, StepConfig, StepFailure, StepInput, StepOutput};
use crate::error::DiecastError;
use crate::util::value::{autotype, sliceify, to_display};
use async_trait::async_trait;
use log::debug;
use serde_json::{Map, Value as JsonValue};

/// Structural operations on the working value.
///
/// `data` is one operation or a list of them; each is a name or `{do, separator, joiner}`:
/// `sort`/`rsort` order arrays by their string form, `diffuse` expands `a.b=c` entries into nested
/// objects, `join` flattens arrays and objects into `k=v` lines.
pub struct ProcessStep;

struct Operation {
    name: String,
    separator: Option<String>,
    joiner: Option<String>,
}

impl Operation {
    fn parse(value: &JsonValue) -> Self {
        match value {
            JsonValue::Object(options) => {
                let text = |key: &str| options.get(key).map(to_display).filter(|s| !s.is_empty());
                Self {
                    name: text("do").unwrap_or_default(),
                    separator: text("separator"),
                    joiner: text("joiner"),
                }
            }
            other => Self {
                name: to_display(other),
                separator: None,
                joiner: None,
            },
        }
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn insert_nested(root: &mut Map<String, JsonValue>, parts: &[&str], value: JsonValue) {
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut current = root;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(Map::new());
        }
        let JsonValue::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

pub fn diffuse(data: JsonValue, separator: &str, joiner: &str) -> Result<JsonValue, DiecastError> {
    let mut flat = Map::new();
    match data {
        JsonValue::Array(items) => {
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    JsonValue::Array(_) | JsonValue::Object(_) => {
                        flat.insert(index.to_string(), item);
                    }
                    scalar => {
                        let text = to_display(&scalar);
                        let (key, value) = text.split_once(joiner).unwrap_or((text.as_str(), ""));
                        let key = key.trim_start_matches(separator);
                        let key = if key.is_empty() { index.to_string() } else { key.to_string() };
                        flat.insert(key, autotype(value));
                    }
                }
            }
        }
        JsonValue::Object(map) => flat = map,
        other => {
            return Err(DiecastError::Action(format!(
                "can only diffuse arrays or objects, got {}",
                type_name(&other)
            )));
        }
    }

    let mut nested = Map::new();
    for (key, value) in flat {
        let parts: Vec<&str> = key.split(separator).collect();
        insert_nested(&mut nested, &parts, value);
    }
    Ok(JsonValue::Object(nested))
}

fn join_object(map: &Map<String, JsonValue>, joiner: &str) -> Vec<String> {
    map.iter()
        .map(|(key, value)| format!("{}{}{}", key, joiner, to_display(value)))
        .collect()
}

pub fn join(data: &JsonValue, separator: &str, joiner: &str) -> String {
    let lines: Vec<String> = match data {
        JsonValue::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                JsonValue::Object(map) => join_object(map, joiner),
                JsonValue::Array(_) | JsonValue::Null => Vec::new(),
                scalar => vec![to_display(scalar)],
            })
            .collect(),
        JsonValue::Object(map) => join_object(map, joiner),
        _ => Vec::new(),
    };
    lines.join(separator)
}

#[async_trait]
impl Step for ProcessStep {
    async fn perform(
        &self,
        config: &StepConfig,
        input: StepInput<'_>,
        _reply: &mut Reply,
    ) -> Result<StepOutput, StepFailure> {
        let mut data = input.prev.clone();

        for operation in sliceify(config.data.clone()).iter().map(Operation::parse) {
            debug!("[{}]   process: {}", input.scope.id, operation.name);
            match operation.name.as_str() {
                "sort" | "rsort" => match data {
                    JsonValue::Array(ref mut items) => {
                        items.sort_by_key(to_display);
                        if operation.name == "rsort" {
                            items.reverse();
                        }
                    }
                    JsonValue::Null => return Ok(StepOutput::Value(JsonValue::Array(Vec::new()))),
                    ref other => {
                        return Err(DiecastError::Action(format!(
                            "can only sort arrays, got {}",
                            type_name(other)
                        ))
                        .into());
                    }
                },
                "diffuse" => {
                    data = diffuse(
                        data,
                        operation.separator.as_deref().unwrap_or("."),
                        operation.joiner.as_deref().unwrap_or("="),
                    )?;
                }
                "join" => {
                    let joined = join(
                        &data,
                        operation.separator.as_deref().unwrap_or("\n"),
                        operation.joiner.as_deref().unwrap_or("="),
                    );
                    return Ok(StepOutput::Value(JsonValue::String(joined)));
                }
                other => {
                    return Err(DiecastError::Action(format!(
                        "unrecognized process operation {:?}",
                        other
                    ))
                    .into());
                }
            }
        }

        Ok(StepOutput::Value(data))
    }
}
