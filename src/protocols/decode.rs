// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::error::DiecastError;
use serde_json::Value;

fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn parser_for_mime(mime_type: &str) -> &'static str {
    match essence(mime_type).as_str() {
        "application/json" => "json",
        "application/x-yaml" | "application/yaml" | "text/yaml" => "yaml",
        "text/html" => "html",
        "text/xml" | "application/xml" => "xml",
        "text/csv" => "csv",
        "text/tab-separated-values" => "tsv",
        _ => "",
    }
}

/// Decode a response body with the named parser. An empty parser is inferred from the
/// media type, and when nothing matches, JSON is attempted before falling back to text.
pub fn decode_body(body: &[u8], mime_type: &str, parser: &str) -> Result<Value, DiecastError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }

    let parser = match parser.trim().to_ascii_lowercase() {
        explicit if !explicit.is_empty() => explicit,
        _ => parser_for_mime(mime_type).to_string(),
    };

    match parser.as_str() {
        "" => Ok(serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))),
        "json" => Ok(serde_json::from_slice(body)?),
        "yaml" => Ok(serde_yaml::from_slice(body)?),
        "lines" => Ok(Value::Array(
            String::from_utf8_lossy(body)
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty())
                .map(|line| Value::String(line.to_string()))
                .collect(),
        )),
        "csv" => delimited(body, b','),
        "tsv" => delimited(body, b'\t'),
        "raw" | "text" | "html" | "xml" => {
            Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
        }
        other => Err(DiecastError::Protocol(format!(
            "unknown response parser {:?}",
            other
        ))),
    }
}

/// Rows of string cells; ragged rows are kept as-is.
fn delimited(body: &[u8], delimiter: u8) -> Result<Value, DiecastError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DiecastError::Protocol(format!("invalid delimited data: {}", e)))?;
        rows.push(Value::Array(
            record
                .iter()
                .map(|cell| Value::String(cell.to_string()))
                .collect(),
        ));
    }
    Ok(Value::Array(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infers_parser_from_media_type() {
        assert_eq!(
            decode_body(br#"{"a":1}"#, "application/json; charset=utf-8", "").unwrap(),
            json!({"a": 1})
        );
        assert_eq!(decode_body(b"a: 1\n", "text/yaml", "").unwrap(), json!({"a": 1}));
        assert_eq!(decode_body(b"<p>x</p>", "text/html", "").unwrap(), json!("<p>x</p>"));
    }

    #[test]
    fn unknown_media_type_tries_json_first() {
        assert_eq!(decode_body(b"[1,2]", "application/octet-stream", "").unwrap(), json!([1, 2]));
        assert_eq!(decode_body(b"42", "", "").unwrap(), json!(42));
        assert_eq!(decode_body(b"hello", "text/plain", "").unwrap(), json!("hello"));
    }

    #[test]
    fn explicit_parsers() {
        assert!(decode_body(b"not json", "text/plain", "json").is_err());
        assert_eq!(decode_body(b"a\n\nb\n", "", "lines").unwrap(), json!(["a", "b"]));
        assert_eq!(
            decode_body(b"a,b\nc,d,e\n", "", "csv").unwrap(),
            json!([["a", "b"], ["c", "d", "e"]])
        );
        assert_eq!(decode_body(b"a\tb\n", "", "tsv").unwrap(), json!([["a", "b"]]));
        assert_eq!(decode_body(b"{}", "", "raw").unwrap(), json!("{}"));
        assert!(decode_body(b"x", "", "bogus").is_err());
        assert_eq!(decode_body(b"", "", "json").unwrap(), Value::Null);
    }
}
