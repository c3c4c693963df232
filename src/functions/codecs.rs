// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg, arg_array, arg_f64, arg_str, function_table, require};
use crate::util::value::to_display;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::{Value, json};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "jsonify" => jsonify,
    "fromJson" => from_json,
    "markdown" => markdown,
    "csv" => csv,
    "tsv" => tsv,
    "sanitize" => sanitize,
    "stripHtml" => strip_html,
    "urlencode" => url_encode,
    "urldecode" => url_decode,
    "urlPathEncode" => url_path_encode,
    "urlScheme" => url_scheme,
    "urlHost" => url_host,
    "urlPort" => url_port,
    "urlPath" => url_path,
    "urlQuery" => url_query,
    "urlFragment" => url_fragment,
    "hex" => hex_encode,
    "unhex" => hex_decode,
    "base58" => base58_encode,
    "unbase58" => base58_decode,
    "base64" => base64_encode,
    "unbase64" => base64_decode,
    "httpStatusText" => http_status_text,
];

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

fn jsonify(args: &[Value]) -> Result<Value, String> {
    let indent = args.get(1).and_then(|v| v.as_u64()).unwrap_or(0);
    let encoded = if indent > 0 {
        serde_json::to_string_pretty(arg(args, 0))
    } else {
        serde_json::to_string(arg(args, 0))
    };
    encoded.map(Value::String).map_err(|e| e.to_string())
}

fn from_json(args: &[Value]) -> Result<Value, String> {
    match arg(args, 0) {
        Value::String(s) => serde_json::from_str(s).map_err(|e| e.to_string()),
        other => Ok(other.clone()),
    }
}

/// Markdown to sanitized HTML.
pub(crate) fn render_markdown(source: &str) -> String {
    use pulldown_cmark::{Options, Parser, html};

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(source, options));
    ammonia::Builder::default()
        .add_generic_attributes(&["id"])
        .clean(&out)
        .to_string()
}

fn markdown(args: &[Value]) -> Result<Value, String> {
    Ok(json!(render_markdown(&arg_str(args, 0))))
}

fn delimited(args: &[Value], delimiter: u8) -> Result<Value, String> {
    let rows = arg_array(args, 0);
    let mut headers: Vec<String> = arg_array(args, 1).iter().map(to_display).collect();
    if headers.is_empty()
        && let Some(Value::Object(first)) = rows.first()
    {
        headers = first.keys().cloned().collect();
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    if !headers.is_empty() {
        writer.write_record(&headers).map_err(|e| e.to_string())?;
    }
    for row in &rows {
        let record: Vec<String> = match row {
            Value::Object(map) => headers
                .iter()
                .map(|h| map.get(h).map(to_display).unwrap_or_default())
                .collect(),
            Value::Array(cells) => cells.iter().map(to_display).collect(),
            other => vec![to_display(other)],
        };
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }
    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map(Value::String).map_err(|e| e.to_string())
}

fn csv(args: &[Value]) -> Result<Value, String> {
    delimited(args, b',')
}

fn tsv(args: &[Value]) -> Result<Value, String> {
    delimited(args, b'\t')
}

fn sanitize(args: &[Value]) -> Result<Value, String> {
    Ok(json!(ammonia::clean(&arg_str(args, 0))))
}

fn strip_html(args: &[Value]) -> Result<Value, String> {
    let stripped = TAG.replace_all(&arg_str(args, 0), "").into_owned();
    Ok(json!(
        stripped
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&")
    ))
}

fn url_encode(args: &[Value]) -> Result<Value, String> {
    Ok(json!(urlencoding::encode(&arg_str(args, 0)).into_owned()))
}

fn url_decode(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0).replace('+', " ");
    urlencoding::decode(&input)
        .map(|s| json!(s.into_owned()))
        .map_err(|e| e.to_string())
}

fn url_path_encode(args: &[Value]) -> Result<Value, String> {
    Ok(json!(
        arg_str(args, 0)
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    ))
}

fn parse_url(args: &[Value]) -> Result<Url, String> {
    require(args, 1)?;
    Url::parse(&arg_str(args, 0)).map_err(|e| e.to_string())
}

fn url_scheme(args: &[Value]) -> Result<Value, String> {
    Ok(json!(parse_url(args)?.scheme()))
}

fn url_host(args: &[Value]) -> Result<Value, String> {
    Ok(json!(parse_url(args)?.host_str().unwrap_or("")))
}

fn url_port(args: &[Value]) -> Result<Value, String> {
    Ok(match parse_url(args)?.port_or_known_default() {
        Some(port) => json!(port),
        None => Value::Null,
    })
}

fn url_path(args: &[Value]) -> Result<Value, String> {
    Ok(json!(parse_url(args)?.path()))
}

fn url_query(args: &[Value]) -> Result<Value, String> {
    let url = parse_url(args)?;
    let mut query = serde_json::Map::new();
    for (key, value) in url.query_pairs() {
        query.insert(key.into_owned(), crate::util::value::autotype(&value));
    }
    match args.get(1) {
        Some(Value::String(key)) => Ok(query.remove(key).unwrap_or(Value::Null)),
        _ => Ok(Value::Object(query)),
    }
}

fn url_fragment(args: &[Value]) -> Result<Value, String> {
    Ok(json!(parse_url(args)?.fragment().unwrap_or("")))
}

fn hex_encode(args: &[Value]) -> Result<Value, String> {
    Ok(json!(hex::encode(arg_str(args, 0))))
}

fn hex_decode(args: &[Value]) -> Result<Value, String> {
    let bytes = hex::decode(arg_str(args, 0).trim()).map_err(|e| e.to_string())?;
    Ok(json!(String::from_utf8_lossy(&bytes)))
}

fn base58_encode(args: &[Value]) -> Result<Value, String> {
    Ok(json!(bs58::encode(arg_str(args, 0)).into_string()))
}

fn base58_decode(args: &[Value]) -> Result<Value, String> {
    let bytes = bs58::decode(arg_str(args, 0).trim())
        .into_vec()
        .map_err(|e| e.to_string())?;
    Ok(json!(String::from_utf8_lossy(&bytes)))
}

fn base64_encode(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0);
    Ok(json!(match arg_str(args, 1).as_str() {
        "url" => URL_SAFE_NO_PAD.encode(input),
        _ => STANDARD.encode(input),
    }))
}

fn base64_decode(args: &[Value]) -> Result<Value, String> {
    let input = arg_str(args, 0);
    let input = input.trim();
    let bytes = STANDARD
        .decode(input)
        .or_else(|_| URL_SAFE_NO_PAD.decode(input.trim_end_matches('=')))
        .map_err(|e| e.to_string())?;
    Ok(json!(String::from_utf8_lossy(&bytes)))
}

fn http_status_text(args: &[Value]) -> Result<Value, String> {
    let code = arg_f64(args, 0)? as u16;
    Ok(json!(
        actix_web::http::StatusCode::from_u16(code)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("")
    ))
}
