// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::bindings::Binding;
use crate::error::DiecastError;
use crate::util::value::deep_merge;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const FRONT_MATTER_SEPARATOR: &[u8] = b"---\n";
pub const MAX_FRONT_MATTER_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Redirect {
    pub url: String,
    #[serde(default)]
    pub code: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchKind {
    Expression,
    QueryString(String),
    Header(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SwitchCase {
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub condition: String,
    #[serde(rename = "use", alias = "usePath", skip_serializing_if = "String::is_empty")]
    pub use_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
    #[serde(rename = "break")]
    pub stop: bool,
    pub fallthrough: bool,
}

impl SwitchCase {
    pub fn switch_kind(&self) -> SwitchKind {
        match self.kind.split_once(':') {
            Some(("querystring", name)) => SwitchKind::QueryString(name.to_string()),
            Some(("header", name)) => SwitchKind::Header(name.to_string()),
            _ => SwitchKind::Expression,
        }
    }

    /// Cases with no condition act as the fallback.
    pub fn is_fallback(&self) -> bool {
        self.condition.trim().is_empty() && self.switch_kind() == SwitchKind::Expression
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchOutcome {
    UsePath(String),
    Redirect(Redirect),
}

fn case_outcome(case: &SwitchCase) -> Option<SwitchOutcome> {
    if let Some(redirect) = &case.redirect {
        Some(SwitchOutcome::Redirect(redirect.clone()))
    } else if !case.use_path.is_empty() {
        Some(SwitchOutcome::UsePath(case.use_path.clone()))
    } else {
        None
    }
}

/// Lookups a switch needs from the request being rendered.
pub trait SwitchInput {
    fn eval_condition(&self, expression: &str) -> bool;
    fn query(&self, name: &str) -> Option<String>;
    fn header(&self, name: &str) -> Option<String>;
}

/// Pick at most one case. `break` on a non-matching case ends the search, and `fallthrough` on a
/// matching case defers to the next fallback case.
pub fn evaluate_switch(cases: &[SwitchCase], input: &dyn SwitchInput) -> Option<SwitchOutcome> {
    for (index, case) in cases.iter().enumerate() {
        let matched = match case.switch_kind() {
            SwitchKind::Expression => {
                case.is_fallback() || input.eval_condition(&case.condition)
            }
            SwitchKind::QueryString(name) => compare_lookup(input.query(&name), &case.condition),
            SwitchKind::Header(name) => compare_lookup(input.header(&name), &case.condition),
        };

        if !matched {
            if case.stop {
                return None;
            }
            continue;
        }

        if case.fallthrough {
            return cases[index + 1..]
                .iter()
                .find(|candidate| candidate.is_fallback())
                .and_then(case_outcome);
        }

        return case_outcome(case);
    }

    None
}

fn compare_lookup(found: Option<String>, condition: &str) -> bool {
    match found {
        Some(value) if condition.is_empty() => !value.is_empty(),
        Some(value) => value == condition,
        None => false,
    }
}

/// Front matter of a template, merged across layouts, includes and the page.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TemplateHeader {
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub page: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, String>,
    #[serde(alias = "defaultHeaders", skip_serializing_if = "BTreeMap::is_empty")]
    pub default_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switch: Option<Vec<SwitchCase>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub layout: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub includes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(rename = "params", alias = "urlParams", skip_serializing_if = "Map::is_empty")]
    pub url_params: Map<String, Value>,
    #[serde(rename = "flags", skip_serializing_if = "Map::is_empty")]
    pub flag_defs: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub postprocessors: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub renderer: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub translations: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub locale: String,
    #[serde(alias = "queryJoiner", skip_serializing_if = "String::is_empty")]
    pub query_joiner: String,
    #[serde(alias = "headerJoiner", skip_serializing_if = "String::is_empty")]
    pub header_joiner: String,
    #[serde(rename = "code", alias = "statusCode", skip_serializing_if = "is_zero")]
    pub status_code: u16,
}

fn is_zero(code: &u16) -> bool {
    *code == 0
}

fn prefer(right: &str, left: &str) -> String {
    if right.is_empty() {
        left.to_string()
    } else {
        right.to_string()
    }
}

fn merge_map(left: &Map<String, Value>, right: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = Value::Object(left.clone());
    deep_merge(&mut merged, Value::Object(right.clone()));
    match merged {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn merge_strings(
    left: &BTreeMap<String, String>,
    right: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = left.clone();
    merged.extend(right.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

impl TemplateHeader {
    /// `self ⊕ other`: scalars prefer a non-empty right side, bindings and postprocessors
    /// accumulate without duplicates, maps merge recursively with the right side winning.
    pub fn merge(&self, other: &TemplateHeader) -> TemplateHeader {
        let mut bindings = self.bindings.clone();
        for binding in &other.bindings {
            match bindings.iter_mut().find(|b| b.name == binding.name) {
                Some(existing) => *existing = binding.clone(),
                None => bindings.push(binding.clone()),
            }
        }

        let mut postprocessors = self.postprocessors.clone();
        for name in &other.postprocessors {
            if !postprocessors.contains(name) {
                postprocessors.push(name.clone());
            }
        }

        TemplateHeader {
            page: merge_map(&self.page, &other.page),
            bindings,
            defaults: merge_strings(&self.defaults, &other.defaults),
            default_headers: merge_strings(&self.default_headers, &other.default_headers),
            redirect: other.redirect.clone().or_else(|| self.redirect.clone()),
            switch: other.switch.clone().or_else(|| self.switch.clone()),
            layout: prefer(&other.layout, &self.layout),
            includes: merge_strings(&self.includes, &other.includes),
            headers: merge_map(&self.headers, &other.headers),
            url_params: merge_map(&self.url_params, &other.url_params),
            flag_defs: merge_map(&self.flag_defs, &other.flag_defs),
            postprocessors,
            renderer: prefer(&other.renderer, &self.renderer),
            translations: merge_map(&self.translations, &other.translations),
            locale: prefer(&other.locale, &self.locale),
            query_joiner: prefer(&other.query_joiner, &self.query_joiner),
            header_joiner: prefer(&other.header_joiner, &self.header_joiner),
            status_code: if other.status_code != 0 {
                other.status_code
            } else {
                self.status_code
            },
        }
    }

    /// `layout: none` or `layout: false` turns layouts off for the page.
    pub fn disables_layout(&self) -> bool {
        matches!(self.layout.as_str(), "none" | "false")
    }
}

fn find_separator(haystack: &[u8], from: usize) -> Option<usize> {
    let mut position = from;
    while position + FRONT_MATTER_SEPARATOR.len() <= haystack.len() {
        let at_line_start = position == from || haystack[position - 1] == b'\n';
        if at_line_start && haystack[position..].starts_with(FRONT_MATTER_SEPARATOR) {
            return Some(position);
        }
        position += 1;
    }
    None
}

/// Split `---\n<yaml>---\n<body>`. Returns the parsed header (if any) and the body offset.
pub fn split_front_matter(data: &[u8]) -> Result<(Option<TemplateHeader>, usize), DiecastError> {
    if !data.starts_with(FRONT_MATTER_SEPARATOR) {
        return Ok((None, 0));
    }

    let start = FRONT_MATTER_SEPARATOR.len();
    let Some(end) = find_separator(data, start) else {
        if data.len() - start > MAX_FRONT_MATTER_SIZE {
            return Err(DiecastError::Template(format!(
                "front matter exceeds {} bytes",
                MAX_FRONT_MATTER_SIZE
            )));
        }
        return Ok((None, 0));
    };

    if end - start > MAX_FRONT_MATTER_SIZE {
        return Err(DiecastError::Template(format!(
            "front matter exceeds {} bytes",
            MAX_FRONT_MATTER_SIZE
        )));
    }

    let yaml = std::str::from_utf8(&data[start..end])
        .map_err(|e| DiecastError::Template(format!("front matter is not UTF-8: {}", e)))?;
    let header = if yaml.trim().is_empty() {
        TemplateHeader::default()
    } else {
        serde_yaml::from_str::<TemplateHeader>(yaml)
            .map_err(|e| DiecastError::Template(format!("invalid front matter: {}", e)))?
    };

    Ok((Some(header), end + FRONT_MATTER_SEPARATOR.len()))
}

/// Inverse of [`split_front_matter`].
pub fn join_front_matter(header: &TemplateHeader, body: &[u8]) -> Result<Vec<u8>, DiecastError> {
    let mut out = Vec::with_capacity(body.len() + 64);
    out.extend_from_slice(FRONT_MATTER_SEPARATOR);
    let yaml = serde_yaml::to_string(header)?;
    out.extend_from_slice(yaml.as_bytes());
    if !yaml.ends_with('\n') {
        out.push(b'\n');
    }
    out.extend_from_slice(FRONT_MATTER_SEPARATOR);
    out.extend_from_slice(body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(yaml: &str) -> TemplateHeader {
        serde_yaml::from_str(yaml).expect("header yaml")
    }

    #[test]
    fn splits_front_matter_and_body() {
        let doc = b"---\nlayout: main\npage:\n  title: Hi\n---\n<h1>{{ page.title }}</h1>\n";
        let (parsed, offset) = split_front_matter(doc).expect("split");
        let parsed = parsed.expect("header present");
        assert_eq!(parsed.layout, "main");
        assert_eq!(parsed.page.get("title"), Some(&json!("Hi")));
        assert_eq!(&doc[offset..], b"<h1>{{ page.title }}</h1>\n");
    }

    #[test]
    fn documents_without_front_matter_are_untouched() {
        let (parsed, offset) = split_front_matter(b"plain body").expect("split");
        assert!(parsed.is_none());
        assert_eq!(offset, 0);
    }

    #[test]
    fn oversized_front_matter_is_an_error() {
        let mut doc = b"---\n".to_vec();
        doc.extend(std::iter::repeat_n(b'#', MAX_FRONT_MATTER_SIZE + 10));
        doc.extend_from_slice(b"\n---\nbody");
        assert!(split_front_matter(&doc).is_err());
    }

    #[test]
    fn front_matter_round_trips() {
        let doc = b"---\nlayout: main\npostprocessors: [trim-empty-lines]\ncode: 201\n---\nBODY {{ x }}";
        let (first, offset) = split_front_matter(doc).expect("split");
        let first = first.expect("header");
        let body = &doc[offset..];

        let joined = join_front_matter(&first, body).expect("join");
        let (second, offset2) = split_front_matter(&joined).expect("split again");
        assert_eq!(Some(first), second);
        assert_eq!(&joined[offset2..], body);
    }

    #[test]
    fn merge_is_right_biased_and_accumulative() {
        let a = header("layout: a\npostprocessors: [one]\nbindings: [{name: x, resource: /a}]\npage: {t: 1, keep: true}");
        let b = header("renderer: markdown\npostprocessors: [one, two]\nbindings: [{name: y, resource: /b}]\npage: {t: 2}");

        let merged = a.merge(&b);
        assert_eq!(merged.layout, "a");
        assert_eq!(merged.renderer, "markdown");
        assert_eq!(merged.postprocessors, vec!["one", "two"]);
        let names: Vec<_> = merged.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(merged.page.get("t"), Some(&json!(2)));
        assert_eq!(merged.page.get("keep"), Some(&json!(true)));
    }

    #[test]
    fn merge_is_associative_for_accumulated_fields() {
        let a = header("layout: a\npostprocessors: [p1]\nbindings: [{name: x, resource: /a}]");
        let b = header("postprocessors: [p2, p1]\nbindings: [{name: x, resource: /b}]");
        let c = header("layout: c\npostprocessors: [p3]\nbindings: [{name: z, resource: /c}]");

        let left = a.merge(&b).merge(&c);
        let right = a.merge(&b.merge(&c));
        assert_eq!(left.layout, right.layout);
        assert_eq!(left.postprocessors, right.postprocessors);
        assert_eq!(left.bindings, right.bindings);
    }

    #[test]
    fn switch_replaces_when_right_present() {
        let a = header("switch: [{condition: 'true', use: /a.html}]");
        let b = header("switch: [{use: /b.html}]");
        let merged = a.merge(&b);
        assert_eq!(merged.switch.expect("switch")[0].use_path, "/b.html");
        assert!(a.merge(&TemplateHeader::default()).switch.is_some());
    }

    struct FakeInput;

    impl SwitchInput for FakeInput {
        fn eval_condition(&self, expression: &str) -> bool {
            expression == "yes"
        }
        fn query(&self, name: &str) -> Option<String> {
            (name == "mode").then(|| "print".to_string())
        }
        fn header(&self, _name: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn switch_cases_pick_first_match() {
        let cases: Vec<SwitchCase> = serde_yaml::from_str(
            r#"
- condition: "no"
  use: /never.html
- type: querystring:mode
  condition: print
  use: /print.html
- use: /fallback.html
"#,
        )
        .expect("cases");
        assert_eq!(
            evaluate_switch(&cases, &FakeInput),
            Some(SwitchOutcome::UsePath("/print.html".to_string()))
        );
    }

    #[test]
    fn switch_break_and_fallthrough() {
        let cases: Vec<SwitchCase> = serde_yaml::from_str(
            r#"
- condition: "no"
  break: true
  use: /never.html
- use: /fallback.html
"#,
        )
        .expect("cases");
        assert_eq!(evaluate_switch(&cases, &FakeInput), None);

        let cases: Vec<SwitchCase> = serde_yaml::from_str(
            r#"
- condition: "yes"
  fallthrough: true
  use: /skipped.html
- condition: "no"
  use: /other.html
- redirect: {url: /elsewhere, code: 302}
"#,
        )
        .expect("cases");
        assert_eq!(
            evaluate_switch(&cases, &FakeInput),
            Some(SwitchOutcome::Redirect(Redirect {
                url: "/elsewhere".to_string(),
                code: 302
            }))
        );
    }
}
