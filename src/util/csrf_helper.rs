// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::config::{CsrfConfig, CsrfCookieConfig};
use crate::templates::escape_html;
use crate::util::mime_helper::essence;
use actix_web::cookie::{Cookie, SameSite, time::Duration as CookieDuration};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;

/// Raw token size before base58 encoding.
pub const CSRF_TOKEN_LENGTH: usize = 32;

static FORM_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<form\b([^>]*)>").expect("valid form regex"));
static FORM_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</form\s*>").expect("valid form close regex"));
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:-]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("valid attribute regex")
});
static SELECTOR_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\.([\w-]+)|#([\w-]+)|\[\s*([\w:-]+)\s*(?:=\s*(?:"([^"]*)"|'([^']*)'|([^\]\s]*)))?\s*\]"#)
        .expect("valid selector regex")
});

/// The token issued for the current request; stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

pub fn generate_token() -> String {
    let mut bytes = [0u8; CSRF_TOKEN_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);
    bs58::encode(bytes).into_string()
}

/// Whether `token` is a well-formed token this server could have issued.
pub fn is_well_formed(token: &str) -> bool {
    bs58::decode(token)
        .into_vec()
        .is_ok_and(|bytes| bytes.len() == CSRF_TOKEN_LENGTH)
}

pub fn same_site(value: &str) -> Option<SameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(SameSite::Strict),
        "lax" => Some(SameSite::Lax),
        "none" => Some(SameSite::None),
        _ => None,
    }
}

pub fn build_cookie(config: &CsrfCookieConfig, token: &str) -> Cookie<'static> {
    let mut cookie = Cookie::build(config.name.clone(), token.to_string())
        .path(config.path.clone())
        .max_age(CookieDuration::seconds(config.max_age))
        .secure(config.secure)
        .http_only(config.http_only)
        .finish();
    if !config.domain.is_empty() {
        cookie.set_domain(config.domain.clone());
    }
    if let Some(same_site) = same_site(&config.same_site) {
        cookie.set_same_site(same_site);
    }
    cookie
}

/// Value of `field` in an `application/x-www-form-urlencoded` body.
pub fn form_value(body: &[u8], field: &str) -> Option<String> {
    let body = std::str::from_utf8(body).ok()?;
    body.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decode = |raw: &str| {
            urlencoding::decode(&raw.replace('+', " "))
                .map(|decoded| decoded.into_owned())
                .ok()
        };
        if decode(name)? == field {
            decode(value)
        } else {
            None
        }
    })
}

/// One compound selector such as `form.login[method="post"]`.
#[derive(Debug, Clone, Default, PartialEq)]
struct FormSelector {
    classes: Vec<String>,
    id: Option<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl FormSelector {
    /// Selectors for elements other than `form` yield `None`.
    fn parse(selector: &str) -> Option<Self> {
        let selector = selector.trim();
        let rest = selector
            .get(..4)
            .filter(|tag| tag.eq_ignore_ascii_case("form"))
            .map(|_| &selector[4..])
            .filter(|rest| rest.is_empty() || rest.starts_with(['.', '#', '[']))?;

        let mut parsed = FormSelector::default();
        for caps in SELECTOR_PART.captures_iter(rest) {
            if let Some(class) = caps.get(1) {
                parsed.classes.push(class.as_str().to_string());
            } else if let Some(id) = caps.get(2) {
                parsed.id = Some(id.as_str().to_string());
            } else if let Some(name) = caps.get(3) {
                let value = caps
                    .get(4)
                    .or_else(|| caps.get(5))
                    .or_else(|| caps.get(6))
                    .map(|value| value.as_str().to_string());
                parsed
                    .attributes
                    .push((name.as_str().to_ascii_lowercase(), value));
            }
        }
        Some(parsed)
    }

    fn matches(&self, attributes: &[(String, String)]) -> bool {
        let get = |name: &str| {
            attributes
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        let classes: Vec<&str> = get("class").unwrap_or("").split_whitespace().collect();

        self.classes.iter().all(|class| classes.contains(&class.as_str()))
            && self.id.as_deref().is_none_or(|id| get("id") == Some(id))
            && self.attributes.iter().all(|(name, expected)| match (get(name), expected) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) if name == "method" => actual.eq_ignore_ascii_case(expected),
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            })
    }
}

fn parse_attributes(raw: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|value| value.as_str())
                .unwrap_or("");
            (caps[1].to_ascii_lowercase(), value.to_string())
        })
        .collect()
}

/// Adds a hidden token field to every `<form>` matching a selector list.
#[derive(Debug, Clone)]
pub struct FormFieldInjector {
    selectors: Vec<FormSelector>,
    template: String,
    field_name: String,
    media_types: Vec<String>,
}

impl FormFieldInjector {
    pub fn new(config: &CsrfConfig) -> Self {
        Self {
            selectors: config
                .inject_form_field_selector
                .split(',')
                .filter_map(FormSelector::parse)
                .collect(),
            template: config.inject_form_field_template.clone(),
            field_name: config.form_field_name.clone(),
            media_types: config.injectable_media_types.iter().map(|m| essence(m)).collect(),
        }
    }

    pub fn applies_to(&self, mime_type: &str) -> bool {
        let mime_type = essence(mime_type);
        self.media_types.iter().any(|candidate| *candidate == mime_type)
    }

    fn field(&self, token: &str) -> String {
        self.template
            .replacen("%s", &escape_html(&self.field_name), 1)
            .replacen("%s", &escape_html(token), 1)
    }

    /// Insert the field just before the closing tag of each matching form that lacks one.
    pub fn inject(&self, html: &str, token: &str) -> String {
        let field = self.field(token);
        let existing = format!("name=\"{}\"", self.field_name);
        let mut out = String::with_capacity(html.len() + field.len());
        let mut cursor = 0;

        while let Some(open) = FORM_OPEN.captures_at(html, cursor) {
            let (Some(tag), Some(attrs)) = (open.get(0), open.get(1)) else {
                break;
            };
            let Some(close) = FORM_CLOSE.find_at(html, tag.end()) else {
                break;
            };

            out.push_str(&html[cursor..close.start()]);
            let attributes = parse_attributes(attrs.as_str());
            let body = &html[tag.end()..close.start()];
            if self.selectors.iter().any(|selector| selector.matches(&attributes))
                && !body.contains(&existing)
            {
                out.push_str(&field);
            }
            out.push_str(close.as_str());
            cursor = close.end();
        }
        out.push_str(&html[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector(selector: &str) -> FormFieldInjector {
        FormFieldInjector::new(&CsrfConfig {
            inject_form_field_selector: selector.to_string(),
            ..CsrfConfig::default()
        })
    }

    #[test]
    fn tokens_are_base58_of_fixed_length() {
        let token = generate_token();
        assert!(is_well_formed(&token));
        assert_ne!(token, generate_token());
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed("0OIl"));
    }

    #[test]
    fn cookie_follows_config() {
        let config = CsrfCookieConfig {
            domain: "example.com".to_string(),
            secure: true,
            same_site: "strict".to_string(),
            ..CsrfCookieConfig::default()
        };
        let cookie = build_cookie(&config, "abc");
        assert_eq!(cookie.name(), "_csrf_token");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    }

    #[test]
    fn form_values_are_decoded() {
        assert_eq!(form_value(b"a=1&csrf_token=x%2By+z", "csrf_token").as_deref(), Some("x+y z"));
        assert_eq!(form_value(b"a=1", "csrf_token"), None);
    }

    #[test]
    fn injects_into_matching_forms_only() {
        let html = r#"<form method="POST" class="a b"><input name="q"></form><form method="get"></form>"#;
        let out = injector(r#"form[method="post"]"#).inject(html, "T");
        assert_eq!(
            out,
            r#"<form method="POST" class="a b"><input name="q"><input type="hidden" name="csrf_token" value="T"></form><form method="get"></form>"#
        );

        let by_class = injector("form.b").inject(html, "T");
        assert_eq!(by_class.matches("csrf_token").count(), 1);

        let everything = injector("form").inject(html, "T");
        assert_eq!(everything.matches("csrf_token").count(), 2);
    }

    #[test]
    fn forms_with_a_token_field_are_left_alone() {
        let html = r#"<form method="post"><input type="hidden" name="csrf_token" value="old"></form>"#;
        assert_eq!(injector("form").inject(html, "T"), html);
    }

    #[test]
    fn non_form_selectors_never_match() {
        assert_eq!(injector("div.form").inject("<form></form>", "T"), "<form></form>");
    }

    #[test]
    fn media_types_compare_by_essence() {
        let injector = injector("form");
        assert!(injector.applies_to("text/html; charset=utf-8"));
        assert!(!injector.applies_to("application/json"));
    }
}
