// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use glob::Pattern;
use log::warn;
use serde::de::{self, Deserializer, SeqAccess, Visitor};

/// Match a path against one glob. `*` is allowed to cross `/`; invalid patterns never match.
pub fn is_glob_match(path: &str, pattern: &str) -> bool {
    if path == pattern {
        return true;
    }
    match Pattern::new(pattern) {
        Ok(compiled) => compiled.matches(path),
        Err(_) => false,
    }
}

/// A compiled, ordered list of glob patterns.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    patterns: Vec<Pattern>,
}

impl GlobSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            match Pattern::new(pattern.as_ref()) {
                Ok(p) => compiled.push(p),
                Err(err) => warn!("Ignoring invalid glob {:?}: {}", pattern.as_ref(), err),
            }
        }
        Self { patterns: compiled }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.as_str() == path || pattern.matches(path))
    }

    /// Empty sets match everything.
    pub fn allows(&self, path: &str) -> bool {
        self.is_empty() || self.is_match(path)
    }
}

/// Path scoping shared by validators, authenticators, CSRF and bindings.
pub fn should_apply_to(path: &str, only: &[String], except: &[String]) -> bool {
    if except.iter().any(|pattern| is_glob_match(path, pattern)) {
        return false;
    }
    only.is_empty() || only.iter().any(|pattern| is_glob_match(path, pattern))
}

/// Accept either a single string or a list of strings.
pub fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVecVisitor;

    impl<'de> Visitor<'de> for StringOrVecVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or list of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_string()])
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![value])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut values = Vec::new();
            while let Some(value) = seq.next_element::<String>()? {
                values.push(value);
            }
            Ok(values)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(StringOrVecVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(is_glob_match("/hello/there.html", "/hello/there.html"));
        assert!(is_glob_match("/hello/there.html", "/hello/*.html"));
        assert!(is_glob_match("/hello/there.html", "*.html"));
        assert!(!is_glob_match("/hello/there.html", "/hello/*.yaml"));
        assert!(!is_glob_match("/hello/there.html", "^/*.html"));
        assert!(!is_glob_match("/hello/there.html", "[0-"));
    }

    #[test]
    fn only_and_except_scoping() {
        let only = vec!["/hello/*".to_string()];
        let except = vec!["*.yaml".to_string()];
        assert!(should_apply_to("/hello/there.html", &only, &except));
        assert!(!should_apply_to("/hello/there.yaml", &only, &except));
        assert!(!should_apply_to("/other.html", &only, &except));
        assert!(should_apply_to("/other.html", &[], &[]));
    }

    #[test]
    fn empty_set_allows_everything() {
        let set = GlobSet::new::<&str>(&[]);
        assert!(set.allows("/anything"));
        let set = GlobSet::new(&["*.md"]);
        assert!(set.allows("/a/b.md"));
        assert!(!set.allows("/a/b.html"));
    }
}
