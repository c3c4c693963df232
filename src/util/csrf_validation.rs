// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::config::CsrfConfig;
use crate::error::DiecastError;
use crate::util::globs::is_glob_match;

pub fn is_safe_method(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "GET" | "HEAD" | "OPTIONS" | "TRACE"
    )
}

pub fn is_exempt(config: &CsrfConfig, path: &str) -> bool {
    config.except.iter().any(|pattern| is_glob_match(path, pattern))
}

/// Compare without short-circuiting on the first differing byte.
pub fn tokens_match(left: &str, right: &str) -> bool {
    let (left, right) = (left.as_bytes(), right.as_bytes());
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Double-submit check: the cookie token and the submitted token must both be present and equal.
pub fn verify_double_submit(cookie: Option<&str>, submitted: Option<&str>) -> Result<(), DiecastError> {
    match (cookie.filter(|t| !t.is_empty()), submitted.filter(|t| !t.is_empty())) {
        (None, _) => Err(DiecastError::Csrf("missing CSRF cookie".to_string())),
        (_, None) => Err(DiecastError::Csrf("missing CSRF token".to_string())),
        (Some(cookie), Some(submitted)) if tokens_match(cookie, submitted) => Ok(()),
        _ => Err(DiecastError::Csrf("CSRF token mismatch".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_methods_are_recognised() {
        assert!(is_safe_method("get"));
        assert!(is_safe_method("OPTIONS"));
        assert!(!is_safe_method("POST"));
        assert!(!is_safe_method("DELETE"));
    }

    #[test]
    fn double_submit_requires_equal_tokens() {
        assert!(verify_double_submit(Some("T"), Some("T")).is_ok());
        assert!(verify_double_submit(Some("T"), Some("U")).is_err());
        assert!(verify_double_submit(Some("T"), Some("TT")).is_err());
        assert!(verify_double_submit(None, Some("T")).is_err());
        assert!(verify_double_submit(Some("T"), None).is_err());
        assert!(verify_double_submit(Some(""), Some("")).is_err());
    }

    #[test]
    fn except_patterns_exempt_paths() {
        let config = CsrfConfig {
            except: vec!["/hooks/*".to_string()],
            ..CsrfConfig::default()
        };
        assert!(is_exempt(&config, "/hooks/github"));
        assert!(!is_exempt(&config, "/submit"));
    }
}
