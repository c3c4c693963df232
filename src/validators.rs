// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Request validators: cheap, synchronous checks scoped by path and method.

use crate::auth::Options;
use crate::auth::basic::basic_credentials;
use crate::auth::oauth2::DEFAULT_OAUTH2_SESSION_COOKIE;
use crate::config::ValidatorConfig;
use crate::context::RequestScope;
use crate::error::DiecastError;
use crate::util::globs::should_apply_to;
use std::collections::HashMap;
use std::sync::Arc;

pub trait Validator: Send + Sync {
    fn validate(&self, scope: &RequestScope, options: Options<'_>) -> Result<(), String>;
}

/// `accept` always passes, `reject` always fails.
pub struct AcceptRejectValidator {
    accept: bool,
}

impl Validator for AcceptRejectValidator {
    fn validate(&self, _scope: &RequestScope, options: Options<'_>) -> Result<(), String> {
        if self.accept {
            Ok(())
        } else {
            Err(options.string("message", "request rejected"))
        }
    }
}

/// Passes when a well-formed Basic `Authorization` header is present.
pub struct BasicAuthValidator;

impl Validator for BasicAuthValidator {
    fn validate(&self, scope: &RequestScope, _options: Options<'_>) -> Result<(), String> {
        let header = scope
            .header("authorization")
            .ok_or_else(|| "missing Authorization header".to_string())?;
        let is_basic = header
            .split_whitespace()
            .next()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("basic"));
        match basic_credentials(header) {
            Some((user, _)) if is_basic && !user.is_empty() => Ok(()),
            _ => Err("malformed Basic Authorization header".to_string()),
        }
    }
}

/// Passes when an OAuth2 session cookie is present.
pub struct OAuth2Validator;

impl Validator for OAuth2Validator {
    fn validate(&self, scope: &RequestScope, options: Options<'_>) -> Result<(), String> {
        let name = options.string("cookie_name", DEFAULT_OAUTH2_SESSION_COOKIE);
        match scope.cookie(&name) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(format!("missing {} session cookie", name)),
        }
    }
}

fn builtin_validators() -> HashMap<&'static str, Arc<dyn Validator>> {
    let mut registry: HashMap<&'static str, Arc<dyn Validator>> = HashMap::new();
    registry.insert("accept", Arc::new(AcceptRejectValidator { accept: true }));
    registry.insert("reject", Arc::new(AcceptRejectValidator { accept: false }));
    registry.insert("basic", Arc::new(BasicAuthValidator));
    registry.insert("oauth2", Arc::new(OAuth2Validator));
    registry
}

struct ConfiguredValidator {
    config: ValidatorConfig,
    methods: Vec<String>,
    validator: Arc<dyn Validator>,
}

impl ConfiguredValidator {
    fn applies_to(&self, scope: &RequestScope) -> bool {
        should_apply_to(&scope.path, &self.config.only, &self.config.except)
            && (self.methods.is_empty() || self.methods.contains(&scope.method.to_ascii_uppercase()))
    }
}

/// The configured validators, in order.
#[derive(Default)]
pub struct ValidatorSet {
    entries: Vec<ConfiguredValidator>,
}

impl ValidatorSet {
    pub fn from_config(configs: &[ValidatorConfig]) -> Result<Self, DiecastError> {
        let registry = builtin_validators();
        let mut entries = Vec::with_capacity(configs.len());
        for config in configs {
            let validator = registry.get(config.kind.as_str()).cloned().ok_or_else(|| {
                DiecastError::Config(format!("unrecognized validator type {:?}", config.kind))
            })?;
            entries.push(ConfiguredValidator {
                methods: config.methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
                config: config.clone(),
                validator,
            });
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Passes when every applicable validator passes; failures of optional ones are only logged.
    pub fn validate(&self, scope: &RequestScope) -> Result<(), DiecastError> {
        for entry in self.entries.iter().filter(|entry| entry.applies_to(scope)) {
            if let Err(reason) = entry.validator.validate(scope, Options(&entry.config.options)) {
                if entry.config.optional {
                    log::debug!(
                        "[{}] optional {:?} validator failed: {}",
                        scope.id,
                        entry.config.kind,
                        reason
                    );
                    continue;
                }
                return Err(DiecastError::Validation(format!(
                    "failed on {:?} validator: {}",
                    entry.config.kind, reason
                )));
            }
        }
        Ok(())
    }
}
