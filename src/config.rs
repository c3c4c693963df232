// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::actions::{Action, STEP_TYPES};
use crate::bindings::Binding;
use crate::mounts::{MountConfig, ProxyOptions, parse_spec};
use crate::templates::header::TemplateHeader;
use crate::util::duration;
use crate::util::globs::deserialize_string_or_vec;
use log::{LevelFilter, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "diecast.yml";

#[derive(Debug)]
pub enum ConfigError {
    LoadError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::LoadError(msg) => write!(f, "Configuration load error: {}", msg),
            ConfigError::ValidationError(msg) => {
                write!(f, "Configuration validation error: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
    #[serde(default = "default_index_file")]
    pub index_file: String,
    #[serde(default = "default_try_extensions")]
    pub try_extensions: Vec<String>,
    #[serde(default = "default_template_patterns", alias = "patterns")]
    pub template_patterns: Vec<String>,
    #[serde(default = "default_autolayout_patterns")]
    pub autolayout_patterns: Vec<String>,
    #[serde(default, alias = "localFirst")]
    pub try_local_first: bool,
    #[serde(default)]
    pub autoindex: bool,
    #[serde(default = "default_layouts_path", alias = "layouts")]
    pub layouts_path: String,
    #[serde(default = "default_errors_path", alias = "errors")]
    pub errors_path: String,
    #[serde(default = "default_true")]
    pub enable_layouts: bool,
    #[serde(default)]
    pub binding_prefix: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    #[serde(default)]
    pub authenticators: Vec<AuthenticatorConfig>,
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub protocols: HashMap<String, Map<String, Value>>,
    #[serde(default)]
    pub vfs: VfsConfig,
    #[serde(default)]
    pub postprocessors: Vec<String>,
    #[serde(default = "default_renderer_mappings", alias = "rendererMapping")]
    pub renderer_mappings: HashMap<String, String>,
    #[serde(default)]
    pub csrf: Option<CsrfConfig>,
    #[serde(default, rename = "trustedRootPEMs")]
    pub trusted_root_pems: Vec<String>,
    #[serde(default)]
    pub global_headers: BTreeMap<String, String>,
    /// Base template header merged beneath every page.
    #[serde(default)]
    pub header: Option<TemplateHeader>,
    #[serde(default)]
    pub page: Map<String, Value>,
    #[serde(default)]
    pub override_page: Map<String, Value>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub disable_timings: bool,
    #[serde(default = "default_binding_timeout", with = "duration")]
    pub binding_timeout: Duration,
    #[serde(default = "default_action_step_timeout", with = "duration")]
    pub action_step_timeout: Duration,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Largest request body buffered for actions, mounts and bindings.
    #[serde(default = "default_max_request_body")]
    pub max_request_body: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_address() -> String {
    "127.0.0.1:28419".to_string()
}

fn default_root() -> String {
    ".".to_string()
}

fn default_route_prefix() -> String {
    "/".to_string()
}

fn default_index_file() -> String {
    "index.html".to_string()
}

fn default_try_extensions() -> Vec<String> {
    vec!["html".to_string(), "md".to_string()]
}

fn default_template_patterns() -> Vec<String> {
    vec!["*.html".to_string(), "*.md".to_string()]
}

fn default_autolayout_patterns() -> Vec<String> {
    vec!["*.html".to_string(), "*.md".to_string()]
}

fn default_layouts_path() -> String {
    "/_layouts".to_string()
}

fn default_errors_path() -> String {
    "/_errors".to_string()
}

fn default_true() -> bool {
    true
}

fn default_renderer_mappings() -> HashMap<String, String> {
    HashMap::from([("md".to_string(), "markdown".to_string())])
}

fn default_binding_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_action_step_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_workers() -> usize {
    4
}

fn default_max_request_body() -> usize {
    32 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            root: default_root(),
            route_prefix: default_route_prefix(),
            index_file: default_index_file(),
            try_extensions: default_try_extensions(),
            template_patterns: default_template_patterns(),
            autolayout_patterns: default_autolayout_patterns(),
            try_local_first: false,
            autoindex: false,
            layouts_path: default_layouts_path(),
            errors_path: default_errors_path(),
            enable_layouts: true,
            binding_prefix: String::new(),
            bindings: Vec::new(),
            mounts: Vec::new(),
            authenticators: Vec::new(),
            validators: Vec::new(),
            actions: Vec::new(),
            protocols: HashMap::new(),
            vfs: VfsConfig::default(),
            postprocessors: Vec::new(),
            renderer_mappings: default_renderer_mappings(),
            csrf: None,
            trusted_root_pems: Vec::new(),
            global_headers: BTreeMap::new(),
            header: None,
            page: Map::new(),
            override_page: Map::new(),
            debug: false,
            disable_timings: false,
            binding_timeout: default_binding_timeout(),
            action_step_timeout: default_action_step_timeout(),
            workers: default_workers(),
            max_request_body: default_max_request_body(),
            logging: LoggingConfig::default(),
            tls: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct VfsConfig {
    #[serde(default)]
    pub overrides: Vec<FileOverride>,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub fallback: Option<LayerConfig>,
}

/// A fixed response for one exact path: either inline `data` or another VFS path in `source`.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FileOverride {
    pub path: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub paths: Vec<String>,
    #[serde(default)]
    pub halt_on_missing: bool,
    #[serde(default)]
    pub halt_on_error: bool,
    /// Serve `<dir>.zip` as an archive of `<dir>`.
    #[serde(default, alias = "autocompress")]
    pub autoarchive: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AuthenticatorConfig {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub paths: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub except: Vec<String>,
    #[serde(default, rename = "callback")]
    pub callback_path: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ValidatorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub only: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub except: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CsrfConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub except: Vec<String>,
    #[serde(default)]
    pub cookie: CsrfCookieConfig,
    #[serde(default = "default_csrf_header", rename = "header")]
    pub header_name: String,
    #[serde(default = "default_csrf_field", rename = "field")]
    pub form_field_name: String,
    #[serde(default)]
    pub inject_form_fields: bool,
    #[serde(default = "default_csrf_selector")]
    pub inject_form_field_selector: String,
    #[serde(default = "default_csrf_field_template")]
    pub inject_form_field_template: String,
    #[serde(default = "default_injectable_media_types")]
    pub injectable_media_types: Vec<String>,
}

fn default_csrf_header() -> String {
    "X-CSRF-Token".to_string()
}

fn default_csrf_field() -> String {
    "csrf_token".to_string()
}

fn default_csrf_selector() -> String {
    r#"form[method="post"]"#.to_string()
}

fn default_csrf_field_template() -> String {
    r#"<input type="hidden" name="%s" value="%s">"#.to_string()
}

fn default_injectable_media_types() -> Vec<String> {
    vec!["text/html".to_string()]
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enable: false,
            except: Vec::new(),
            cookie: CsrfCookieConfig::default(),
            header_name: default_csrf_header(),
            form_field_name: default_csrf_field(),
            inject_form_fields: false,
            inject_form_field_selector: default_csrf_selector(),
            inject_form_field_template: default_csrf_field_template(),
            injectable_media_types: default_injectable_media_types(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CsrfCookieConfig {
    #[serde(default = "default_csrf_cookie_name")]
    pub name: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_max_age")]
    pub max_age: i64,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub http_only: bool,
    #[serde(default = "default_same_site")]
    pub same_site: String,
}

fn default_csrf_cookie_name() -> String {
    "_csrf_token".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_cookie_max_age() -> i64 {
    31_536_000
}

fn default_same_site() -> String {
    "lax".to_string()
}

impl Default for CsrfCookieConfig {
    fn default() -> Self {
        Self {
            name: default_csrf_cookie_name(),
            path: default_cookie_path(),
            domain: String::new(),
            max_age: default_cookie_max_age(),
            secure: false,
            http_only: true,
            same_site: default_same_site(),
        }
    }
}

const AUTHENTICATOR_TYPES: &[&str] = &[
    "basic", "oauth2", "request", "shell", "always", "never", "allow", "deny",
];
const VALIDATOR_TYPES: &[&str] = &["accept", "reject", "basic", "oauth2"];
const LAYER_TYPES: &[&str] = &["", "local", "zip", "archive"];

/// Configuration that passed validation; derefs to the raw [`Config`].
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    config: Config,
    pub log_level: LevelFilter,
    pub root_path: PathBuf,
}

impl Deref for ValidatedConfig {
    type Target = Config;

    fn deref(&self) -> &Self::Target {
        &self.config
    }
}

impl ValidatedConfig {
    pub fn csrf_enabled(&self) -> bool {
        self.config.csrf.as_ref().is_some_and(|csrf| csrf.enable)
    }

    /// Route prefix without a trailing slash; empty when mounted at `/`.
    pub fn route_prefix_trimmed(&self) -> &str {
        self.config.route_prefix.trim_end_matches('/')
    }

    pub fn into_inner(self) -> Config {
        self.config
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::LoadError(msg) => {
                ConfigError::LoadError(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::LoadError(format!("Failed to parse config: {}", e)))
    }

    /// Loads and validates configuration at startup. A missing default file yields the defaults.
    pub fn load_and_validate(path: &Path) -> Result<ValidatedConfig, ConfigError> {
        let config = if path.exists() {
            Self::load(path)?
        } else if path.file_name().is_some_and(|name| name == DEFAULT_CONFIG_FILE) {
            Config::default()
        } else {
            return Err(ConfigError::LoadError(format!(
                "Config file '{}' does not exist",
                path.display()
            )));
        };
        config.validate()
    }

    /// Append `MOUNT:SOURCE` short-form mounts after the configured ones.
    pub fn add_mount_specs(&mut self, specs: &[String]) -> Result<(), ConfigError> {
        for spec in specs {
            let (mount, to) = parse_spec(spec).map_err(ConfigError::ValidationError)?;
            self.mounts.push(MountConfig {
                mount,
                to,
                options: Map::new(),
            });
        }
        Ok(())
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "address cannot be empty".to_string(),
            ));
        }
        if !self.route_prefix.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "routePrefix must start with '/', got: {}",
                self.route_prefix
            )));
        }
        if self.index_file.contains('/') || self.index_file.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "indexFile must be a plain file name, got: {:?}",
                self.index_file
            )));
        }

        let log_level = Self::validate_logging(&self.logging)?;
        Self::validate_vfs(&self.vfs)?;
        Self::validate_mounts(&self.mounts)?;
        Self::validate_bindings(&self.bindings)?;

        for auth in &self.authenticators {
            if !AUTHENTICATOR_TYPES.contains(&auth.kind.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "unknown authenticator type {:?}",
                    auth.kind
                )));
            }
        }
        for validator in &self.validators {
            if !VALIDATOR_TYPES.contains(&validator.kind.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "unknown validator type {:?}",
                    validator.kind
                )));
            }
        }
        for action in &self.actions {
            if action.path.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "every action requires a path".to_string(),
                ));
            }
            for step in &action.steps {
                if !STEP_TYPES.contains(&step.kind.as_str()) {
                    return Err(ConfigError::ValidationError(format!(
                        "action {}: unknown step type {:?}",
                        action.path, step.kind
                    )));
                }
            }
        }

        if let Some(tls) = &self.tls
            && (tls.cert.trim().is_empty() || tls.key.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "tls.cert and tls.key are both required".to_string(),
            ));
        }

        if self.workers == 0 {
            warn!("workers is 0; actix will use one worker per core");
        }

        let root_path = PathBuf::from(&self.root);

        Ok(ValidatedConfig {
            config: self,
            log_level,
            root_path,
        })
    }

    fn validate_logging(logging: &LoggingConfig) -> Result<LevelFilter, ConfigError> {
        logging.level.parse::<LevelFilter>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "logging.level must be one of trace, debug, info, warn, error; got: {}",
                logging.level
            ))
        })
    }

    fn validate_vfs(vfs: &VfsConfig) -> Result<(), ConfigError> {
        for layer in vfs.layers.iter().chain(vfs.fallback.iter()) {
            match layer.kind.as_str() {
                "rclone" | "s3" => {
                    return Err(ConfigError::ValidationError(format!(
                        "VFS layer type {:?} is not supported by this build",
                        layer.kind
                    )));
                }
                kind if !LAYER_TYPES.contains(&kind) => {
                    return Err(ConfigError::ValidationError(format!(
                        "unknown VFS layer type {:?}",
                        kind
                    )));
                }
                _ => {}
            }
        }
        for file in &vfs.overrides {
            if file.data.is_none() && file.source.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "VFS override {:?} needs either data or source",
                    file.path
                )));
            }
        }
        Ok(())
    }

    fn validate_mounts(mounts: &[MountConfig]) -> Result<(), ConfigError> {
        for mount in mounts {
            if !mount.mount.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "mount point must start with '/', got: {}",
                    mount.mount
                )));
            }
            if mount.to.starts_with("s3://") {
                return Err(ConfigError::ValidationError(format!(
                    "mount {}: S3 mounts are not supported by this build",
                    mount.mount
                )));
            }
            if mount.is_proxy() {
                ProxyOptions::from_options(&mount.options).map_err(|e| {
                    ConfigError::ValidationError(format!("mount {}: {}", mount.mount, e))
                })?;
            }
        }
        Ok(())
    }

    fn validate_bindings(bindings: &[Binding]) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for binding in bindings {
            if binding.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "every binding requires a name".to_string(),
                ));
            }
            if !seen.insert(binding.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate binding name {:?}",
                    binding.name
                )));
            }
            if binding.resource.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "binding {:?} requires a resource",
                    binding.name
                )));
            }
            for pattern in binding.restrict.patterns() {
                regex::Regex::new(pattern).map_err(|e| {
                    ConfigError::ValidationError(format!(
                        "binding {:?}: invalid restrict pattern {:?}: {}",
                        binding.name, pattern, e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_fixtures::TestFixtureRoot;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_yaml_str("").expect("defaults");
        assert_eq!(config.address, "127.0.0.1:28419");
        assert_eq!(config.index_file, "index.html");
        assert_eq!(config.try_extensions, vec!["html", "md"]);
        assert_eq!(config.binding_timeout, Duration::from_secs(60));
        assert_eq!(config.action_step_timeout, Duration::from_secs(10));
        assert_eq!(
            config.renderer_mappings.get("md").map(String::as_str),
            Some("markdown")
        );
    }

    #[test]
    fn camel_case_keys_and_aliases() {
        let config = Config::from_yaml_str(
            r#"
routePrefix: /site
localFirst: true
bindingTimeout: 5s
patterns: ["*.tpl"]
csrf:
  enable: true
  header: X-Token
"#,
        )
        .expect("parse");
        assert_eq!(config.route_prefix, "/site");
        assert!(config.try_local_first);
        assert_eq!(config.binding_timeout, Duration::from_secs(5));
        assert_eq!(config.template_patterns, vec!["*.tpl"]);

        let csrf = config.csrf.clone().expect("csrf section");
        assert_eq!(csrf.header_name, "X-Token");
        assert_eq!(csrf.cookie.name, "_csrf_token");
        assert_eq!(csrf.form_field_name, "csrf_token");
        assert!(csrf.cookie.http_only);

        let validated = config.validate().expect("valid");
        assert!(validated.csrf_enabled());
        assert_eq!(validated.route_prefix_trimmed(), "/site");
    }

    #[test]
    fn validation_rejects_s3_mounts_and_rclone_layers() {
        let mut config = Config::default();
        config.mounts.push(MountConfig {
            mount: "/bucket".to_string(),
            to: "s3://bucket/path".to_string(),
            options: Map::new(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.vfs.layers.push(LayerConfig {
            kind: "rclone".to_string(),
            ..LayerConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_duplicate_bindings() {
        let config = Config::from_yaml_str(
            r#"
bindings:
  - name: a
    resource: /x
  - name: a
    resource: /y
"#,
        )
        .expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn mount_specs_are_appended() {
        let mut config = Config::default();
        config
            .add_mount_specs(&["/js:/usr/share/javascript".to_string(), "/data".to_string()])
            .expect("specs");
        assert_eq!(config.mounts[0].mount, "/js");
        assert_eq!(config.mounts[0].to, "/usr/share/javascript");
        assert_eq!(config.mounts[1].to, "/data");
    }

    #[test]
    fn load_and_validate_reads_file() {
        let fixture = TestFixtureRoot::new_unique("config-load").expect("fixture");
        let path = fixture.path().join("site.yml");
        std::fs::write(&path, "address: 127.0.0.1:9000\nindexFile: home.html\n").expect("write");

        let validated = Config::load_and_validate(&path).expect("valid");
        assert_eq!(validated.address, "127.0.0.1:9000");
        assert_eq!(validated.index_file, "home.html");

        let missing = fixture.path().join("other.yml");
        assert!(Config::load_and_validate(&missing).is_err());
    }
}
