// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! The process-wide hub every request handler reads from.

use crate::actions::{ActionRuntime, ActionSet, ensure_safe_to_run};
use crate::auth::AuthenticatorSet;
use crate::bindings::{BindingRuntime, SharedBindings};
use crate::config::{CsrfConfig, ValidatedConfig};
use crate::error::DiecastError;
use crate::mounts::MountSet;
use crate::protocols::ProtocolRegistry;
use crate::protocols::http::load_root_certificates;
use crate::renderers::{PostProcessorRegistry, RendererRegistry};
use crate::templates::{MiniJinjaEngine, TemplateEngine, TemplateHeader};
use crate::util::globs::GlobSet;
use crate::validators::ValidatorSet;
use crate::vfs::Vfs;
use log::info;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Everything derived from configuration once at startup and read-only afterwards, apart from
/// the shared binding cache.
pub struct Server {
    pub config: Arc<ValidatedConfig>,
    pub vfs: Arc<Vfs>,
    pub engine: Arc<dyn TemplateEngine>,
    pub protocols: Arc<ProtocolRegistry>,
    pub binding_runtime: BindingRuntime,
    pub shared_bindings: Arc<SharedBindings>,
    pub mounts: MountSet,
    pub renderers: RendererRegistry,
    pub postprocessors: PostProcessorRegistry,
    pub authenticators: Arc<AuthenticatorSet>,
    pub validators: Arc<ValidatorSet>,
    pub actions: ActionSet,
    pub action_runtime: ActionRuntime,
    pub csrf: Option<Arc<CsrfConfig>>,
    template_patterns: GlobSet,
    autolayout_patterns: GlobSet,
}

impl Server {
    pub fn new(config: ValidatedConfig) -> Result<Self, DiecastError> {
        ensure_safe_to_run(&config.actions)?;

        let root = config.root_path.clone();
        let vfs = Arc::new(Vfs::from_config(&config.vfs, &root)?);
        let engine: Arc<dyn TemplateEngine> = Arc::new(MiniJinjaEngine::new(vfs.clone()));
        let protocols = Arc::new(ProtocolRegistry::with_defaults(
            &config.trusted_root_pems,
            &config.protocols,
        )?);
        let trusted_roots = load_root_certificates(&config.trusted_root_pems)?;

        let binding_runtime = BindingRuntime {
            engine: engine.clone(),
            protocols: protocols.clone(),
            binding_prefix: config.binding_prefix.clone(),
            default_timeout: config.binding_timeout,
        };

        let mounts = MountSet::from_config(&config.mounts, &root, &trusted_roots)?;
        let renderers = RendererRegistry::with_mappings(&config.renderer_mappings)?;
        let postprocessors = PostProcessorRegistry::new(config.csrf.as_ref());
        for name in &config.postprocessors {
            if !postprocessors.contains(name) {
                return Err(DiecastError::Config(format!("unknown postprocessor {:?}", name)));
            }
        }

        let authenticators = Arc::new(AuthenticatorSet::from_config(
            &config.authenticators,
            &trusted_roots,
        )?);
        let validators = Arc::new(ValidatorSet::from_config(&config.validators)?);
        let actions = ActionSet::new(&config.route_prefix, &config.actions);
        let action_runtime = ActionRuntime::new(protocols.clone(), config.action_step_timeout);
        let csrf = config
            .csrf
            .clone()
            .filter(|csrf| csrf.enable)
            .map(Arc::new);

        info!(
            "Server ready: {} mount(s), {} binding(s), {} action(s), {} authenticator(s), protocols {:?}",
            mounts.len(),
            config.bindings.len(),
            config.actions.len(),
            authenticators.len(),
            protocols.schemes()
        );

        Ok(Self {
            template_patterns: GlobSet::new(&config.template_patterns),
            autolayout_patterns: GlobSet::new(&config.autolayout_patterns),
            shared_bindings: SharedBindings::new(&config.bindings),
            config: Arc::new(config),
            vfs,
            engine,
            protocols,
            binding_runtime,
            mounts,
            renderers,
            postprocessors,
            authenticators,
            validators,
            actions,
            action_runtime,
            csrf,
        })
    }

    /// Start the shared binding poller. Must be called from inside the async runtime.
    pub fn start_background_tasks(&self) -> Option<JoinHandle<()>> {
        self.shared_bindings
            .clone()
            .spawn(self.binding_runtime.clone())
    }

    /// Whether the file at `path` is evaluated as a template.
    pub fn should_apply_template(&self, path: &str) -> bool {
        self.template_patterns.is_match(path)
    }

    /// Whether the file at `path` is wrapped in a layout. Paths with a segment starting with `_`
    /// never are.
    pub fn should_apply_layout(&self, path: &str) -> bool {
        if !self.config.enable_layouts {
            return false;
        }
        !path.split('/').any(|segment| segment.starts_with('_')) && self.autolayout_patterns.is_match(path)
    }

    /// The configured base header merged beneath every page, with the global post-processors.
    pub fn base_header(&self) -> TemplateHeader {
        let mut header = self.config.header.clone().unwrap_or_default();
        for name in &self.config.postprocessors {
            if !header.postprocessors.contains(name) {
                header.postprocessors.push(name.clone());
            }
        }
        header
    }

    pub fn layout_path(&self, name: &str) -> String {
        format!("{}/{}.html", self.config.layouts_path.trim_end_matches('/'), name)
    }

    pub fn error_page_path(&self, name: &str) -> String {
        format!("{}/{}.html", self.config.errors_path.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::util::test_fixtures::TestFixtureRoot;

    fn server(yaml: &str, fixture: &TestFixtureRoot) -> Result<Server, DiecastError> {
        let mut config = Config::from_yaml_str(yaml).expect("yaml");
        config.root = fixture.path().display().to_string();
        Server::new(config.validate().expect("valid"))
    }

    #[test]
    fn builds_from_defaults() {
        let fixture = TestFixtureRoot::new_unique("server").expect("fixture");
        let server = server("", &fixture).expect("server");
        assert!(server.mounts.is_empty());
        assert!(server.actions.is_empty());
        assert!(server.csrf.is_none());
        assert!(server.should_apply_template("/docs/index.html"));
        assert!(!server.should_apply_template("/logo.png"));
    }

    #[test]
    fn layouts_skip_underscore_files() {
        let fixture = TestFixtureRoot::new_unique("server").expect("fixture");
        let server = server("", &fixture).expect("server");
        assert!(server.should_apply_layout("/about.html"));
        assert!(!server.should_apply_layout("/_partials/nav.html"));
        assert!(!server.should_apply_layout("/_nav.html"));
        assert!(!server.should_apply_layout("/data.json"));
        assert_eq!(server.layout_path("default"), "/_layouts/default.html");
        assert_eq!(server.error_page_path("404"), "/_errors/404.html");
    }

    #[test]
    fn unknown_postprocessors_are_rejected() {
        let fixture = TestFixtureRoot::new_unique("server").expect("fixture");
        assert!(server("postprocessors: [minify-everything]\n", &fixture).is_err());
        let server = server("postprocessors: [trim-empty-lines]\n", &fixture).expect("server");
        assert_eq!(server.base_header().postprocessors, vec!["trim-empty-lines".to_string()]);
    }
}
