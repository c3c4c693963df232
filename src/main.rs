// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use actix_web::HttpServer;
use actix_web::rt::System;
use diecast::config::{Config, ConfigError, DEFAULT_CONFIG_FILE, ValidatedConfig};
use diecast::server::Server;
use diecast::{public, tls, util};
use futures_util::future::try_join_all;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HELP_TEXT: &str = "\
Usage: diecast [OPTIONS] [MOUNT:SOURCE]...

Serve a site from a layered file system, rendering templates at request time.

Options:
  -c, --config <file>    Configuration file (default: diecast.yml)
  -a, --address <addr>   Listen address, e.g. 127.0.0.1:28419
  -r, --root <dir>       Root directory of the site
      --debug            Debug logging and template debugging
  -h, --help             Show this help

Each MOUNT:SOURCE argument adds a mount after the configured ones, e.g.
  /api:https://api.example.com
";

fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    let args = match parse_args() {
        Ok(args) => args,
        Err(error) => {
            eprintln!("❌ Invalid command line arguments: {}", error);
            eprintln!("❌ Use --help to list the accepted options.");
            return 1;
        }
    };

    if args.help {
        print!("{}", HELP_TEXT);
        return 0;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("❌ Configuration error: {}", error);
            eprintln!("❌ Application cannot start with invalid configuration.");
            return 1;
        }
    };

    let result = System::new().block_on(run_server(config, args.config_base()));
    match result {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("❌ Server failed to start: {}", error);
            1
        }
    }
}

fn load_config(args: &ParsedArgs) -> Result<ValidatedConfig, ConfigError> {
    let path = args.config_path();
    let mut config = if path.exists() {
        Config::load(&path)?
    } else if args.config.is_none() {
        Config::default()
    } else {
        return Err(ConfigError::LoadError(format!(
            "Config file '{}' does not exist",
            path.display()
        )));
    };

    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if args.debug {
        config.debug = true;
        config.logging.level = "debug".to_string();
    }
    config.add_mount_specs(&args.mounts)?;
    config.validate()
}

async fn run_server(config: ValidatedConfig, config_base: PathBuf) -> std::io::Result<()> {
    let logger = util::build_logger(config.log_level);
    util::init_logger(util::default_demotions(), logger).map_err(|error| {
        eprintln!("❌ Failed to initialize logger: {}", error);
        std::io::Error::other(error.to_string())
    })?;

    // Ignore the error when a provider was already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    log_startup_info(&config);
    let address = config.address.clone();
    let workers = config.workers;
    let tls_config = match &config.tls {
        Some(tls) => Some(tls::load_rustls_config(tls, &config_base)?),
        None => None,
    };

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(error) => {
            eprintln!("❌ Failed to initialize server: {}", error);
            return Err(std::io::Error::other(error.to_string()));
        }
    };
    if server.start_background_tasks().is_some() {
        info!("✅ Shared binding poller started");
    }
    info!("✅ Server initialized with {} mounts", server.mounts.len());

    let factory = {
        let server = server.clone();
        move || public::build_app(server.clone())
    };

    let mut http_server = HttpServer::new(factory);
    if workers > 0 {
        http_server = http_server.workers(workers);
    }
    let http_server = match tls_config {
        Some(tls_config) => http_server.bind_rustls_0_23(address.as_str(), tls_config)?,
        None => http_server.bind(address.as_str())?,
    };

    try_join_all(vec![http_server.run()]).await.map(|_| ())
}

fn log_startup_info(config: &ValidatedConfig) {
    let scheme = if config.tls.is_some() { "https" } else { "http" };
    info!("Starting diecast {}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}://{}{}", scheme, config.address, config.route_prefix);
    info!("Root directory: {}", config.root_path.display());
    if config.debug {
        info!("Debug mode enabled");
    }
    for mount in &config.mounts {
        info!("Mount {} -> {}", mount.mount, mount.to);
    }
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {}", current_dir.display());
    }
}

#[derive(Debug, Default)]
struct ParsedArgs {
    config: Option<PathBuf>,
    address: Option<String>,
    root: Option<String>,
    debug: bool,
    help: bool,
    mounts: Vec<String>,
}

impl ParsedArgs {
    fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Directory that relative TLS paths are resolved against.
    fn config_base(&self) -> PathBuf {
        self.config_path()
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn parse_args() -> Result<ParsedArgs, String> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from<I>(args: I) -> Result<ParsedArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    if args.iter().any(|arg| is_help_flag(arg)) {
        return Ok(ParsedArgs {
            help: true,
            ..ParsedArgs::default()
        });
    }

    let mut parsed = ParsedArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--" => continue,
            "-c" | "--config" => {
                let value = args.next().ok_or_else(|| format!("Missing value for {}", arg))?;
                parsed.config = Some(PathBuf::from(value));
            }
            "-a" | "--address" => {
                parsed.address = Some(args.next().ok_or_else(|| format!("Missing value for {}", arg))?);
            }
            "-r" | "--root" => {
                parsed.root = Some(args.next().ok_or_else(|| format!("Missing value for {}", arg))?);
            }
            "--debug" => parsed.debug = true,
            flag if flag.starts_with('-') => return Err(format!("Unknown option {}", flag)),
            _ => parsed.mounts.push(arg),
        }
    }
    Ok(parsed)
}

fn is_help_flag(arg: &str) -> bool {
    arg == "-h" || arg == "--help"
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::LevelFilter;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parse_args_defaults() {
        let parsed = parse_args_from(Vec::new()).expect("parse args");
        assert!(!parsed.help && !parsed.debug);
        assert_eq!(parsed.config_path(), PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(parsed.config_base(), PathBuf::from("."));
        assert!(parsed.mounts.is_empty());
    }

    #[test]
    fn parse_args_accepts_short_and_long_options() {
        let parsed = parse_args_from(args(&[
            "-c", "site/diecast.yml", "--address", "0.0.0.0:8080", "-r", "public", "--debug",
        ]))
        .expect("parse args");
        assert_eq!(parsed.config, Some(PathBuf::from("site/diecast.yml")));
        assert_eq!(parsed.config_base(), PathBuf::from("site"));
        assert_eq!(parsed.address.as_deref(), Some("0.0.0.0:8080"));
        assert_eq!(parsed.root.as_deref(), Some("public"));
        assert!(parsed.debug);
    }

    #[test]
    fn parse_args_collects_trailing_mounts() {
        let parsed =
            parse_args_from(args(&["-a", ":9000", "/api:https://api.example.com", "/assets:./static"]))
                .expect("parse args");
        assert_eq!(
            parsed.mounts,
            vec!["/api:https://api.example.com".to_string(), "/assets:./static".to_string()]
        );
    }

    #[test]
    fn parse_args_rejects_missing_values_and_unknown_flags() {
        assert!(parse_args_from(args(&["-c"])).unwrap_err().contains("-c"));
        assert!(parse_args_from(args(&["--verbose"])).unwrap_err().contains("--verbose"));
        let parsed = parse_args_from(args(&["not-a-mount"])).expect("parse args");
        assert!(load_config(&parsed).is_err());
    }

    #[test]
    fn parse_args_accepts_help_flag_anywhere() {
        let parsed = parse_args_from(args(&["-c", "x.yml", "--help"])).expect("parse args");
        assert!(parsed.help);
        assert!(is_help_flag("-h"));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let parsed = parse_args_from(args(&["-c", "/nonexistent/diecast.yml"])).expect("parse args");
        assert!(load_config(&parsed).is_err());
    }

    #[test]
    fn command_line_overrides_the_config() {
        // No diecast.yml exists in the crate directory, so the defaults are used.
        let parsed = parse_args_from(args(&["-a", "127.0.0.1:9999", "--debug", "/api:http://127.0.0.1:1"]))
            .expect("parse args");
        let config = load_config(&parsed).expect("config");
        assert_eq!(config.address, "127.0.0.1:9999");
        assert!(config.debug);
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.mounts.len(), 1);
    }
}
