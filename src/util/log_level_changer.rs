// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use env_logger::Logger;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;

/// Rewrites the level of records whose target starts with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion {
    pub prefix: String,
    pub from: Level,
    pub to: Level,
}

impl Demotion {
    pub fn new(prefix: &str, from: Level, to: Level) -> Self {
        Self {
            prefix: prefix.to_string(),
            from,
            to,
        }
    }
}

/// Dependencies whose debug output drowns the request log.
pub fn default_demotions() -> Vec<Demotion> {
    vec![
        Demotion::new("html5ever", Level::Debug, Level::Trace),
        Demotion::new("rustls", Level::Debug, Level::Trace),
        Demotion::new("hyper_util", Level::Debug, Level::Trace),
        Demotion::new("reqwest::connect", Level::Debug, Level::Trace),
        Demotion::new("redis", Level::Debug, Level::Trace),
    ]
}

struct DemotingLogger {
    inner: Logger,
    demotions: Vec<Demotion>,
}

impl DemotingLogger {
    fn level_for(&self, target: &str, level: Level) -> Level {
        self.demotions
            .iter()
            .find(|rule| rule.from == level && target.starts_with(&rule.prefix))
            .map(|rule| rule.to)
            .unwrap_or(level)
    }
}

impl Log for DemotingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let level = self.level_for(metadata.target(), metadata.level());
        self.inner.enabled(
            &Metadata::builder()
                .level(level)
                .target(metadata.target())
                .build(),
        )
    }

    fn log(&self, record: &Record) {
        let level = self.level_for(record.target(), record.level());
        if level == record.level() {
            self.inner.log(record);
            return;
        }
        self.inner.log(
            &Record::builder()
                .level(level)
                .target(record.target())
                .args(*record.args())
                .module_path(record.module_path())
                .file(record.file())
                .line(record.line())
                .build(),
        );
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// An env_logger writing timestamped lines to stdout. `RUST_LOG` still refines per-module filters.
pub fn build_logger(level: LevelFilter) -> Logger {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .build()
}

/// Install `logger` as the global logger with `demotions` applied.
pub fn init_logger(demotions: Vec<Demotion>, logger: Logger) -> Result<(), SetLoggerError> {
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(DemotingLogger {
        inner: logger,
        demotions,
    }))?;
    log::set_max_level(max_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(demotions: Vec<Demotion>) -> DemotingLogger {
        DemotingLogger {
            inner: env_logger::Builder::new().filter_level(LevelFilter::Debug).build(),
            demotions,
        }
    }

    #[test]
    fn matching_prefix_and_level_is_demoted() {
        let logger = logger(default_demotions());
        assert_eq!(logger.level_for("rustls::server", Level::Debug), Level::Trace);
        assert_eq!(logger.level_for("rustls::server", Level::Warn), Level::Warn);
        assert_eq!(logger.level_for("diecast::public", Level::Debug), Level::Debug);
    }

    #[test]
    fn demoted_records_fall_below_the_filter() {
        let logger = logger(vec![Demotion::new("noisy", Level::Debug, Level::Trace)]);
        let noisy = Metadata::builder().level(Level::Debug).target("noisy::io").build();
        let quiet = Metadata::builder().level(Level::Debug).target("diecast").build();
        assert!(!logger.enabled(&noisy));
        assert!(logger.enabled(&quiet));
    }
}
