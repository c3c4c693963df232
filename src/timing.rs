// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

//! Per-request phase timers rendered as a `Server-Timing` header.

use std::time::{Duration, Instant};

pub const SERVER_TIMING_HEADER: &str = "Server-Timing";

#[derive(Debug, Clone)]
struct Phase {
    name: String,
    description: String,
    duration: Duration,
}

#[derive(Debug)]
pub struct RequestTimer {
    started: Instant,
    phases: Vec<Phase>,
}

/// An in-flight phase; hand it back to [`RequestTimer::finish`].
#[derive(Debug)]
pub struct PhaseHandle {
    name: String,
    description: String,
    started: Instant,
}

impl RequestTimer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            phases: Vec::new(),
        }
    }

    pub fn start(&self, name: &str, description: &str) -> PhaseHandle {
        PhaseHandle {
            name: name.to_string(),
            description: description.to_string(),
            started: Instant::now(),
        }
    }

    pub fn finish(&mut self, handle: PhaseHandle) {
        self.record(&handle.name, &handle.description, handle.started.elapsed());
    }

    pub fn record(&mut self, name: &str, description: &str, duration: Duration) {
        self.phases.push(Phase {
            name: sanitize_token(name),
            description: description.replace('"', "'"),
            duration,
        });
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// `name;dur=1.234;desc="..."` entries, followed by the total.
    pub fn header_value(&self) -> String {
        let mut entries: Vec<String> = self
            .phases
            .iter()
            .map(|phase| {
                let mut entry = format!("{};dur={:.3}", phase.name, millis(phase.duration));
                if !phase.description.is_empty() {
                    entry.push_str(&format!(";desc=\"{}\"", phase.description));
                }
                entry
            })
            .collect();
        entries.push(format!("total;dur={:.3}", millis(self.elapsed())));
        entries.join(", ")
    }
}

impl Default for RequestTimer {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Server-Timing metric names are HTTP tokens.
fn sanitize_token(name: &str) -> String {
    let token: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '-' })
        .collect();
    if token.is_empty() { "phase".to_string() } else { token }
}
