// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Binding, BindingRuntime};
use crate::context::{RequestScope, template_value};
use futures_util::FutureExt;
use log::{debug, error, warn};
use serde_json::{Map, Value as JsonValue, json};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Granularity of the background poller.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct SharedEntry {
    binding: Binding,
    interval: Duration,
    syncing: AtomicBool,
    last_refreshed: Mutex<Option<Instant>>,
}

impl SharedEntry {
    fn is_due(&self, now: Instant) -> bool {
        let last = self.last_refreshed.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(at) => now.duration_since(at) >= self.interval,
            None => true,
        }
    }
}

/// Clears the syncing flag even when a refresh panics.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Bindings with a poll interval, refreshed in the background and read by every request.
pub struct SharedBindings {
    entries: Vec<Arc<SharedEntry>>,
    values: RwLock<Map<String, JsonValue>>,
}

impl SharedBindings {
    pub fn new(bindings: &[Binding]) -> Arc<Self> {
        let entries = bindings
            .iter()
            .enumerate()
            .filter(|(_, binding)| binding.is_shared())
            .map(|(index, binding)| {
                let mut binding = binding.clone();
                if binding.name.trim().is_empty() {
                    binding.name = format!("shared.{}", index);
                }
                Arc::new(SharedEntry {
                    interval: binding.interval.unwrap_or_default(),
                    binding,
                    syncing: AtomicBool::new(false),
                    last_refreshed: Mutex::new(None),
                })
            })
            .collect();

        Arc::new(Self {
            entries,
            values: RwLock::new(Map::new()),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.binding.name.clone()).collect()
    }

    /// Current values; each entry is either the previous or the latest complete refresh.
    pub fn snapshot(&self) -> Map<String, JsonValue> {
        match self.values.read() {
            Ok(values) => values.clone(),
            Err(poisoned) => {
                error!("Shared binding cache lock poisoned; recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<JsonValue> {
        self.snapshot().get(name).cloned()
    }

    fn store(&self, name: &str, value: JsonValue) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(name.to_string(), value);
    }

    /// Refresh one binding now. Returns false when a refresh of it is already running.
    async fn refresh_entry(&self, entry: &SharedEntry, rt: &BindingRuntime) -> bool {
        if entry
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("shared binding {:?} is already syncing", entry.binding.name);
            return false;
        }
        let _guard = SyncGuard(&entry.syncing);

        let name = &entry.binding.name;
        let scope = Arc::new(RequestScope::detached(&format!("shared:{}", name), "GET", "/"));
        let data = json!({ "bindings": self.snapshot() });

        match entry.binding.evaluate(rt, &scope, &template_value(&scope, &data)).await {
            Ok(value) => {
                self.store(name, value.unwrap_or_else(|| entry.binding.fallback.clone()));
                let mut last = entry.last_refreshed.lock().unwrap_or_else(|e| e.into_inner());
                *last = Some(Instant::now());
            }
            Err(err) => warn!("async binding {}: {}", name, err),
        }
        true
    }

    /// Refresh a binding by name, outside the poller.
    pub async fn refresh(&self, name: &str, rt: &BindingRuntime) -> bool {
        match self.entries.iter().find(|entry| entry.binding.name == name) {
            Some(entry) => self.refresh_entry(entry, rt).await,
            None => false,
        }
    }

    /// Start the poller. Every due binding gets its own task so a slow origin never delays others.
    pub fn spawn(self: Arc<Self>, rt: BindingRuntime) -> Option<JoinHandle<()>> {
        if self.is_empty() {
            return None;
        }
        debug!("starting shared binding poller for {:?}", self.names());

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                for entry in &self.entries {
                    if entry.syncing.load(Ordering::Acquire) || !entry.is_due(now) {
                        continue;
                    }
                    let shared = self.clone();
                    let entry = entry.clone();
                    let rt = rt.clone();
                    tokio::spawn(async move {
                        let name = entry.binding.name.clone();
                        let refresh = AssertUnwindSafe(shared.refresh_entry(&entry, &rt));
                        if refresh.catch_unwind().await.is_err() {
                            error!("shared binding {:?} panicked during refresh", name);
                        }
                    });
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiecastError;
    use crate::protocols::{Protocol, ProtocolRegistry, ProtocolRequest, ProtocolResponse};
    use crate::templates::MiniJinjaEngine;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Protocol for Counter {
        async fn retrieve(&self, _request: &ProtocolRequest) -> Result<ProtocolResponse, DiecastError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(ProtocolResponse::ok("application/json", n.to_string().into_bytes()))
        }
    }

    fn runtime(delay: Duration) -> (BindingRuntime, Arc<Counter>) {
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
            delay,
        });
        let mut protocols = ProtocolRegistry::new();
        protocols.register("count", counter.clone());
        (
            BindingRuntime {
                engine: Arc::new(MiniJinjaEngine::default()),
                protocols: Arc::new(protocols),
                binding_prefix: String::new(),
                default_timeout: Duration::from_secs(5),
            },
            counter,
        )
    }

    fn shared_binding(name: &str, interval: Duration) -> Binding {
        Binding {
            name: name.to_string(),
            resource: "count://origin/value".to_string(),
            interval: Some(interval),
            ..Binding::default()
        }
    }

    #[test]
    fn only_bindings_with_intervals_are_shared() {
        let bindings = vec![
            shared_binding("", Duration::from_secs(1)),
            Binding {
                name: "per-request".to_string(),
                ..Binding::default()
            },
        ];
        let shared = SharedBindings::new(&bindings);
        assert_eq!(shared.names(), vec!["shared.0"]);
    }

    #[actix_web::test]
    async fn concurrent_refreshes_of_one_binding_are_suppressed() {
        let (rt, counter) = runtime(Duration::from_millis(50));
        let shared = SharedBindings::new(&[shared_binding("value", Duration::from_secs(60))]);

        let (first, second) = tokio::join!(shared.refresh("value", &rt), shared.refresh("value", &rt));
        assert!(first ^ second);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared.get("value"), Some(json!(1)));

        assert!(shared.refresh("value", &rt).await);
        assert_eq!(shared.get("value"), Some(json!(2)));
    }

    #[actix_web::test]
    async fn poller_refreshes_due_bindings() {
        let (rt, counter) = runtime(Duration::ZERO);
        let shared = SharedBindings::new(&[shared_binding("tick", Duration::from_millis(150))]);
        let handle = shared.clone().spawn(rt).expect("poller");

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.abort();

        assert!(shared.get("tick").is_some());
        assert!(counter.calls.load(Ordering::SeqCst) >= 2);
    }
}
