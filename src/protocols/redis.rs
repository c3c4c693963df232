// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{Protocol, ProtocolOptions, ProtocolRequest, ProtocolResponse, decode_component};
use crate::error::DiecastError;
use crate::util::value::autotype;
use async_trait::async_trait;
use log::debug;
use redis::aio::MultiplexedConnection;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Commands refused outright: they block the connection or administer the server.
pub const BLACKLISTED_COMMANDS: &[&str] = &[
    "AUTH", "BGREWRITEAOF", "BGSAVE", "CLIENT", "CLUSTER", "COMMAND", "DBSIZE", "DEBUG", "DUMP",
    "ECHO", "EVALSHA", "EVAL", "FLUSHALL", "FLUSHDB", "INFO", "KEYS", "MEMORY", "MIGRATE",
    "MONITOR", "OBJECT", "PING", "PSUBSCRIBE", "PUBLISH", "PUBSUB", "PUNSUBSCRIBE", "QUIT",
    "RANDOMKEY", "REPLICAOF", "RESTORE", "ROLE", "SAVE", "SCAN", "SCRIPT", "SELECT", "SHUTDOWN",
    "SLAVEOF", "SLOWLOG", "SUBSCRIBE", "SWAPDB", "SYNC", "TYPE", "UNSUBSCRIBE", "UNWATCH",
    "WAIT", "WATCH",
];

const DEFAULT_HOST: &str = "localhost:6379";
const DEFAULT_MAX_IDLE: usize = 10;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(600);

struct PooledConnection {
    conn: MultiplexedConnection,
    created: Instant,
    last_used: Instant,
}

#[derive(Debug, Clone, Copy)]
struct PoolLimits {
    max_idle: usize,
    idle_timeout: Duration,
    max_lifetime: Duration,
}

/// Idle connections for one `host:port`.
struct HostPool {
    client: redis::Client,
    idle: Mutex<Vec<PooledConnection>>,
    limits: PoolLimits,
}

impl HostPool {
    fn new(host: &str, limits: PoolLimits) -> Result<Self, DiecastError> {
        Ok(Self {
            client: redis::Client::open(format!("redis://{}/", host))?,
            idle: Mutex::new(Vec::new()),
            limits,
        })
    }

    fn take_idle(&self) -> Option<PooledConnection> {
        let now = Instant::now();
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        idle.retain(|pooled| self.is_fresh(pooled, now));
        idle.pop()
    }

    fn is_fresh(&self, pooled: &PooledConnection, now: Instant) -> bool {
        now.duration_since(pooled.last_used) < self.limits.idle_timeout
            && now.duration_since(pooled.created) < self.limits.max_lifetime
    }

    async fn get(&self) -> Result<PooledConnection, DiecastError> {
        if let Some(pooled) = self.take_idle() {
            return Ok(pooled);
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        let now = Instant::now();
        Ok(PooledConnection {
            conn,
            created: now,
            last_used: now,
        })
    }

    fn put(&self, mut pooled: PooledConnection) {
        pooled.last_used = Instant::now();
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.limits.max_idle && self.is_fresh(&pooled, pooled.last_used) {
            idle.push(pooled);
        }
    }
}

/// Runs commands against Redis. The verb is the command and the URL path segments are
/// its arguments: `redis://localhost:6379/user:42` with verb `HGETALL`.
pub struct RedisProtocol {
    default_host: String,
    limits: PoolLimits,
    pools: Mutex<HashMap<String, Arc<HostPool>>>,
}

impl RedisProtocol {
    pub fn new(options: ProtocolOptions) -> Self {
        Self {
            default_host: options.string("default_host", DEFAULT_HOST),
            limits: PoolLimits {
                max_idle: options.usize("max_idle", DEFAULT_MAX_IDLE),
                idle_timeout: options.duration("idle_timeout", DEFAULT_IDLE_TIMEOUT),
                max_lifetime: options.duration("max_lifetime", DEFAULT_MAX_LIFETIME),
            },
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pool_for(&self, host: &str) -> Result<Arc<HostPool>, DiecastError> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pool) = pools.get(host) {
            return Ok(pool.clone());
        }
        debug!("RedisProtocol: created new pool to handle connections to {}", host);
        let pool = Arc::new(HostPool::new(host, self.limits)?);
        pools.insert(host.to_string(), pool.clone());
        Ok(pool)
    }

    fn host_for(&self, request: &ProtocolRequest) -> String {
        match (request.url.host_str(), request.url.port()) {
            (Some(host), Some(port)) if !host.is_empty() => format!("{}:{}", host, port),
            (Some(host), None) if !host.is_empty() => format!("{}:6379", host),
            _ => self.default_host.clone(),
        }
    }
}

/// Split the verb into the command and any arguments given inline (`"HGET field"`).
pub(crate) fn command_parts(verb: &str, path: &str) -> Result<(String, Vec<String>), DiecastError> {
    let verb = if verb.trim().is_empty() {
        "GET".to_string()
    } else {
        verb.trim().to_ascii_uppercase()
    };
    let mut words = verb.split_whitespace().map(str::to_string);
    let command = words.next().unwrap_or_else(|| "GET".to_string());

    if BLACKLISTED_COMMANDS.contains(&command.as_str()) {
        return Err(DiecastError::Forbidden(format!(
            "the {:?} command is not permitted",
            verb
        )));
    }

    let mut args: Vec<String> = words.collect();
    args.extend(
        path.trim_start_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(decode_component),
    );
    Ok((command, args))
}

fn bulk_to_json(bytes: &[u8]) -> JsonValue {
    autotype(&String::from_utf8_lossy(bytes))
}

pub(crate) fn reply_to_json(value: &redis::Value) -> JsonValue {
    match value {
        redis::Value::Nil => JsonValue::Null,
        redis::Value::Int(n) => JsonValue::from(*n),
        redis::Value::BulkString(bytes) => bulk_to_json(bytes),
        redis::Value::SimpleString(s) => autotype(s),
        redis::Value::Okay => JsonValue::String("OK".to_string()),
        redis::Value::Double(f) => JsonValue::from(*f),
        redis::Value::Boolean(b) => JsonValue::Bool(*b),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            JsonValue::Array(items.iter().map(reply_to_json).collect())
        }
        redis::Value::Map(pairs) => JsonValue::Object(
            pairs
                .iter()
                .map(|(k, v)| (crate::util::value::to_display(&reply_to_json(k)), reply_to_json(v)))
                .collect(),
        ),
        _ => JsonValue::Null,
    }
}

/// H-series replies are flat arrays of alternating fields and values.
pub(crate) fn pairs_to_object(items: &[JsonValue]) -> JsonValue {
    let mut object = Map::new();
    for pair in items.chunks(2) {
        let key = crate::util::value::to_display(&pair[0]);
        object.insert(key, pair.get(1).cloned().unwrap_or(JsonValue::Null));
    }
    JsonValue::Object(object)
}

#[async_trait]
impl Protocol for RedisProtocol {
    async fn retrieve(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, DiecastError> {
        let (command, args) = command_parts(&request.verb, request.url.path())?;
        let host = self.host_for(request);
        let pool = self.pool_for(&host)?;
        debug!("[{}] redis {} {} {:?}", request.request_id, host, command, args);

        let exchange = async {
            let mut pooled = pool.get().await?;
            let mut cmd = redis::cmd(&command);
            for arg in &args {
                cmd.arg(arg);
            }
            let reply: redis::Value = cmd.query_async(&mut pooled.conn).await?;
            pool.put(pooled);
            Ok::<_, DiecastError>(reply)
        };

        let reply = tokio::time::timeout(request.timeout, exchange)
            .await
            .map_err(|_| DiecastError::Timeout(format!("redis {} timed out", command)))??;

        let json = match reply_to_json(&reply) {
            JsonValue::Array(items) if command.starts_with('H') => pairs_to_object(&items),
            other => other,
        };

        match json {
            JsonValue::Array(_) | JsonValue::Object(_) => Ok(ProtocolResponse::ok(
                "application/json; charset=utf-8",
                serde_json::to_vec(&json)?,
            )),
            JsonValue::Null => Ok(ProtocolResponse::ok("text/plain; charset=utf-8", Vec::new())),
            scalar => Ok(ProtocolResponse::ok(
                "text/plain; charset=utf-8",
                crate::util::value::to_display(&scalar).into_bytes(),
            )),
        }
    }
}
