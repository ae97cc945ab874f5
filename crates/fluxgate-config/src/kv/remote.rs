//! Redis-backed store.
//!
//! One connection, established lazily and guarded by a mutex so calls
//! from concurrent callers are serialized. When a command fails at the
//! transport level the connection is dropped; the next call reconnects.
//! Nothing is retried here.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use redis::{
    Client, Commands, Connection, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError,
    RedisResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::KvStore;
use crate::error::{ConfigError, ConfigResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_PORT: u16 = 6379;

/// Where to find the Redis server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisOptions {
    /// `host:port`.
    pub addr: String,
    pub password: String,
    pub db: i64,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".to_string(),
            password: String::new(),
            db: 0,
        }
    }
}

impl RedisOptions {
    /// Connection parameters for the `redis` crate.
    ///
    /// The password is passed through as given, so it may contain any
    /// character. `addr` is `host`, `host:port` or `[v6]:port`.
    pub fn connection_info(&self) -> ConfigResult<ConnectionInfo> {
        let (host, port) = split_host_port(&self.addr)
            .ok_or_else(|| ConfigError::Connectivity(format!("invalid redis address {:?}", self.addr)))?;
        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: (!self.password.is_empty()).then(|| self.password.clone()),
                ..RedisConnectionInfo::default()
            },
        })
    }
}

fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let addr = addr.trim();
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return None,
        };
        return (!host.is_empty()).then(|| (host.to_string(), port));
    }
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (addr, DEFAULT_PORT),
    };
    (!host.is_empty() && !host.contains(':')).then(|| (host.to_string(), port))
}

/// A [`KvStore`] backed by a Redis server.
pub struct RedisKv {
    client: Client,
    addr: String,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").field("addr", &self.addr).finish()
    }
}

impl RedisKv {
    /// Build a client. No connection is made until the first command.
    pub fn new(options: &RedisOptions) -> ConfigResult<Self> {
        let client = Client::open(options.connection_info()?)
            .map_err(|e| ConfigError::Connectivity(format!("{}: {e}", options.addr)))?;
        Ok(Self {
            client,
            addr: options.addr.clone(),
            conn: Mutex::new(None),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<Connection>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A caller panicked mid-command; the connection may hold a
                // half-read reply.
                let mut guard = poisoned.into_inner();
                *guard = None;
                guard
            }
        }
    }

    fn connect(&self) -> ConfigResult<Connection> {
        let conn = self
            .client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|e| ConfigError::Connectivity(format!("{}: {e}", self.addr)))?;
        debug!(addr = %self.addr, "redis connection established");
        Ok(conn)
    }

    /// Run one command on the shared connection.
    fn with_conn<T>(&self, op: impl FnOnce(&mut Connection) -> RedisResult<T>) -> ConfigResult<T> {
        let mut slot = self.slot();
        let conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let result = op(slot.insert(conn));
        result.map_err(|err| {
            if is_transport_error(&err) {
                warn!(addr = %self.addr, error = %err, "redis connection lost");
                *slot = None;
                ConfigError::Connectivity(format!("{}: {err}", self.addr))
            } else {
                ConfigError::Store(err.to_string())
            }
        })
    }
}

fn is_transport_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

/// Escape glob metacharacters so a prefix matches literally in `KEYS`.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl KvStore for RedisKv {
    fn hgetall(&self, key: &str) -> ConfigResult<HashMap<String, String>> {
        self.with_conn(|conn| conn.hgetall(key))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> ConfigResult<()> {
        self.with_conn(|conn| conn.hset::<_, _, _, ()>(key, field, value))
    }

    fn keys_with_prefix(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let pattern = format!("{}*", glob_escape(prefix));
        self.with_conn(|conn| conn.keys(pattern))
    }

    fn lrange_all(&self, key: &str) -> ConfigResult<Vec<String>> {
        self.with_conn(|conn| conn.lrange(key, 0, -1))
    }

    fn rpush(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.with_conn(|conn| conn.rpush::<_, _, ()>(key, value))
    }

    fn del(&self, key: &str) -> ConfigResult<bool> {
        self.with_conn(|conn| conn.del::<_, i64>(key)).map(|n| n > 0)
    }
}
