//! Daemon settings: optional TOML file overlaid with command-line flags.
//!
//! ```toml
//! node = "l1"
//! store = "redis"
//! key_prefix = "influx-proxy"
//! data_dir = "/var/lib/fluxgate"
//! turbo = false
//! log_file = "/var/log/fluxgate.log"
//! log_json = false
//!
//! [redis]
//! addr = "localhost:6379"
//! password = ""
//! db = 0
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use fluxgate_config::RedisOptions;
use fluxgate_config::keys::DEFAULT_PREFIX;
use fluxgate_queue::{Durability, QueueOptions};

pub const DEFAULT_NODE: &str = "l1";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/fluxgate";

/// Where configuration records live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// A shared Redis server.
    #[default]
    Redis,
    /// In-process store, empty at startup. For standalone runs.
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisSection {
    pub addr: Option<String>,
    pub password: Option<String>,
    pub db: Option<i64>,
}

/// Settings as written in the file or given on the command line.
/// Every field is optional; unset fields fall through to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
    pub node: Option<String>,
    pub store: Option<StoreKind>,
    pub key_prefix: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub turbo: Option<bool>,
    pub log_file: Option<PathBuf>,
    pub log_json: Option<bool>,
    pub redis: RedisSection,
}

impl DaemonSettings {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read settings file {}", path.display()))?;
        let settings = toml::from_str(&content)
            .with_context(|| format!("parse settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Layer `over` on top of `self`; fields set in `over` win.
    pub fn overlay(self, over: DaemonSettings) -> DaemonSettings {
        DaemonSettings {
            node: over.node.or(self.node),
            store: over.store.or(self.store),
            key_prefix: over.key_prefix.or(self.key_prefix),
            data_dir: over.data_dir.or(self.data_dir),
            turbo: over.turbo.or(self.turbo),
            log_file: over.log_file.or(self.log_file),
            log_json: over.log_json.or(self.log_json),
            redis: RedisSection {
                addr: over.redis.addr.or(self.redis.addr),
                password: over.redis.password.or(self.redis.password),
                db: over.redis.db.or(self.redis.db),
            },
        }
    }

    /// Fill every unset field with its default.
    pub fn resolve(self) -> Settings {
        let redis_defaults = RedisOptions::default();
        Settings {
            node: self.node.unwrap_or_else(|| DEFAULT_NODE.to_string()),
            store: self.store.unwrap_or_default(),
            key_prefix: self.key_prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            durability: if self.turbo.unwrap_or(false) {
                Durability::Turbo
            } else {
                Durability::Synced
            },
            log_file: self.log_file,
            log_json: self.log_json.unwrap_or(false),
            redis: RedisOptions {
                addr: self.redis.addr.unwrap_or(redis_defaults.addr),
                password: self.redis.password.unwrap_or(redis_defaults.password),
                db: self.redis.db.unwrap_or(redis_defaults.db),
            },
        }
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub node: String,
    pub store: StoreKind,
    pub key_prefix: String,
    pub data_dir: PathBuf,
    pub durability: Durability,
    pub log_file: Option<PathBuf>,
    pub log_json: bool,
    pub redis: RedisOptions,
}

impl Settings {
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            durability: self.durability,
            ..QueueOptions::default()
        }
    }
}
