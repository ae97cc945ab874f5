//! fluxgated — the fluxgate proxy daemon.
//!
//! Assembles the fluxgate subsystems in one process:
//! - Configuration store (Redis, or in-memory for standalone runs)
//! - Live topology with atomic reload
//! - Durable per-backend write buffers and their drain tasks
//! - Admin REST API
//!
//! # Usage
//!
//! ```text
//! fluxgated --node l1 --redis localhost:6379 --data-dir /var/lib/fluxgate
//! fluxgated --config /etc/fluxgate.toml --turbo
//! ```

mod daemon;
mod settings;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::daemon::Exit;
use crate::settings::{DaemonSettings, RedisSection, StoreKind};

/// Exit code after a write buffer failure.
const QUEUE_FAILURE_EXIT_CODE: i32 = 2;

const DEFAULT_LOG_FILTER: &str = "info,fluxgated=debug,fluxgate=debug";

#[derive(Parser, Debug)]
#[command(name = "fluxgated", about = "fluxgate proxy daemon", version)]
struct Cli {
    /// TOML settings file. Flags given here override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node name used to look up node settings [default: l1].
    #[arg(long)]
    node: Option<String>,

    /// Redis address, host:port [default: localhost:6379].
    #[arg(long)]
    redis: Option<String>,

    /// Redis password.
    #[arg(long)]
    redis_pwd: Option<String>,

    /// Redis database index [default: 0].
    #[arg(long)]
    redis_db: Option<i64>,

    /// Configuration store backend [default: redis].
    #[arg(long, value_enum)]
    store: Option<StoreKind>,

    /// Key namespace prefix [default: influx-proxy].
    #[arg(long)]
    key_prefix: Option<String>,

    /// Directory for the write buffers [default: /var/lib/fluxgate].
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Batch write-buffer fsyncs. A crash may lose the newest writes.
    #[arg(long)]
    turbo: bool,

    /// Append logs to this file instead of stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn overrides(&self) -> DaemonSettings {
        DaemonSettings {
            node: self.node.clone(),
            store: self.store,
            key_prefix: self.key_prefix.clone(),
            data_dir: self.data_dir.clone(),
            turbo: self.turbo.then_some(true),
            log_file: self.log_file.clone(),
            log_json: self.log_json.then_some(true),
            redis: RedisSection {
                addr: self.redis.clone(),
                password: self.redis_pwd.clone(),
                db: self.redis_db,
            },
        }
    }
}

fn init_tracing(log_file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(log_file.is_none())
        .with_writer(writer);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => DaemonSettings::from_file(path)?,
        None => DaemonSettings::default(),
    };
    let settings = file.overlay(cli.overrides()).resolve();

    init_tracing(settings.log_file.as_deref(), settings.log_json)?;
    if let Some(path) = &cli.config {
        tracing::info!(path = %path.display(), "settings file loaded");
    }

    match daemon::run(settings).await? {
        Exit::Stopped => Ok(()),
        Exit::QueueFailure(e) => {
            error!(queue = %e.name, error = %e, "durable write buffer is inconsistent, terminating");
            std::process::exit(QUEUE_FAILURE_EXIT_CODE);
        }
    }
}
