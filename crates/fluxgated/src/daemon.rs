//! Daemon lifecycle.
//!
//! 1. Connects the configuration store and resolves this node's settings
//! 2. Loads the topology and opens one write buffer per backend
//! 3. Runs a drain task per buffer, adding tasks after every reload
//! 4. Serves the admin API until Ctrl-C or a fatal queue failure

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use fluxgate_api::{AdminState, build_router};
use fluxgate_config::{ConfigStore, KeySpace, KvStore, MemoryKv, NodeConfig, RedisKv};
use fluxgate_proxy::{DrainPool, HttpDelivery, ProxySync, QueueSet, TopologyHandle};
use fluxgate_queue::FatalQueueError;

use crate::settings::{Settings, StoreKind};

/// Used when the node record has no listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:6666";

/// Lower bound for every HTTP timeout.
pub const MIN_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

/// How long open connections may linger after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Why the daemon stopped.
#[derive(Debug)]
pub enum Exit {
    /// Shutdown was requested.
    Stopped,
    /// A write buffer became unusable; the process must terminate.
    QueueFailure(FatalQueueError),
}

/// HTTP timeouts from the node record, in whole seconds, never below
/// [`MIN_HTTP_TIMEOUT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimeouts {
    pub read: Duration,
    pub write: Duration,
    pub idle: Duration,
}

impl ServerTimeouts {
    pub fn from_node(node: &NodeConfig) -> Self {
        let clamp = |secs: i64| Duration::from_secs(secs.max(0) as u64).max(MIN_HTTP_TIMEOUT);
        Self {
            read: clamp(node.read_timeout),
            write: clamp(node.write_timeout),
            idle: clamp(node.idle_timeout),
        }
    }
}

/// Socket address to bind. Accepts `:port` shorthand.
pub fn listen_addr(node: &NodeConfig) -> String {
    let addr = node.listen_addr.trim();
    if addr.is_empty() {
        DEFAULT_LISTEN_ADDR.to_string()
    } else if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

/// Fail requests whose handler runs past the write timeout.
async fn request_deadline(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "request timed out").into_response(),
    }
}

fn open_kv(settings: &Settings) -> anyhow::Result<Arc<dyn KvStore>> {
    Ok(match settings.store {
        StoreKind::Redis => {
            let kv = RedisKv::new(&settings.redis).context("create redis client")?;
            info!(addr = %settings.redis.addr, db = settings.redis.db, "using redis configuration store");
            Arc::new(kv)
        }
        StoreKind::Memory => {
            warn!("using in-memory configuration store, records are lost on exit");
            Arc::new(MemoryKv::new())
        }
    })
}

/// Run the daemon until shutdown.
pub async fn run(settings: Settings) -> anyhow::Result<Exit> {
    info!(node = %settings.node, "fluxgate daemon starting");

    // ── Configuration store ──────────────────────────────────────
    let kv = open_kv(&settings)?;
    let store = ConfigStore::new(kv, KeySpace::new(settings.key_prefix.clone()), settings.node.clone());

    let node = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.load_node())
            .await
            .context("node config task")?
            .context("load node config")?
    };
    if node.write_tracing != 0 {
        info!("write tracing enabled");
    }
    if node.query_tracing != 0 {
        info!("query tracing enabled");
    }

    // ── Write buffers and topology ───────────────────────────────
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("create data dir {}", settings.data_dir.display()))?;
    let queues = Arc::new(QueueSet::new(&settings.data_dir, settings.queue_options()));
    let topology = Arc::new(TopologyHandle::default());
    let sync = Arc::new(ProxySync::new(Arc::clone(&topology), Arc::clone(&queues)));
    info!(path = ?settings.data_dir, durability = ?settings.durability, "write buffers ready");

    {
        let (sync, store) = (Arc::clone(&sync), store.clone());
        match tokio::task::spawn_blocking(move || sync.reload(&store)).await? {
            Ok(_) => {}
            // Serve anyway; an operator can fix the records and POST /reload.
            Err(e) => warn!(error = %e, "initial topology load failed, starting empty"),
        }
    }

    // ── Drain tasks ──────────────────────────────────────────────
    let (pool, mut fatal_rx) = DrainPool::new(Arc::clone(&topology), Arc::new(HttpDelivery::new()));
    let pool = Arc::new(pool);
    pool.sync(&queues).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reload_handle = {
        let (pool, queues) = (Arc::clone(&pool), Arc::clone(&queues));
        let mut reloads = sync.subscribe();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = reloads.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        pool.sync(&queues).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    // ── Admin API ────────────────────────────────────────────────
    let timeouts = ServerTimeouts::from_node(&node);
    let router = build_router(AdminState {
        store,
        sync: Arc::clone(&sync),
    })
    .layer(axum::middleware::from_fn_with_state(timeouts.write, request_deadline));

    let addr = listen_addr(&node);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        %addr,
        read_timeout = ?timeouts.read,
        write_timeout = ?timeouts.write,
        idle_timeout = ?timeouts.idle,
        "admin API listening"
    );

    let (fatal_tx, mut fatal_out) = oneshot::channel::<FatalQueueError>();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("shutdown signal received"),
                    Err(e) => error!(error = %e, "cannot listen for shutdown signal, stopping"),
                }
            }
            Some(fatal) = fatal_rx.recv() => {
                error!(error = %fatal, "write buffer failed, stopping");
                let _ = fatal_tx.send(fatal);
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let mut grace_rx = shutdown_rx.clone();
    let grace = async move {
        let _ = grace_rx.wait_for(|stopping| *stopping).await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };
    tokio::select! {
        result = server.into_future() => result.context("admin API server")?,
        _ = grace => warn!(grace = ?SHUTDOWN_GRACE, "connections still open, closing them"),
    }

    // ── Clean up ─────────────────────────────────────────────────
    pool.stop_all().await;
    let _ = reload_handle.await;
    if let Err(e) = queues.close_all() {
        warn!(error = %e, "write buffers not closed cleanly");
    }

    match fatal_out.try_recv() {
        Ok(fatal) => Ok(Exit::QueueFailure(fatal)),
        Err(_) => {
            info!("fluxgate daemon stopped");
            Ok(Exit::Stopped)
        }
    }
}
