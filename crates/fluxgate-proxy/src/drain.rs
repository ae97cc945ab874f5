//! Drain loop: delivers buffered writes to their backend.
//!
//! Each backend queue gets one background task. The task peeks the
//! oldest payload, delivers it, and removes it from the queue only after
//! the backend confirmed the write. Failures back off exponentially
//! (base interval → 60 s) and a single success resets the backoff.
//!
//! ```text
//! DrainPool
//!   ├── per-backend task: run_drain_loop
//!   │   ├── drain_once() → DrainOutcome
//!   │   └── Backoff between attempts
//!   └── fatal channel → process owner
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fluxgate_config::{BackendConfig, DEFAULT_INTERVAL_MS};
use fluxgate_queue::{DurableQueue, FatalQueueError};

use crate::buffer::QueueSet;
use crate::delivery::DeliveryError;
use crate::topology::TopologyHandle;

/// Ceiling for the wait between failed deliveries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Sends one payload to a backend.
pub trait Deliver: Send + Sync + 'static {
    fn deliver(
        &self,
        backend: &BackendConfig,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// Result of one drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing queued.
    Idle,
    /// The oldest payload was delivered and removed.
    Delivered,
    /// Delivery failed; the payload is still at the front.
    Failed,
}

/// Try to deliver the oldest queued payload.
pub async fn drain_once<D: Deliver>(
    queue: &DurableQueue,
    backend: &BackendConfig,
    deliver: &D,
) -> Result<DrainOutcome, FatalQueueError> {
    let Some(payload) = queue.peek()? else {
        return Ok(DrainOutcome::Idle);
    };
    match deliver.deliver(backend, &payload).await {
        Ok(()) => {
            queue.dequeue()?;
            debug!(
                queue = queue.name(),
                bytes = payload.len(),
                pending = queue.len(),
                "buffered write delivered"
            );
            Ok(DrainOutcome::Delivered)
        }
        Err(e) => {
            warn!(queue = queue.name(), error = %e, pending = queue.len(), "buffered write not delivered");
            Ok(DrainOutcome::Failed)
        }
    }
}

/// Exponential backoff between failed deliveries.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            current: base,
            max: MAX_BACKOFF,
        }
    }

    /// Base interval of a backend (its `interval`, in ms).
    pub fn for_backend(backend: &BackendConfig) -> Self {
        Self::new(base_interval(backend))
    }

    /// Record a failure; returns the wait before the next attempt.
    pub fn failure(&mut self) -> Duration {
        self.current = (self.current * 2).min(self.max);
        self.current
    }

    /// Record a success; the next wait is the base interval again.
    pub fn success(&mut self) -> Duration {
        self.current = self.base;
        self.current
    }

    /// Change the base interval, e.g. after a reload. Restarts the backoff.
    pub fn rebase(&mut self, base: Duration) {
        if base != self.base {
            self.base = base;
            self.current = base;
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

fn base_interval(backend: &BackendConfig) -> Duration {
    let ms = if backend.interval > 0 {
        backend.interval
    } else {
        DEFAULT_INTERVAL_MS
    };
    Duration::from_millis(ms as u64)
}

/// Drain one backend's queue until shutdown.
///
/// Delivers back to back while payloads go through and waits out the
/// backoff otherwise. A backend that disappeared from the topology is
/// polled at the default interval; its payloads stay queued. Returns an
/// error only when the queue became unusable.
pub async fn run_drain_loop<D: Deliver>(
    name: &str,
    queue: Arc<DurableQueue>,
    topology: Arc<TopologyHandle>,
    deliver: Arc<D>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), FatalQueueError> {
    let mut backoff = Backoff::new(Duration::from_millis(DEFAULT_INTERVAL_MS as u64));
    debug!(backend = name, pending = queue.len(), "drain loop starting");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let backend = topology.current().backend(name).cloned();
        let wait = match backend {
            Some(backend) => {
                backoff.rebase(base_interval(&backend));
                match drain_once(&queue, &backend, deliver.as_ref()).await? {
                    DrainOutcome::Delivered => {
                        backoff.success();
                        continue;
                    }
                    DrainOutcome::Idle => backoff.success(),
                    DrainOutcome::Failed => backoff.failure(),
                }
            }
            None => backoff.current(),
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {}
        }
    }

    debug!(backend = name, pending = queue.len(), "drain loop stopped");
    Ok(())
}

/// Runs one drain task per backend queue.
pub struct DrainPool<D: Deliver> {
    topology: Arc<TopologyHandle>,
    deliver: Arc<D>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    fatal_tx: mpsc::UnboundedSender<FatalQueueError>,
}

impl<D: Deliver> DrainPool<D> {
    /// Create a pool. Fatal queue errors from any task arrive on the
    /// returned receiver; the owner decides how to stop the process.
    pub fn new(
        topology: Arc<TopologyHandle>,
        deliver: Arc<D>,
    ) -> (Self, mpsc::UnboundedReceiver<FatalQueueError>) {
        let (shutdown_tx, _) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let pool = Self {
            topology,
            deliver,
            tasks: Mutex::new(HashMap::new()),
            shutdown_tx,
            fatal_tx,
        };
        (pool, fatal_rx)
    }

    /// Start a drain task for every queue in `queues` that has none.
    ///
    /// Returns how many tasks were started.
    pub async fn sync(&self, queues: &QueueSet) -> usize {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());

        let mut started = 0;
        for queue in queues.all() {
            let name = queue.name().to_string();
            if tasks.contains_key(&name) {
                continue;
            }
            let handle = self.spawn(name.clone(), queue);
            tasks.insert(name, handle);
            started += 1;
        }
        if started > 0 {
            info!(started, running = tasks.len(), "drain tasks started");
        }
        started
    }

    fn spawn(&self, name: String, queue: Arc<DurableQueue>) -> JoinHandle<()> {
        let topology = Arc::clone(&self.topology);
        let deliver = Arc::clone(&self.deliver);
        let shutdown = self.shutdown_tx.subscribe();
        let fatal_tx = self.fatal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_drain_loop(&name, queue, topology, deliver, shutdown).await {
                // The receiver may be gone during shutdown; nothing else to do.
                let _ = fatal_tx.send(e);
            }
        })
    }

    /// Names of backends with a running drain task, sorted.
    pub async fn active(&self) -> Vec<String> {
        let tasks = self.tasks.lock().await;
        let mut names: Vec<String> = tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Signal every task to stop and wait for them.
    ///
    /// A delivery already in flight completes first, so no payload is
    /// left half-acknowledged.
    pub async fn stop_all(&self) {
        self.shutdown_tx.send_replace(true);
        let mut tasks = self.tasks.lock().await;
        for (name, handle) in tasks.drain() {
            if let Err(e) = handle.await {
                warn!(backend = %name, error = %e, "drain task ended abnormally");
            }
        }
        info!("all drain tasks stopped");
    }
}
