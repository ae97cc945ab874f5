//! Topology synchronization: bridges the configuration store to the
//! running proxy.
//!
//! `ProxySync` reads node, backend and measurement records and swaps a
//! new [`Topology`] in only when all three loaded cleanly. A failed
//! reload leaves the previous topology serving.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use fluxgate_config::{ConfigResult, ConfigStore};

use crate::buffer::QueueSet;
use crate::topology::{Topology, TopologyHandle};

/// Owns the live topology and the per-backend write buffers.
pub struct ProxySync {
    topology: Arc<TopologyHandle>,
    queues: Arc<QueueSet>,
    generation: watch::Sender<u64>,
}

impl ProxySync {
    pub fn new(topology: Arc<TopologyHandle>, queues: Arc<QueueSet>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            topology,
            queues,
            generation,
        }
    }

    pub fn topology(&self) -> &Arc<TopologyHandle> {
        &self.topology
    }

    pub fn queues(&self) -> &Arc<QueueSet> {
        &self.queues
    }

    /// Notified with an increasing counter after every successful reload.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Full reload from the store.
    ///
    /// Blocking; call it from a blocking context.
    pub fn reload(&self, store: &ConfigStore) -> ConfigResult<SyncStats> {
        let node = store.load_node()?;
        let backends = store.load_backends()?;
        let measurements = store.load_measurements()?;

        let mut stats = SyncStats {
            backends: backends.len(),
            measurements: measurements.len(),
            ..SyncStats::default()
        };

        let topology = Topology::new(node, backends, measurements);
        for name in topology.backend_names() {
            match self.queues.ensure_tracked(&name) {
                Ok((_, true)) => stats.queues_opened += 1,
                Ok((_, false)) => {}
                Err(e) => {
                    // The backend still routes; its writes just cannot be buffered.
                    error!(backend = %name, error = %e, "failed to open write buffer");
                    stats.queue_errors += 1;
                }
            }
        }
        self.topology.replace(topology);
        self.generation.send_modify(|g| *g += 1);

        info!(
            backends = stats.backends,
            measurements = stats.measurements,
            queues_opened = stats.queues_opened,
            queue_errors = stats.queue_errors,
            "topology reloaded"
        );
        Ok(stats)
    }
}

/// Reload statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub backends: usize,
    pub measurements: usize,
    pub queues_opened: usize,
    pub queue_errors: usize,
}
