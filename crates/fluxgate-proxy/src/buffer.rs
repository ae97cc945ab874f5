//! Per-backend write buffers.
//!
//! Writes that could not be forwarded are parked in the backend's
//! [`DurableQueue`] until the drain loop delivers them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use fluxgate_queue::{Durability, DurableQueue, QueueOptions, QueueResult};

/// Registry of one durable queue per backend under a common directory.
pub struct QueueSet {
    base: PathBuf,
    /// Options for queues opened from now on.
    options: RwLock<QueueOptions>,
    queues: RwLock<HashMap<String, Arc<DurableQueue>>>,
}

impl QueueSet {
    pub fn new(base: impl Into<PathBuf>, options: QueueOptions) -> Self {
        Self {
            base: base.into(),
            options: RwLock::new(options),
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn options(&self) -> QueueOptions {
        *self.options.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue for `name`, opening it on first use.
    pub fn ensure(&self, name: &str) -> QueueResult<Arc<DurableQueue>> {
        self.ensure_tracked(name).map(|(queue, _)| queue)
    }

    /// Like [`ensure`](Self::ensure), also reporting whether the queue
    /// was opened by this call.
    pub(crate) fn ensure_tracked(&self, name: &str) -> QueueResult<(Arc<DurableQueue>, bool)> {
        if let Some(queue) = self.get(name) {
            return Ok((queue, false));
        }
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have opened it while we waited for the lock.
        if let Some(queue) = queues.get(name) {
            return Ok((Arc::clone(queue), false));
        }
        let queue = Arc::new(DurableQueue::open(&self.base, name, self.options())?);
        queues.insert(name.to_string(), Arc::clone(&queue));
        debug!(backend = name, pending = queue.len(), "write buffer opened");
        Ok((queue, true))
    }

    pub fn get(&self, name: &str) -> Option<Arc<DurableQueue>> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        queues.get(name).cloned()
    }

    /// Park a payload for later delivery to `name`.
    pub fn buffer(&self, name: &str, payload: &[u8]) -> QueueResult<()> {
        self.ensure(name)?.enqueue(payload)
    }

    /// Pending item count per backend.
    pub fn sizes(&self) -> BTreeMap<String, usize> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        queues.iter().map(|(name, q)| (name.clone(), q.len())).collect()
    }

    /// Backend names with an open queue, sorted.
    pub fn names(&self) -> Vec<String> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn all(&self) -> Vec<Arc<DurableQueue>> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        queues.values().cloned().collect()
    }

    /// Switch between synced and turbo mode, for open queues and for
    /// queues opened later.
    pub fn set_durability(&self, durability: Durability) -> QueueResult<()> {
        // Holding the registry lock keeps queues from opening mid-switch.
        let queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .durability = durability;
        for queue in queues.values() {
            queue.set_durability(durability)?;
        }
        info!(?durability, queues = queues.len(), "write buffer durability changed");
        Ok(())
    }

    /// Flush and release every queue.
    ///
    /// Queues still referenced elsewhere are synced instead and released
    /// when their last holder drops them.
    pub fn close_all(&self) -> QueueResult<()> {
        let drained: Vec<(String, Arc<DurableQueue>)> = {
            let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
            queues.drain().collect()
        };
        let mut first_err = None;
        for (name, queue) in drained {
            let result = match Arc::try_unwrap(queue) {
                Ok(queue) => queue.close(),
                Err(shared) => shared.sync(),
            };
            if let Err(e) = result {
                warn!(backend = %name, error = %e, "failed to close write buffer");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
