//! Routing topology: which backends receive which measurement.
//!
//! A [`Topology`] is never mutated after construction. Reloads build a
//! new one and swap it into the [`TopologyHandle`], so every reader sees
//! either the old snapshot or the new one as a whole.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use fluxgate_config::{BackendConfig, MeasurementMap, NodeConfig};

/// One consistent view of node, backend and measurement settings.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub node: NodeConfig,
    pub backends: HashMap<String, BackendConfig>,
    pub measurements: MeasurementMap,
}

impl Topology {
    pub fn new(
        node: NodeConfig,
        backends: HashMap<String, BackendConfig>,
        measurements: MeasurementMap,
    ) -> Self {
        Self {
            node,
            backends,
            measurements,
        }
    }

    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.get(name)
    }

    /// Backends listed for a measurement, in list order.
    ///
    /// Names without a backend record are skipped.
    pub fn route(&self, measurement: &str) -> Vec<(&str, &BackendConfig)> {
        let Some(names) = self.measurements.get(measurement) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|name| match self.backends.get_key_value(name) {
                Some((name, cfg)) => Some((name.as_str(), cfg)),
                None => {
                    debug!(measurement, backend = %name, "measurement lists unknown backend");
                    None
                }
            })
            .collect()
    }

    /// Backend names in sorted order.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Shared, atomically replaceable [`Topology`].
#[derive(Debug, Default)]
pub struct TopologyHandle {
    current: RwLock<Arc<Topology>>,
}

impl TopologyHandle {
    pub fn new(topology: Topology) -> Self {
        Self {
            current: RwLock::new(Arc::new(topology)),
        }
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Arc<Topology> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in a new snapshot, returning the previous one.
    pub fn replace(&self, topology: Topology) -> Arc<Topology> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(topology))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(db: &str) -> BackendConfig {
        BackendConfig {
            url: format!("http://{db}:8086"),
            db: db.to_string(),
            ..Default::default()
        }
    }

    fn sample() -> Topology {
        let backends = HashMap::from([
            ("b1".to_string(), backend("one")),
            ("b2".to_string(), backend("two")),
        ]);
        let measurements = HashMap::from([
            (
                "cpu".to_string(),
                vec!["b2".to_string(), "ghost".to_string(), "b1".to_string()],
            ),
            ("mem".to_string(), vec![]),
        ]);
        Topology::new(NodeConfig::default(), backends, measurements)
    }

    #[test]
    fn route_keeps_list_order_and_skips_unknown() {
        let topo = sample();
        let routed: Vec<&str> = topo.route("cpu").into_iter().map(|(name, _)| name).collect();
        assert_eq!(routed, vec!["b2", "b1"]);
    }

    #[test]
    fn route_unknown_measurement_is_empty() {
        let topo = sample();
        assert!(topo.route("disk").is_empty());
        assert!(topo.route("mem").is_empty());
    }

    #[test]
    fn replace_is_visible_to_new_readers_only() {
        let handle = TopologyHandle::new(sample());
        let before = handle.current();

        let previous = handle.replace(Topology::default());
        assert!(Arc::ptr_eq(&before, &previous));

        // A reader holding the old snapshot still sees all of it.
        assert_eq!(before.backends.len(), 2);
        assert!(handle.current().backends.is_empty());
    }

    #[test]
    fn backend_names_are_sorted() {
        assert_eq!(sample().backend_names(), vec!["b1", "b2"]);
    }
}
