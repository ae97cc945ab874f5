//! ConfigStore — typed access to node, backend and measurement records.
//!
//! Reads decode store hashes through the record codec; writes are
//! field-level upserts and list appends. Nothing is retried: a failed
//! call surfaces to the caller, which keeps its previous topology or
//! gives up at startup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::{decode_into, encode};
use crate::error::{ConfigError, ConfigResult};
use crate::keys::KeySpace;
use crate::kv::KvStore;
use crate::types::{BackendConfig, MeasurementMap, NodeConfig};

/// Typed configuration access over a shared [`KvStore`].
#[derive(Clone)]
pub struct ConfigStore {
    kv: Arc<dyn KvStore>,
    keys: KeySpace,
    node: String,
}

impl ConfigStore {
    /// Create a store for node `node` under the given key namespace.
    pub fn new(kv: Arc<dyn KvStore>, keys: KeySpace, node: impl Into<String>) -> Self {
        Self {
            kv,
            keys,
            node: node.into(),
        }
    }

    /// Name of the node this store resolves settings for.
    pub fn node_name(&self) -> &str {
        &self.node
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    // ── Node ───────────────────────────────────────────────────────

    /// Resolve this node's settings: defaults first, then overrides.
    ///
    /// Only fields present in the node-specific record replace defaults;
    /// fields absent from both stay zero.
    pub fn load_node(&self) -> ConfigResult<NodeConfig> {
        let mut node = NodeConfig::default();
        for key in [self.keys.default_node(), self.keys.node(&self.node)] {
            let fields = self.kv.hgetall(&key)?;
            decode_into(&fields, &mut node).map_err(|source| ConfigError::Decode { key, source })?;
        }
        info!(node = %self.node, "node config loaded");
        Ok(node)
    }

    // ── Backends ───────────────────────────────────────────────────

    /// Load every backend record, with defaults applied.
    ///
    /// One malformed record fails the whole call.
    pub fn load_backends(&self) -> ConfigResult<HashMap<String, BackendConfig>> {
        let prefix = self.keys.backend_prefix();
        let mut backends = HashMap::new();
        for key in self.kv.keys_with_prefix(&prefix)? {
            let Some(name) = self.keys.backend_name(&key) else {
                continue;
            };
            let cfg = self.decode_backend(&key)?;
            backends.insert(name.to_string(), cfg);
        }
        info!(count = backends.len(), "backends loaded");
        Ok(backends)
    }

    /// Load a single backend record, with defaults applied.
    ///
    /// A backend with no record decodes to defaults only.
    pub fn load_backend(&self, name: &str) -> ConfigResult<BackendConfig> {
        self.decode_backend(&self.keys.backend(name))
    }

    fn decode_backend(&self, key: &str) -> ConfigResult<BackendConfig> {
        let fields = self.kv.hgetall(key)?;
        let mut cfg = BackendConfig::default();
        decode_into(&fields, &mut cfg).map_err(|source| ConfigError::Decode {
            key: key.to_string(),
            source,
        })?;
        cfg.apply_defaults();
        Ok(cfg)
    }

    /// Upsert every field of each given backend.
    ///
    /// Fields already in the store but not part of the record are left
    /// alone. Stops at the first store error.
    pub fn update_backends(&self, backends: &HashMap<String, BackendConfig>) -> ConfigResult<()> {
        for (name, cfg) in backends {
            let key = self.keys.backend(name);
            for (field, value) in encode(cfg) {
                self.kv.hset(&key, field, &value)?;
            }
            debug!(%key, "backend updated");
        }
        info!(count = backends.len(), "backends written");
        Ok(())
    }

    /// Remove a backend record. Removing a missing one is not an error.
    pub fn delete_backend(&self, name: &str) -> ConfigResult<()> {
        let key = self.keys.backend(name);
        let existed = self.kv.del(&key)?;
        info!(%key, existed, "backend deleted");
        Ok(())
    }

    // ── Measurements ───────────────────────────────────────────────

    /// Load every measurement's ordered backend list.
    pub fn load_measurements(&self) -> ConfigResult<MeasurementMap> {
        let prefix = self.keys.measurement_prefix();
        let mut measurements = HashMap::new();
        for key in self.kv.keys_with_prefix(&prefix)? {
            let Some(name) = self.keys.measurement_name(&key) else {
                continue;
            };
            let backends = self.kv.lrange_all(&key)?;
            measurements.insert(name.to_string(), backends);
        }
        info!(count = measurements.len(), "measurements loaded");
        Ok(measurements)
    }

    /// Append backend names to each measurement's list, in caller order.
    ///
    /// Existing entries are kept; this never replaces a list.
    pub fn update_measurements(&self, measurements: &MeasurementMap) -> ConfigResult<()> {
        for (name, backends) in measurements {
            let key = self.keys.measurement(name);
            for backend in backends {
                self.kv.rpush(&key, backend)?;
            }
            debug!(%key, appended = backends.len(), "measurement updated");
        }
        info!(count = measurements.len(), "measurements written");
        Ok(())
    }

    /// Remove a measurement's list. Removing a missing one is not an error.
    pub fn delete_measurement(&self, name: &str) -> ConfigResult<()> {
        let key = self.keys.measurement(name);
        let existed = self.kv.del(&key)?;
        info!(%key, existed, "measurement deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::types::*;

    fn test_store() -> (Arc<MemoryKv>, ConfigStore) {
        let kv = Arc::new(MemoryKv::new());
        let store = ConfigStore::new(kv.clone(), KeySpace::new("test"), "l1");
        (kv, store)
    }

    /// A store that is never reachable.
    struct Offline;

    impl KvStore for Offline {
        fn hgetall(&self, _: &str) -> ConfigResult<HashMap<String, String>> {
            Err(ConfigError::Connectivity("offline".into()))
        }
        fn hset(&self, _: &str, _: &str, _: &str) -> ConfigResult<()> {
            Err(ConfigError::Connectivity("offline".into()))
        }
        fn keys_with_prefix(&self, _: &str) -> ConfigResult<Vec<String>> {
            Err(ConfigError::Connectivity("offline".into()))
        }
        fn lrange_all(&self, _: &str) -> ConfigResult<Vec<String>> {
            Err(ConfigError::Connectivity("offline".into()))
        }
        fn rpush(&self, _: &str, _: &str) -> ConfigResult<()> {
            Err(ConfigError::Connectivity("offline".into()))
        }
        fn del(&self, _: &str) -> ConfigResult<bool> {
            Err(ConfigError::Connectivity("offline".into()))
        }
    }

    // ── Node ───────────────────────────────────────────────────────

    #[test]
    fn node_overrides_layer_on_defaults() {
        let (kv, store) = test_store();
        kv.hset("test:node:default_node", "listenaddr", ":6666").unwrap();
        kv.hset("test:node:default_node", "db", "default-db").unwrap();
        kv.hset("test:node:default_node", "writetimeout", "10").unwrap();
        kv.hset("test:node:l1", "db", "node-db").unwrap();
        kv.hset("test:node:l1", "zone", "sh").unwrap();
        // Another node's record must not leak in.
        kv.hset("test:node:l2", "readtimeout", "99").unwrap();

        let node = store.load_node().unwrap();
        assert_eq!(node.listen_addr, ":6666"); // default only
        assert_eq!(node.db, "node-db"); // override wins
        assert_eq!(node.zone, "sh"); // override only
        assert_eq!(node.write_timeout, 10);
        assert_eq!(node.read_timeout, 0); // neither
    }

    #[test]
    fn node_with_no_records_is_zero() {
        let (_, store) = test_store();
        assert_eq!(store.load_node().unwrap(), NodeConfig::default());
    }

    #[test]
    fn node_decode_error_names_key_and_field() {
        let (kv, store) = test_store();
        kv.hset("test:node:l1", "idletimeout", "soon").unwrap();

        match store.load_node().unwrap_err() {
            ConfigError::Decode { key, source } => {
                assert_eq!(key, "test:node:l1");
                assert_eq!(source.field, "idletimeout");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn node_connectivity_error_surfaces() {
        let store = ConfigStore::new(Arc::new(Offline), KeySpace::default(), "l1");
        assert!(store.load_node().unwrap_err().is_connectivity());
    }

    // ── Backends ───────────────────────────────────────────────────

    #[test]
    fn backends_get_defaults_per_record() {
        let (kv, store) = test_store();
        kv.hset("test:backend:a", "db", "x").unwrap();
        kv.hset("test:backend:b", "db", "y").unwrap();
        kv.hset("test:backend:b", "timeout", "500").unwrap();

        let backends = store.load_backends().unwrap();
        assert_eq!(backends.len(), 2);

        let a = &backends["a"];
        assert_eq!(a.db, "x");
        assert_eq!(a.interval, DEFAULT_INTERVAL_MS);
        assert_eq!(a.timeout, DEFAULT_TIMEOUT_MS);
        assert_eq!(a.timeout_query, DEFAULT_TIMEOUT_QUERY_MS);
        assert_eq!(a.max_row_limit, DEFAULT_MAX_ROW_LIMIT);
        assert_eq!(a.check_interval, DEFAULT_CHECK_INTERVAL_MS);
        assert_eq!(a.rewrite_interval, DEFAULT_REWRITE_INTERVAL_MS);

        let b = &backends["b"];
        assert_eq!(b.db, "y");
        assert_eq!(b.timeout, 500);
        assert_eq!(b.interval, DEFAULT_INTERVAL_MS);
    }

    #[test]
    fn non_zero_backend_values_are_preserved() {
        let (kv, store) = test_store();
        for (field, value) in [
            ("interval", "1"),
            ("timeout", "2"),
            ("timeoutquery", "3"),
            ("maxrowlimit", "4"),
            ("checkinterval", "5"),
            ("rewriteinterval", "6"),
        ] {
            kv.hset("test:backend:tuned", field, value).unwrap();
        }

        let cfg = store.load_backend("tuned").unwrap();
        assert_eq!(
            (cfg.interval, cfg.timeout, cfg.timeout_query, cfg.max_row_limit, cfg.check_interval, cfg.rewrite_interval),
            (1, 2, 3, 4, 5, 6)
        );
    }

    #[test]
    fn one_malformed_backend_fails_the_load() {
        let (kv, store) = test_store();
        kv.hset("test:backend:good", "db", "x").unwrap();
        kv.hset("test:backend:bad", "maxrowlimit", "unlimited").unwrap();

        let err = store.load_backends().unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().contains("test:backend:bad"));
    }

    #[test]
    fn backend_update_round_trips_through_store() {
        let (_, store) = test_store();
        let cfg = BackendConfig {
            url: "http://10.0.0.1:8086".to_string(),
            db: "metrics".to_string(),
            zone: "bj".to_string(),
            interval: 2000,
            timeout: 3000,
            timeout_query: 4000,
            max_row_limit: 5000,
            check_interval: 6000,
            rewrite_interval: 7000,
            write_only: 1,
        };
        store
            .update_backends(&HashMap::from([("local".to_string(), cfg.clone())]))
            .unwrap();

        assert_eq!(store.load_backend("local").unwrap(), cfg);
    }

    #[test]
    fn backend_update_is_field_level_upsert() {
        let (kv, store) = test_store();
        kv.hset("test:backend:a", "legacy", "keep-me").unwrap();

        store
            .update_backends(&HashMap::from([("a".to_string(), BackendConfig::default())]))
            .unwrap();

        let fields = kv.hgetall("test:backend:a").unwrap();
        assert_eq!(fields["legacy"], "keep-me");
        assert_eq!(fields["timeoutquery"], "0");
        assert_eq!(fields.len(), 11);
    }

    #[test]
    fn delete_backend_removes_it_from_load() {
        let (kv, store) = test_store();
        kv.hset("test:backend:a", "db", "x").unwrap();
        kv.hset("test:backend:b", "db", "y").unwrap();

        store.delete_backend("a").unwrap();
        let backends = store.load_backends().unwrap();
        assert!(!backends.contains_key("a"));
        assert!(backends.contains_key("b"));

        // Deleting again is fine.
        store.delete_backend("a").unwrap();
    }

    // ── Measurements ───────────────────────────────────────────────

    #[test]
    fn measurements_load_ordered_lists() {
        let (kv, store) = test_store();
        kv.rpush("test:measurement:cpu", "b2").unwrap();
        kv.rpush("test:measurement:cpu", "b1").unwrap();
        kv.rpush("test:measurement:mem", "b1").unwrap();

        let measurements = store.load_measurements().unwrap();
        assert_eq!(measurements.len(), 2);
        assert_eq!(measurements["cpu"], vec!["b2", "b1"]);
        assert_eq!(measurements["mem"], vec!["b1"]);
    }

    #[test]
    fn measurement_update_appends_literal_names() {
        let (_, store) = test_store();
        store
            .update_measurements(&HashMap::from([(
                "cpu1".to_string(),
                vec!["local".to_string(), "local2".to_string()],
            )]))
            .unwrap();
        store
            .update_measurements(&HashMap::from([("cpu1".to_string(), vec!["local3".to_string()])]))
            .unwrap();

        let measurements = store.load_measurements().unwrap();
        assert_eq!(measurements["cpu1"], vec!["local", "local2", "local3"]);
    }

    #[test]
    fn delete_measurement_removes_key() {
        let (_, store) = test_store();
        store
            .update_measurements(&HashMap::from([("cpu".to_string(), vec!["a".to_string()])]))
            .unwrap();
        store.delete_measurement("cpu").unwrap();
        store.delete_measurement("never-existed").unwrap();
        assert!(store.load_measurements().unwrap().is_empty());
    }

    #[test]
    fn namespaces_are_isolated() {
        let kv = Arc::new(MemoryKv::new());
        let blue = ConfigStore::new(kv.clone(), KeySpace::new("blue"), "l1");
        let green = ConfigStore::new(kv, KeySpace::new("green"), "l1");

        blue.update_backends(&HashMap::from([("a".to_string(), BackendConfig::default())]))
            .unwrap();
        assert_eq!(blue.load_backends().unwrap().len(), 1);
        assert!(green.load_backends().unwrap().is_empty());
    }

    #[test]
    fn store_errors_propagate_from_updates() {
        let (kv, store) = test_store();
        // A list where a hash is expected.
        kv.rpush("test:backend:a", "oops").unwrap();
        let err = store
            .update_backends(&HashMap::from([("a".to_string(), BackendConfig::default())]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Store(_)));

        let offline = ConfigStore::new(Arc::new(Offline), KeySpace::default(), "l1");
        assert!(offline.load_measurements().unwrap_err().is_connectivity());
        assert!(offline.delete_backend("a").unwrap_err().is_connectivity());
    }
}
