//! In-process store, for tests and standalone runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::KvStore;
use crate::error::{ConfigError, ConfigResult};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Entry {
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
}

/// A [`KvStore`] kept entirely in memory.
///
/// Mirrors the semantics of the Redis commands it stands in for,
/// including type errors when a hash key is used as a list or vice versa.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        // Every mutation is a single map operation, so a poisoned map is
        // still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KvStore for MemoryKv {
    fn hgetall(&self, key: &str) -> ConfigResult<HashMap<String, String>> {
        match self.entries().get(key) {
            Some(Entry::Hash(fields)) => Ok(fields.clone().into_iter().collect()),
            Some(Entry::List(_)) => Err(ConfigError::Store(WRONG_TYPE.to_string())),
            None => Ok(HashMap::new()),
        }
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> ConfigResult<()> {
        let mut entries = self.entries();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(BTreeMap::new()));
        match entry {
            Entry::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Entry::List(_) => Err(ConfigError::Store(WRONG_TYPE.to_string())),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        Ok(self
            .entries()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn lrange_all(&self, key: &str) -> ConfigResult<Vec<String>> {
        match self.entries().get(key) {
            Some(Entry::List(items)) => Ok(items.clone()),
            Some(Entry::Hash(_)) => Err(ConfigError::Store(WRONG_TYPE.to_string())),
            None => Ok(Vec::new()),
        }
    }

    fn rpush(&self, key: &str, value: &str) -> ConfigResult<()> {
        let mut entries = self.entries();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(Vec::new()));
        match entry {
            Entry::List(items) => {
                items.push(value.to_string());
                Ok(())
            }
            Entry::Hash(_) => Err(ConfigError::Store(WRONG_TYPE.to_string())),
        }
    }

    fn del(&self, key: &str) -> ConfigResult<bool> {
        Ok(self.entries().remove(key).is_some())
    }
}
