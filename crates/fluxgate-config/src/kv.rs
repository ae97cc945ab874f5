//! Key/value + list store abstraction.
//!
//! The configuration store only needs a handful of hash and list
//! commands. [`RedisKv`] talks to a real server; [`MemoryKv`] keeps
//! everything in process. Implementations serialize access internally
//! so a single instance can be shared across threads.

mod memory;
mod remote;

use std::collections::HashMap;

use crate::error::ConfigResult;

pub use memory::MemoryKv;
pub use remote::{RedisKv, RedisOptions};

/// Blocking request/response access to a shared key/value + list store.
pub trait KvStore: Send + Sync {
    /// All fields of a hash. A missing key yields an empty map.
    fn hgetall(&self, key: &str) -> ConfigResult<HashMap<String, String>>;

    /// Set one field of a hash, creating the hash if needed.
    fn hset(&self, key: &str, field: &str, value: &str) -> ConfigResult<()>;

    /// Every key starting with `prefix`, in no particular order.
    fn keys_with_prefix(&self, prefix: &str) -> ConfigResult<Vec<String>>;

    /// The whole list stored at `key`. A missing key yields an empty list.
    fn lrange_all(&self, key: &str) -> ConfigResult<Vec<String>>;

    /// Append to the list at `key`, creating it if needed.
    fn rpush(&self, key: &str, value: &str) -> ConfigResult<()>;

    /// Remove `key`. Returns whether it existed.
    fn del(&self, key: &str) -> ConfigResult<bool>;
}
