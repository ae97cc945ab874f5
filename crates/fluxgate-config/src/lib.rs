//! fluxgate-config — cluster topology held in a shared key/value store.
//!
//! Node settings, backend settings and measurement routing lists live in
//! a flat key/value + list store (Redis in production, [`MemoryKv`] for
//! tests and standalone runs). [`ConfigStore`] maps them to typed records.
//!
//! # Architecture
//!
//! Records are stored as string hashes whose field names are the
//! lower-cased record field names. Each record type declares a static
//! field table ([`codec::Record::FIELDS`]); a single generic routine in
//! [`codec`] decodes any hash into any record. Keys are namespaced by a
//! [`KeySpace`] injected at construction, so several isolated stores can
//! share one server.
//!
//! The `ConfigStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<dyn KvStore>`) and can be shared across tasks. Calls are blocking.

pub mod codec;
pub mod error;
pub mod keys;
pub mod kv;
pub mod store;
pub mod types;

pub use codec::{DecodeError, Record};
pub use error::{ConfigError, ConfigResult};
pub use keys::KeySpace;
pub use kv::{KvStore, MemoryKv, RedisKv, RedisOptions};
pub use store::ConfigStore;
pub use types::*;
