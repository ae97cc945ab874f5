//! fluxgate-proxy — the runtime side of the proxy.
//!
//! # Components
//!
//! - **`topology`** — immutable routing snapshot behind an atomically
//!   swappable handle
//! - **`sync`** — reloads the snapshot from the configuration store
//! - **`buffer`** — one durable write queue per backend
//! - **`drain`** — background delivery of buffered writes with backoff
//! - **`delivery`** — HTTP `/write` client for a backend
//! - **`forward`** — splits live writes by measurement and hands them to
//!   backends, buffering what cannot be delivered
//!
//! ```text
//! ConfigStore ──reload──▶ ProxySync ──▶ TopologyHandle (Arc<Topology>)
//!                              │
//!                              └──▶ QueueSet ──▶ DrainPool ──▶ HttpDelivery
//! ```

pub mod buffer;
pub mod delivery;
pub mod drain;
pub mod forward;
pub mod sync;
pub mod topology;

pub use buffer::QueueSet;
pub use delivery::{DeliveryError, HttpDelivery};
pub use drain::{Backoff, Deliver, DrainOutcome, DrainPool, drain_once, run_drain_loop};
pub use forward::{ForwardReport, forward_write};
pub use sync::{ProxySync, SyncStats};
pub use topology::{Topology, TopologyHandle};
