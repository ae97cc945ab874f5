//! fluxgate-queue — durable write queue for undeliverable payloads.
//!
//! One [`DurableQueue`] per backend buffers opaque write payloads on local
//! disk until the drain loop manages to deliver them.
//!
//! # On-disk layout
//!
//! ```text
//! {base}/{name}/0000000000001.seg
//! {base}/{name}/0000000000002.seg
//! ```
//!
//! Each segment holds up to `segment_capacity` payload records. A record
//! is a little-endian `u32` length followed by the payload; a length of
//! `u32::MAX` marks the removal of the segment's oldest live item.
//! Segments rotate when full and are deleted once fully consumed.
//!
//! # Durability
//!
//! [`Durability::Synced`] fsyncs every enqueue and removal before
//! returning. [`Durability::Turbo`] batches fsyncs; a crash can lose the
//! most recent unflushed enqueues and replay recently dequeued items,
//! never anything older.

pub mod error;
pub mod queue;
mod segment;

pub use error::{FatalQueueError, QueueError, QueueResult};
pub use queue::{DEFAULT_SEGMENT_CAPACITY, DEFAULT_TURBO_FLUSH_EVERY, Durability, DurableQueue, QueueOptions};
