//! Error types for the durable queue.

use thiserror::Error;

/// Result type alias for queue operations that callers may recover from.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {name}: i/o failure: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("queue {name}: corrupted segment: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("queue name {name:?} is not a plain directory name")]
    InvalidName { name: String },

    #[error("payload of {len} bytes exceeds the record size limit")]
    TooLarge { len: usize },

    #[error("queue {name}: lock poisoned by a panicking caller")]
    Poisoned { name: String },
}

impl QueueError {
    pub(crate) fn io(name: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::InvalidData {
            QueueError::Corrupt {
                name: name.to_string(),
                reason: source.to_string(),
            }
        } else {
            QueueError::Io {
                name: name.to_string(),
                source,
            }
        }
    }
}

/// A dequeue-side failure after which the queue must not be used again.
///
/// The in-memory view and the segment files may disagree once this is
/// returned. The queue never terminates the process itself; whoever owns
/// the process is expected to stop it.
#[derive(Debug, Error)]
#[error("queue {name} is unusable, on-disk state may be inconsistent: {source}")]
pub struct FatalQueueError {
    pub name: String,
    #[source]
    pub source: QueueError,
}

impl FatalQueueError {
    pub(crate) fn new(name: &str, source: QueueError) -> Self {
        Self {
            name: name.to_string(),
            source,
        }
    }
}
