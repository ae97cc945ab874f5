//! Error types for the configuration store.

use thiserror::Error;

use crate::codec::DecodeError;

/// Result type alias for configuration store operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while reading or writing configuration records.
///
/// None of these are retried internally; the caller decides whether a
/// failure blocks a reload or is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The shared store could not be reached.
    #[error("config store unreachable: {0}")]
    Connectivity(String),

    /// The store answered but rejected the command.
    #[error("config store error: {0}")]
    Store(String),

    /// A stored record holds a value that does not fit its field.
    #[error("malformed record {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: DecodeError,
    },
}

impl ConfigError {
    /// True when the store itself was unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ConfigError::Connectivity(_))
    }

    /// True when a record failed to decode.
    pub fn is_decode(&self) -> bool {
        matches!(self, ConfigError::Decode { .. })
    }
}
