//! Key namespace for configuration records.
//!
//! | Key | Holds |
//! |---|---|
//! | `{prefix}:node:default_node` | hash, node defaults |
//! | `{prefix}:node:{node}` | hash, node overrides |
//! | `{prefix}:backend:{name}` | hash, backend settings |
//! | `{prefix}:measurement:{name}` | list, ordered backend names |

/// Prefix used by existing deployments.
pub const DEFAULT_PREFIX: &str = "influx-proxy";

const DEFAULT_NODE: &str = "default_node";

/// Builds and parses namespaced store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_node(&self) -> String {
        self.node(DEFAULT_NODE)
    }

    pub fn node(&self, node: &str) -> String {
        format!("{}:node:{node}", self.prefix)
    }

    pub fn backend_prefix(&self) -> String {
        format!("{}:backend:", self.prefix)
    }

    pub fn backend(&self, name: &str) -> String {
        format!("{}{name}", self.backend_prefix())
    }

    pub fn measurement_prefix(&self) -> String {
        format!("{}:measurement:", self.prefix)
    }

    pub fn measurement(&self, name: &str) -> String {
        format!("{}{name}", self.measurement_prefix())
    }

    /// Backend name from a full backend key.
    pub fn backend_name<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.backend_prefix())
    }

    /// Measurement name from a full measurement key.
    pub fn measurement_name<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.measurement_prefix())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
