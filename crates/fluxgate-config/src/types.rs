//! Configuration record types.
//!
//! Field tables name the store keys (lower-cased field names). The JSON
//! names used by the admin API mostly match them; the one exception is
//! `timeout_query`, which is `querytimeout` in JSON and `timeoutquery`
//! in the store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::{Field, Record, record_fields};

/// Measurement name → ordered backend names.
pub type MeasurementMap = HashMap<String, Vec<String>>;

// ── Node ──────────────────────────────────────────────────────────

/// Runtime settings of this proxy instance.
///
/// Resolved by layering the node-specific record over the default one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    #[serde(rename = "listenaddr")]
    pub listen_addr: String,
    pub db: String,
    pub zone: String,
    #[serde(skip)]
    pub nexts: String,
    /// Poll interval (ms).
    pub interval: i64,
    /// HTTP timeouts (s).
    #[serde(rename = "idletimeout")]
    pub idle_timeout: i64,
    #[serde(rename = "writetimeout")]
    pub write_timeout: i64,
    #[serde(rename = "readtimeout")]
    pub read_timeout: i64,
    /// 0/1 flags.
    #[serde(rename = "writetracing")]
    pub write_tracing: i64,
    #[serde(rename = "querytracing")]
    pub query_tracing: i64,
}

impl Record for NodeConfig {
    const FIELDS: &'static [Field<Self>] = record_fields![
        text "listenaddr" => listen_addr,
        text "db" => db,
        text "zone" => zone,
        text "nexts" => nexts,
        int "interval" => interval,
        int "idletimeout" => idle_timeout,
        int "writetimeout" => write_timeout,
        int "readtimeout" => read_timeout,
        int "writetracing" => write_tracing,
        int "querytracing" => query_tracing,
    ];
}

// ── Backend ───────────────────────────────────────────────────────

pub const DEFAULT_INTERVAL_MS: i64 = 1_000;
pub const DEFAULT_TIMEOUT_MS: i64 = 10_000;
pub const DEFAULT_TIMEOUT_QUERY_MS: i64 = 600_000;
pub const DEFAULT_MAX_ROW_LIMIT: i64 = 10_000;
pub const DEFAULT_CHECK_INTERVAL_MS: i64 = 1_000;
pub const DEFAULT_REWRITE_INTERVAL_MS: i64 = 10_000;

/// Connection and tuning parameters of one downstream storage node.
///
/// All durations are milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub db: String,
    pub zone: String,
    pub interval: i64,
    pub timeout: i64,
    #[serde(rename = "querytimeout")]
    pub timeout_query: i64,
    #[serde(rename = "maxrowlimit")]
    pub max_row_limit: i64,
    #[serde(rename = "checkinterval")]
    pub check_interval: i64,
    #[serde(rename = "rewriteinterval")]
    pub rewrite_interval: i64,
    #[serde(rename = "writeonly")]
    pub write_only: i64,
}

impl Record for BackendConfig {
    const FIELDS: &'static [Field<Self>] = record_fields![
        text "url" => url,
        text "db" => db,
        text "zone" => zone,
        int "interval" => interval,
        int "timeout" => timeout,
        int "timeoutquery" => timeout_query,
        int "maxrowlimit" => max_row_limit,
        int "checkinterval" => check_interval,
        int "rewriteinterval" => rewrite_interval,
        int "writeonly" => write_only,
    ];
}

impl BackendConfig {
    /// Replace zero-valued tuning fields with their defaults.
    ///
    /// An explicit zero in the store is indistinguishable from an absent
    /// field and gets the default too.
    pub fn apply_defaults(&mut self) {
        fill_zero(&mut self.interval, DEFAULT_INTERVAL_MS);
        fill_zero(&mut self.timeout, DEFAULT_TIMEOUT_MS);
        fill_zero(&mut self.timeout_query, DEFAULT_TIMEOUT_QUERY_MS);
        fill_zero(&mut self.max_row_limit, DEFAULT_MAX_ROW_LIMIT);
        fill_zero(&mut self.check_interval, DEFAULT_CHECK_INTERVAL_MS);
        fill_zero(&mut self.rewrite_interval, DEFAULT_REWRITE_INTERVAL_MS);
    }

    pub fn is_write_only(&self) -> bool {
        self.write_only != 0
    }
}

fn fill_zero(value: &mut i64, default: i64) {
    if *value == 0 {
        *value = default;
    }
}
