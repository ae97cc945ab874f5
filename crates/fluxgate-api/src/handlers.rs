//! Admin API handlers.
//!
//! Configuration store calls block, so every one runs on the blocking
//! pool. Error bodies are plain text, except malformed JSON which gets a
//! small JSON document.

use std::collections::HashMap;
use std::io::Read;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use fluxgate_config::{BackendConfig, ConfigError, ConfigResult, MeasurementMap};
use fluxgate_proxy::{HttpDelivery, forward_write};

use crate::{AdminState, VERSION};

/// Largest accepted configuration request body.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// Largest accepted write body, after gzip decoding.
pub const MAX_WRITE_BYTES: usize = 32 << 20;

const VERSION_HEADER: HeaderName = HeaderName::from_static("x-influxdb-version");

fn version_header() -> [(HeaderName, HeaderValue); 1] {
    [(VERSION_HEADER, HeaderValue::from_static(VERSION))]
}

fn text(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, msg.into()).into_response()
}

/// Run a blocking store call off the async workers.
async fn blocking<T, F>(f: F) -> ConfigResult<T>
where
    F: FnOnce() -> ConfigResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(ConfigError::Store(format!("store task failed: {e}"))),
    }
}

/// Read a bounded body and parse it as JSON.
///
/// Oversized bodies are a 400; unparsable ones a 422.
async fn read_json<T: DeserializeOwned>(body: Body, what: &str) -> Result<T, Response> {
    let bytes: Bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| text(StatusCode::BAD_REQUEST, format!("post {what} too large.")))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        warn!(error = %e, "rejected malformed {what} payload");
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response()
    })
}

// ── Liveness ───────────────────────────────────────────────────

/// GET /ping
pub async fn ping() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, version_header())
}

/// POST /reload
pub async fn reload(State(state): State<AdminState>) -> Response {
    let AdminState { store, sync } = state;
    match blocking(move || sync.reload(&store)).await {
        Ok(stats) => {
            info!(backends = stats.backends, measurements = stats.measurements, "reload requested");
            (StatusCode::NO_CONTENT, version_header()).into_response()
        }
        Err(e) => {
            warn!(error = %e, "reload failed, keeping previous topology");
            (StatusCode::BAD_REQUEST, version_header(), e.to_string()).into_response()
        }
    }
}

// ── Writes ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct WriteParams {
    #[serde(default)]
    pub db: String,
}

fn gunzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(raw)
        .take(MAX_WRITE_BYTES as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > MAX_WRITE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "decoded write body too large",
        ));
    }
    Ok(out)
}

/// POST /write
///
/// Lines are routed by measurement. Backends that do not acknowledge in
/// time get their lines buffered, so a 204 means every routed line was
/// delivered or is durably queued.
pub async fn write(
    State(state): State<AdminState>,
    Query(params): Query<WriteParams>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let topology = state.sync.topology().current();
    let node_db = &topology.node.db;
    if !node_db.is_empty() && params.db != *node_db {
        return (StatusCode::NOT_FOUND, version_header(), "database not exist.").into_response();
    }

    let raw = match axum::body::to_bytes(body, MAX_WRITE_BYTES).await {
        Ok(raw) => raw,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, version_header(), "write body too large.").into_response();
        }
    };
    let gzipped = headers
        .get(header::CONTENT_ENCODING)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"));
    let lines = if gzipped {
        match gunzip(&raw) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(error = %e, "rejected gzip write body");
                return (StatusCode::BAD_REQUEST, version_header(), "unable to decode gzip body")
                    .into_response();
            }
        }
    } else {
        raw.to_vec()
    };

    if topology.node.write_tracing != 0 {
        info!(db = %params.db, body = %String::from_utf8_lossy(&lines), "write received");
    }

    match forward_write(&topology, state.sync.queues(), &HttpDelivery::new(), &lines).await {
        Ok(report) => {
            debug!(
                delivered = report.delivered.len(),
                buffered = report.buffered.len(),
                unrouted = report.unrouted,
                "write forwarded"
            );
            (StatusCode::NO_CONTENT, version_header()).into_response()
        }
        Err(e) => {
            error!(error = %e, "write could not be delivered or buffered");
            (StatusCode::INTERNAL_SERVER_ERROR, version_header(), e.to_string()).into_response()
        }
    }
}

// ── Backends ───────────────────────────────────────────────────

/// GET /config/backends
pub async fn list_backends(State(state): State<AdminState>) -> Response {
    match blocking(move || state.store.load_backends()).await {
        Ok(backends) => Json(backends).into_response(),
        Err(e) => text(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// POST /config/backends
pub async fn update_backends(State(state): State<AdminState>, body: Body) -> Response {
    let backends: HashMap<String, BackendConfig> = match read_json(body, "backend").await {
        Ok(backends) => backends,
        Err(resp) => return resp,
    };
    match blocking(move || state.store.update_backends(&backends)).await {
        Ok(()) => text(StatusCode::OK, "update success"),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// DELETE /config/backends/{key}
pub async fn delete_backend(State(state): State<AdminState>, Path(key): Path<String>) -> Response {
    match blocking(move || state.store.delete_backend(&key)).await {
        Ok(()) => text(StatusCode::OK, "delete success"),
        Err(e) => text(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

// ── Measurements ───────────────────────────────────────────────

/// GET /config/measurements
pub async fn list_measurements(State(state): State<AdminState>) -> Response {
    match blocking(move || state.store.load_measurements()).await {
        Ok(measurements) => Json(measurements).into_response(),
        Err(e) => text(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// POST /config/measurements
pub async fn update_measurements(State(state): State<AdminState>, body: Body) -> Response {
    let measurements: MeasurementMap = match read_json(body, "measurement").await {
        Ok(measurements) => measurements,
        Err(resp) => return resp,
    };
    match blocking(move || state.store.update_measurements(&measurements)).await {
        Ok(()) => text(StatusCode::OK, "update success"),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// DELETE /config/measurements/{key}
pub async fn delete_measurement(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Response {
    match blocking(move || state.store.delete_measurement(&key)).await {
        Ok(()) => text(StatusCode::OK, "delete success"),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Buffers ────────────────────────────────────────────────────

/// GET /queues
pub async fn queue_sizes(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.sync.queues().sizes())
}
