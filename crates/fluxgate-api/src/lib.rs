//! fluxgate-api — HTTP API: administration and write forwarding.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/ping` | Liveness, 204 |
//! | POST | `/write` | Route line-protocol writes to backends, 204 |
//! | GET | `/config/backends` | All backend records |
//! | POST | `/config/backends` | Upsert backend records |
//! | DELETE | `/config/backends/{key}` | Remove one backend record |
//! | GET | `/config/measurements` | All measurement routing lists |
//! | POST | `/config/measurements` | Append to measurement lists |
//! | DELETE | `/config/measurements/{key}` | Remove one measurement list |
//! | POST | `/reload` | Reload the topology from the store |
//! | GET | `/queues` | Pending buffered writes per backend |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use fluxgate_config::ConfigStore;
use fluxgate_proxy::ProxySync;

/// Protocol version reported in `X-Influxdb-Version`.
pub const VERSION: &str = "1.1";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AdminState {
    pub store: ConfigStore,
    pub sync: Arc<ProxySync>,
}

/// Build the admin router.
pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/write", post(handlers::write))
        .route("/reload", post(handlers::reload))
        .route(
            "/config/backends",
            get(handlers::list_backends).post(handlers::update_backends),
        )
        .route("/config/backends/{key}", delete(handlers::delete_backend))
        .route(
            "/config/measurements",
            get(handlers::list_measurements).post(handlers::update_measurements),
        )
        .route("/config/measurements/{key}", delete(handlers::delete_measurement))
        .route("/queues", get(handlers::queue_sizes))
        .with_state(state)
}
