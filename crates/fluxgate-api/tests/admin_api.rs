//! HTTP API end-to-end tests against an in-memory configuration store.
//!
//! Routes are driven in-process with `tower::ServiceExt::oneshot`; write
//! buffers live in a temporary directory.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use fluxgate_api::{AdminState, VERSION, build_router};
use fluxgate_config::{BackendConfig, ConfigStore, KeySpace, KvStore, MemoryKv, MeasurementMap};
use fluxgate_proxy::{ProxySync, QueueSet, TopologyHandle};
use fluxgate_queue::QueueOptions;

struct Harness {
    _dir: tempfile::TempDir,
    kv: Arc<MemoryKv>,
    store: ConfigStore,
    sync: Arc<ProxySync>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(MemoryKv::new());
        let store = ConfigStore::new(kv.clone(), KeySpace::default(), "l1");
        let sync = Arc::new(ProxySync::new(
            Arc::new(TopologyHandle::default()),
            Arc::new(QueueSet::new(dir.path(), QueueOptions::default())),
        ));
        Self {
            _dir: dir,
            kv,
            store,
            sync,
        }
    }

    fn router(&self) -> Router {
        build_router(AdminState {
            store: self.store.clone(),
            sync: Arc::clone(&self.sync),
        })
    }

    async fn send(&self, method: Method, uri: &str, body: Body) -> (StatusCode, String) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = self.router().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn get(&self, uri: &str) -> (StatusCode, String) {
        self.send(Method::GET, uri, Body::empty()).await
    }

    async fn post(&self, uri: &str, body: &str) -> (StatusCode, String) {
        self.send(Method::POST, uri, Body::from(body.to_string())).await
    }

    async fn delete(&self, uri: &str) -> (StatusCode, String) {
        self.send(Method::DELETE, uri, Body::empty()).await
    }
}

// ── Liveness ─────────────────────────────────────────────────────

#[tokio::test]
async fn ping_reports_version() {
    let h = Harness::new();
    let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
    let resp = h.router().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.headers()["x-influxdb-version"], VERSION);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let h = Harness::new();
    let (status, _) = h.get("/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Backends ─────────────────────────────────────────────────────

#[tokio::test]
async fn empty_store_lists_no_backends() {
    let h = Harness::new();
    let (status, body) = h.get("/config/backends").await;
    assert_eq!(status, StatusCode::OK);
    let parsed: HashMap<String, BackendConfig> = serde_json::from_str(&body).unwrap();
    assert!(parsed.is_empty());
}

#[tokio::test]
async fn posted_backends_are_listed_with_defaults() {
    let h = Harness::new();
    let (status, body) = h
        .post(
            "/config/backends",
            r#"{"b1": {"url": "http://10.0.0.1:8086", "db": "metrics", "timeout": 2500}}"#,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "update success");

    let (status, body) = h.get("/config/backends").await;
    assert_eq!(status, StatusCode::OK);
    let parsed: HashMap<String, BackendConfig> = serde_json::from_str(&body).unwrap();
    let b1 = &parsed["b1"];
    assert_eq!(b1.url, "http://10.0.0.1:8086");
    assert_eq!(b1.db, "metrics");
    assert_eq!(b1.timeout, 2500);
    assert_eq!(b1.interval, fluxgate_config::DEFAULT_INTERVAL_MS);
}

#[tokio::test]
async fn malformed_backend_payload_leaves_store_untouched() {
    let h = Harness::new();
    let (status, body) = h.post("/config/backends", r#"{"b1": {"url": 42}}"#).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let err: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(err["error"].is_string());

    assert!(h.kv.keys_with_prefix("influx-proxy:backend:").unwrap().is_empty());
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let h = Harness::new();
    let big = format!("{{\"pad\": \"{}\"}}", "x".repeat(fluxgate_api::handlers::MAX_BODY_BYTES));
    let (status, body) = h.post("/config/measurements", &big).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "post measurement too large.");
}

#[tokio::test]
async fn delete_backend_removes_record() {
    let h = Harness::new();
    h.post("/config/backends", r#"{"b1": {"url": "http://a"}, "b2": {"url": "http://b"}}"#)
        .await;

    let (status, body) = h.delete("/config/backends/b1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "delete success");

    let (_, body) = h.get("/config/backends").await;
    let parsed: HashMap<String, BackendConfig> = serde_json::from_str(&body).unwrap();
    assert!(!parsed.contains_key("b1"));
    assert!(parsed.contains_key("b2"));

    // Deleting again is still a success.
    let (status, _) = h.delete("/config/backends/b1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn delete_without_key_is_404() {
    let h = Harness::new();
    let (status, _) = h.delete("/config/backends/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h.delete("/config/measurements/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Measurements ─────────────────────────────────────────────────

#[tokio::test]
async fn measurement_lists_append_in_order() {
    let h = Harness::new();
    let (status, _) = h.post("/config/measurements", r#"{"cpu": ["b1", "b2"]}"#).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.post("/config/measurements", r#"{"cpu": ["b3"]}"#).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h.get("/config/measurements").await;
    assert_eq!(status, StatusCode::OK);
    let parsed: MeasurementMap = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["cpu"], vec!["b1", "b2", "b3"]);

    let (status, _) = h.delete("/config/measurements/cpu").await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = h.get("/config/measurements").await;
    let parsed: MeasurementMap = serde_json::from_str(&body).unwrap();
    assert!(parsed.is_empty());
}

// ── Reload and buffers ───────────────────────────────────────────

#[tokio::test]
async fn reload_applies_posted_config() {
    let h = Harness::new();
    h.post(
        "/config/backends",
        r#"{"b1": {"url": "http://10.0.0.1:8086"}, "b2": {"url": "http://10.0.0.2:8086"}}"#,
    )
    .await;
    h.post("/config/measurements", r#"{"cpu": ["b1", "b2"]}"#).await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/reload")
        .body(Body::empty())
        .unwrap();
    let resp = h.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.headers()["x-influxdb-version"], VERSION);

    let topo = h.sync.topology().current();
    let routed: Vec<&str> = topo.route("cpu").into_iter().map(|(name, _)| name).collect();
    assert_eq!(routed, vec!["b1", "b2"]);

    let (status, body) = h.get("/queues").await;
    assert_eq!(status, StatusCode::OK);
    let sizes: BTreeMap<String, usize> = serde_json::from_str(&body).unwrap();
    assert_eq!(sizes, BTreeMap::from([("b1".to_string(), 0), ("b2".to_string(), 0)]));
}

#[tokio::test]
async fn failed_reload_keeps_topology() {
    let h = Harness::new();
    h.post("/config/backends", r#"{"b1": {"url": "http://a"}}"#).await;
    let (status, _) = h.post("/reload", "").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let before = h.sync.topology().current();

    h.kv.hset("influx-proxy:backend:b2", "interval", "often").unwrap();
    let (status, body) = h.post("/reload", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("interval"), "body: {body}");

    let after = h.sync.topology().current();
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn queue_sizes_track_buffered_writes() {
    let h = Harness::new();
    h.post("/config/backends", r#"{"b1": {"url": "http://a"}}"#).await;
    h.post("/reload", "").await;

    let queues = h.sync.queues();
    queues.buffer("b1", b"cpu value=1").unwrap();
    queues.buffer("b1", b"cpu value=2").unwrap();

    let (_, body) = h.get("/queues").await;
    let sizes: BTreeMap<String, usize> = serde_json::from_str(&body).unwrap();
    assert_eq!(sizes["b1"], 2);
}

// ── Writes ───────────────────────────────────────────────────────

/// Address nobody listens on.
async fn closed_backend_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}

impl Harness {
    /// One backend `b1` that refuses connections, receiving `cpu`.
    async fn with_unreachable_backend(node_db: &str) -> Self {
        let h = Harness::new();
        let url = closed_backend_url().await;
        h.kv.hset("influx-proxy:backend:b1", "url", &url).unwrap();
        h.kv.rpush("influx-proxy:measurement:cpu", "b1").unwrap();
        if !node_db.is_empty() {
            h.kv.hset("influx-proxy:node:default_node", "db", node_db).unwrap();
        }
        let (status, _) = h.post("/reload", "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        h
    }

    async fn write(&self, uri: &str, gzip: bool, body: Vec<u8>) -> (StatusCode, String) {
        let mut req = Request::builder().method(Method::POST).uri(uri);
        if gzip {
            req = req.header("content-encoding", "gzip");
        }
        let resp = self
            .router()
            .oneshot(req.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        assert_eq!(resp.headers()["x-influxdb-version"], VERSION);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn buffered(&self, backend: &str) -> Vec<Vec<u8>> {
        let Some(queue) = self.sync.queues().get(backend) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Some(item) = queue.dequeue().unwrap() {
            out.push(item);
        }
        out
    }
}

#[tokio::test]
async fn write_to_other_database_is_404() {
    let h = Harness::with_unreachable_backend("metrics").await;

    let (status, body) = h.write("/write?db=other", false, b"cpu v=1".to_vec()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "database not exist.");
    let (status, _) = h.write("/write", false, b"cpu v=1".to_vec()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.buffered("b1").is_empty());
}

#[tokio::test]
async fn undeliverable_write_is_buffered() {
    let h = Harness::with_unreachable_backend("metrics").await;

    let (status, _) = h
        .write("/write?db=metrics", false, b"cpu,host=a v=1\nswap v=2\n".to_vec())
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = h.get("/queues").await;
    let sizes: BTreeMap<String, usize> = serde_json::from_str(&body).unwrap();
    assert_eq!(sizes["b1"], 1);
    // The unrouted `swap` line is dropped.
    assert_eq!(h.buffered("b1"), vec![b"cpu,host=a v=1\n".to_vec()]);
}

#[tokio::test]
async fn gzip_write_is_decoded() {
    use std::io::Write;

    let h = Harness::with_unreachable_backend("").await;
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    enc.write_all(b"cpu v=1\ncpu v=2").unwrap();
    let packed = enc.finish().unwrap();

    let (status, _) = h.write("/write?db=any", true, packed).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.buffered("b1"), vec![b"cpu v=1\ncpu v=2\n".to_vec()]);
}

#[tokio::test]
async fn corrupt_gzip_write_is_rejected() {
    let h = Harness::with_unreachable_backend("").await;
    let (status, body) = h.write("/write", true, b"not gzip at all".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "unable to decode gzip body");
    assert!(h.buffered("b1").is_empty());
}

#[tokio::test]
async fn write_with_no_routes_is_accepted_and_dropped() {
    let h = Harness::new();
    let (status, _) = h.write("/write", false, b"cpu v=1\n".to_vec()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.sync.queues().names().is_empty());
}
