//! HTTP delivery of buffered writes to a backend.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tracing::debug;

use fluxgate_config::BackendConfig;

use crate::drain::Deliver;

const USER_AGENT: &str = concat!("fluxgate/", env!("CARGO_PKG_VERSION"));

/// Why a payload could not be delivered. The payload stays queued.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid backend url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connect to {authority} failed: {source}")]
    Connect {
        authority: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("backend rejected write with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Posts payloads to `<url>/write?db=<db>` over HTTP/1.1.
///
/// One connection per delivery; the drain loop sends one payload at a
/// time per backend.
#[derive(Debug, Clone, Default)]
pub struct HttpDelivery;

impl HttpDelivery {
    pub fn new() -> Self {
        Self
    }

    async fn post(&self, backend: &BackendConfig, payload: &[u8]) -> Result<(), DeliveryError> {
        let uri = write_uri(backend)?;
        let authority = match uri.authority() {
            Some(a) if a.port().is_some() => a.to_string(),
            Some(a) => format!("{}:80", a.host()),
            None => {
                return Err(DeliveryError::InvalidUrl {
                    url: backend.url.clone(),
                    reason: "missing host".to_string(),
                });
            }
        };

        let stream = tokio::net::TcpStream::connect(&authority)
            .await
            .map_err(|source| DeliveryError::Connect {
                authority: authority.clone(),
                source,
            })?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "backend connection closed with error");
            }
        });

        let path = uri.path_and_query().map_or("/write", |pq| pq.as_str());
        let req = http::Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(http::header::HOST, &authority)
            .header(http::header::USER_AGENT, USER_AGENT)
            .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Full::new(Bytes::copy_from_slice(payload)))
            .map_err(|e| DeliveryError::InvalidUrl {
                url: backend.url.clone(),
                reason: e.to_string(),
            })?;

        let resp = sender.send_request(req).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.into_body().collect().await?.to_bytes();
        Err(DeliveryError::Status {
            status,
            body: String::from_utf8_lossy(&body).trim().to_string(),
        })
    }
}

impl Deliver for HttpDelivery {
    async fn deliver(&self, backend: &BackendConfig, payload: &[u8]) -> Result<(), DeliveryError> {
        let timeout = Duration::from_millis(backend.timeout.max(1) as u64);
        match tokio::time::timeout(timeout, self.post(backend, payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }
}

/// `<url>/write?db=<db>` for a backend, with `db` percent-encoded.
fn write_uri(backend: &BackendConfig) -> Result<Uri, DeliveryError> {
    let invalid = |reason: String| DeliveryError::InvalidUrl {
        url: backend.url.clone(),
        reason,
    };
    let base = backend.url.trim_end_matches('/');
    let db = urlencoding::encode(&backend.db);
    let uri: Uri = format!("{base}/write?db={db}")
        .parse()
        .map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;
    match uri.scheme_str() {
        Some("http") => Ok(uri),
        Some(other) => Err(invalid(format!("unsupported scheme {other}"))),
        None => Err(invalid("missing scheme".to_string())),
    }
}
