//! Metrics and health endpoints
//!
//! Served on `--metrics-addr`:
//! - `GET /metrics` - Prometheus text exposition
//! - `GET /healthz`, `GET /readyz` - liveness and readiness probes

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::metrics::Metrics;
use crate::Error;

/// Content type of the Prometheus text format
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Build the router for the metrics and health endpoints
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .with_state(metrics)
}

/// Bind the listener for the metrics and health endpoints
///
/// Fails when the address is already in use.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Metrics server listening");
    Ok(listener)
}

/// Serve the metrics router on an already bound listener
///
/// Only returns when the server fails.
pub async fn run(listener: TcpListener, metrics: Arc<Metrics>) -> Result<(), Error> {
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_endpoints_return_ok() {
        let metrics = Arc::new(Metrics::new().unwrap());

        for uri in ["/healthz", "/readyz"] {
            let (status, body) = get_body(router(metrics.clone()), uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, "ok");
        }
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_counters() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_injection();

        let (status, body) = get_body(router(metrics), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("node_sidecar_injections_total 1"));
    }

    #[tokio::test]
    async fn binding_a_busy_address_fails() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = held.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();

        match err {
            Error::Server(io) => assert_eq!(io.kind(), std::io::ErrorKind::AddrInUse),
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bound_listener_serves_health_over_tcp() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let server = tokio::spawn(run(listener, metrics));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));
        server.abort();
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (status, _) = get_body(router(metrics), "/debug").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
