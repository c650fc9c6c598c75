//! # HTTP Server
//!
//! HTTP server for metrics, health checks, and manual triggers.
//!
//! Provides endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness check (always returns 200)
//! - `/readyz` - Readiness check (200 once started and the Vault session is healthy)
//! - `POST /reconcile` - Queue a full reconciliation pass
//!
//! With a route prefix configured every path above is served under it.

use crate::observability::metrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct ServerState {
    /// Set once every background task is running
    pub is_ready: Arc<AtomicBool>,
    /// Cleared while Vault session renewal is failing
    pub backend_healthy: Arc<AtomicBool>,
    /// Force-update signal for the poll driver
    pub force_tx: mpsc::Sender<()>,
}

/// `route_prefix` must already be normalized (`/a/b`, see `HttpConfig::route_prefix`)
pub fn router(state: Arc<ServerState>, route_prefix: Option<&str>) -> Router {
    let routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/reconcile", post(reconcile_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    match route_prefix {
        Some(prefix) => Router::new().nest(prefix, routes),
        None => routes,
    }
}

/// Serve until `cancel` fires
pub async fn start_server(
    addr: String,
    route_prefix: Option<String>,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(&addr).await?;

    info!(
        "HTTP server listening on {}{}",
        addr,
        route_prefix.as_deref().unwrap_or_default()
    );

    axum::serve(listener, router(state, route_prefix.as_deref()))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) && state.backend_healthy.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn reconcile_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.force_tx.try_send(()) {
        // A pass already queued covers this request too
        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {
            info!("Force update requested");
            StatusCode::ACCEPTED
        }
        Err(mpsc::error::TrySendError::Closed(())) => {
            warn!("Force update requested but the poll driver is not running");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn status_of(app: Router, method: &str, uri: &str) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    fn state(ready: bool, healthy: bool) -> (Arc<ServerState>, mpsc::Receiver<()>) {
        let (force_tx, force_rx) = mpsc::channel(1);
        (
            Arc::new(ServerState {
                is_ready: Arc::new(AtomicBool::new(ready)),
                backend_healthy: Arc::new(AtomicBool::new(healthy)),
                force_tx,
            }),
            force_rx,
        )
    }

    #[tokio::test]
    async fn test_readyz_requires_ready_and_healthy() {
        for (ready, healthy, expected) in [
            (true, true, StatusCode::OK),
            (false, true, StatusCode::SERVICE_UNAVAILABLE),
            (true, false, StatusCode::SERVICE_UNAVAILABLE),
        ] {
            let (state, _rx) = state(ready, healthy);
            let response = readyz_handler(State(state)).await.into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_reconcile_queues_force_signal() {
        let (state, mut rx) = state(true, true);
        let response = reconcile_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await, Some(()));

        // A full queue is still accepted
        reconcile_handler(State(Arc::clone(&state))).await;
        let response = reconcile_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_reconcile_without_driver_is_unavailable() {
        let (state, rx) = state(true, true);
        drop(rx);
        let response = reconcile_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        assert_eq!(healthz_handler().await.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_routes_served_at_root_without_prefix() {
        let (state, _rx) = state(true, true);
        let app = router(state, None);
        assert_eq!(status_of(app.clone(), "GET", "/healthz").await, StatusCode::OK);
        assert_eq!(status_of(app.clone(), "GET", "/readyz").await, StatusCode::OK);
        assert_eq!(status_of(app, "POST", "/reconcile").await, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_routes_nested_under_prefix() {
        let (state, _rx) = state(true, true);
        let app = router(state, Some("/syncer"));
        assert_eq!(status_of(app.clone(), "GET", "/syncer/healthz").await, StatusCode::OK);
        assert_eq!(status_of(app.clone(), "GET", "/syncer/metrics").await, StatusCode::OK);
        assert_eq!(status_of(app, "GET", "/healthz").await, StatusCode::NOT_FOUND);
    }
}
