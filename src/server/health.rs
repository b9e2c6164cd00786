//! Router and server entry points
//!
//! - `/healthz` - Liveness: Is the process alive?
//! - `/readyz` - Readiness: has the initial node list been applied?
//! - `/metrics` - Prometheus metrics in text format
//! - `/validate` - pod eviction admission webhook
//! - `/callback/*` - interception override

use crate::monitor::interception::InterceptionOverride;
use crate::monitor::tracker::NodeHealthTracker;
use crate::server::audit::AuditSink;
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Grace period for in-flight requests once shutdown starts (HTTPS)
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Readiness flag shared between `main` and the probe handler
///
/// Set once the node cache has synced, cleared when shutdown begins.
#[derive(Debug, Clone)]
pub struct ReadinessState {
    ready: Arc<AtomicBool>,
}

impl ReadinessState {
    /// Create a new readiness state (initially not ready)
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Makes `/readyz` answer 503 so the Service stops routing to us
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the HTTP handlers need, passed explicitly at construction
#[derive(Clone)]
pub struct AppState {
    pub readiness: ReadinessState,
    pub metrics: SharedMetrics,
    pub tracker: Arc<NodeHealthTracker>,
    pub interception: Arc<InterceptionOverride>,
    pub audit: Arc<dyn AuditSink>,
}

/// Liveness probe handler
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe handler
async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Build the router for all endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(self::metrics))
        .route("/validate", post(super::webhook::handle_validate))
        .route(
            "/callback/disable-interception",
            post(super::callback::disable_interception),
        )
        .route(
            "/callback/enable-interception",
            post(super::callback::enable_interception),
        )
        .route("/callback/status", get(super::callback::get_status))
        .with_state(state)
}

/// Serve plain HTTP until `shutdown` fires
///
/// Used in local mode. In-flight requests finish before this returns.
pub async fn run_server(
    port: u16,
    state: AppState,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, "Webhook server listening (HTTP)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled())
        .await
        .map_err(std::io::Error::other)
}

/// Serve HTTPS until `shutdown` fires
pub async fn run_server_tls(
    port: u16,
    state: AppState,
    tls_config: Arc<rustls::ServerConfig>,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    use axum_server::tls_rustls::RustlsConfig;

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let config = RustlsConfig::from_config(tls_config);

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        shutdown_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
    });

    info!(port = %port, "Webhook server listening (HTTPS)");

    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test helper - panicking is acceptable
impl AppState {
    /// State wired to in-memory collaborators
    pub fn new_mock(
        policy: crate::config::NodePoolPolicy,
        clock: Arc<crate::monitor::clock::MockClock>,
        audit: Arc<crate::server::audit::MockAuditSink>,
        intercepting: bool,
    ) -> Self {
        let metrics = crate::server::metrics::create_metrics().unwrap();
        let interception = Arc::new(InterceptionOverride::new(intercepting));
        let tracker = Arc::new(NodeHealthTracker::new(
            policy,
            interception.clone(),
            clock,
            Some(metrics.clone()),
        ));
        AppState {
            readiness: ReadinessState::new(),
            metrics,
            tracker,
            interception,
            audit,
        }
    }
}
