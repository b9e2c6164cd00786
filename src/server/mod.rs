//! HTTP surface of the eviction guard
//!
//! - `/validate` - admission webhook for pod DELETE/UPDATE
//! - `/callback/*` - operator override of the interception latch
//! - `/healthz`, `/readyz` - Kubernetes probes
//! - `/metrics` - Prometheus scrape endpoint
//!
//! Also provides TLS material loading and graceful shutdown handling.

pub mod audit;
mod callback;
mod health;
pub mod metrics;
pub mod shutdown;
pub mod tls;
pub mod webhook;

pub use audit::{AuditError, AuditSink, KubeEventAuditSink, AUDIT_TIMEOUT};
pub use health::{build_router, run_server, run_server_tls, AppState, ReadinessState};
pub use metrics::{create_metrics, GuardMetrics, MetricsError, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};
pub use tls::{
    build_rustls_config, initialize_tls, load_from_dir, ServingCertificate, TlsError,
    DEFAULT_TLS_SECRET_NAME,
};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;

#[cfg(test)]
#[path = "tls_test.rs"]
mod tls_tests;
