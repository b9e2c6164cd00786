//! Prometheus metrics for the eviction guard
//!
//! All collectors live in a private registry exposed at `/metrics`.
//! Counters are process-lifetime and never read back into decisions.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Collectors for admission decisions and node health
pub struct GuardMetrics {
    registry: Registry,
    eviction_intercepted_total: IntCounter,
    eviction_allowed_total: IntCounter,
    admission_errors_total: IntCounterVec,
    node_notready_count: IntGauge,
    node_notready_tracked: IntGauge,
}

/// Shared handle passed to the tracker and the HTTP handlers
pub type SharedMetrics = Arc<GuardMetrics>;

impl GuardMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let eviction_intercepted_total = IntCounter::new(
            "eviction_intercepted_total",
            "Total number of eviction requests intercepted",
        )?;
        let eviction_allowed_total = IntCounter::new(
            "eviction_allowed_total",
            "Total number of eviction requests allowed",
        )?;
        let admission_errors_total = IntCounterVec::new(
            Opts::new(
                "admission_errors_total",
                "Admission requests rejected before evaluation, by cause",
            ),
            &["cause"],
        )?;
        let node_notready_count = IntGauge::new(
            "node_notready_count",
            "Number of nodes NotReady within the window at the last evaluation",
        )?;
        let node_notready_tracked = IntGauge::new(
            "node_notready_tracked",
            "Number of nodes currently tracked as NotReady, regardless of window",
        )?;

        registry.register(Box::new(eviction_intercepted_total.clone()))?;
        registry.register(Box::new(eviction_allowed_total.clone()))?;
        registry.register(Box::new(admission_errors_total.clone()))?;
        registry.register(Box::new(node_notready_count.clone()))?;
        registry.register(Box::new(node_notready_tracked.clone()))?;

        Ok(GuardMetrics {
            registry,
            eviction_intercepted_total,
            eviction_allowed_total,
            admission_errors_total,
            node_notready_count,
            node_notready_tracked,
        })
    }

    pub fn record_intercepted(&self) {
        self.eviction_intercepted_total.inc();
    }

    pub fn record_allowed(&self) {
        self.eviction_allowed_total.inc();
    }

    /// Count a request that never reached evaluation (`cause`: "review", "pod")
    pub fn record_admission_error(&self, cause: &str) {
        self.admission_errors_total.with_label_values(&[cause]).inc();
    }

    pub fn set_notready_count(&self, count: usize) {
        self.node_notready_count.set(count as i64);
    }

    pub fn set_notready_tracked(&self, tracked: usize) {
        self.node_notready_tracked.set(tracked as i64);
    }

    pub fn intercepted_total(&self) -> u64 {
        self.eviction_intercepted_total.get()
    }

    pub fn allowed_total(&self) -> u64 {
        self.eviction_allowed_total.get()
    }

    pub fn notready_count(&self) -> i64 {
        self.node_notready_count.get()
    }

    pub fn notready_tracked(&self) -> i64 {
        self.node_notready_tracked.get()
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, MetricsError> {
    Ok(Arc::new(GuardMetrics::new()?))
}
