//! Audit events for intercepted evictions
//!
//! Every denial leaves a Warning `Event` on the pod so operators see why
//! the eviction stalled. Auditing is best effort: a failed or slow write is
//! logged and never changes the admission decision.

use crate::monitor::clock::to_k8s_time;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound for one audit write
pub const AUDIT_TIMEOUT: Duration = Duration::from_secs(3);

pub const EVENT_REASON: &str = "EvictionProtection";
pub const EVENT_COMPONENT: &str = "pod-eviction-protection";
pub const EVENT_MESSAGE: &str =
    "Pod eviction intercepted due to node being NotReady. Waiting for administrator confirmation.";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Pod has no namespace")]
    MissingNamespace,

    #[error("Audit write timed out after {0:?}")]
    Timeout(Duration),
}

/// Destination for interception audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_interception(&self, pod: &Pod) -> Result<(), AuditError>;
}

/// Writes core/v1 Events through the Kubernetes API
pub struct KubeEventAuditSink {
    client: Client,
}

impl KubeEventAuditSink {
    pub fn new(client: Client) -> Self {
        KubeEventAuditSink { client }
    }
}

#[async_trait]
impl AuditSink for KubeEventAuditSink {
    async fn record_interception(&self, pod: &Pod) -> Result<(), AuditError> {
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .ok_or(AuditError::MissingNamespace)?;

        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let event = build_interception_event(pod, Utc::now());
        events.create(&PostParams::default(), &event).await?;
        Ok(())
    }
}

/// Build the Warning event attached to an intercepted pod
pub fn build_interception_event(pod: &Pod, now: DateTime<Utc>) -> Event {
    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", EVENT_COMPONENT)),
            namespace: pod.metadata.namespace.clone(),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            name: pod.metadata.name.clone(),
            namespace: pod.metadata.namespace.clone(),
            uid: pod.metadata.uid.clone(),
            ..Default::default()
        },
        reason: Some(EVENT_REASON.to_string()),
        message: Some(EVENT_MESSAGE.to_string()),
        source: Some(EventSource {
            component: Some(EVENT_COMPONENT.to_string()),
            host: None,
        }),
        first_timestamp: to_k8s_time(now),
        last_timestamp: to_k8s_time(now),
        count: Some(1),
        type_: Some("Warning".to_string()),
        ..Default::default()
    }
}

/// Record an interception, bounded by `timeout`; failures are only logged
pub async fn audit_interception(sink: &dyn AuditSink, pod: &Pod, timeout: Duration) {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("");
    let name = pod.metadata.name.as_deref().unwrap_or("");

    let result = match tokio::time::timeout(timeout, sink.record_interception(pod)).await {
        Ok(result) => result,
        Err(_) => Err(AuditError::Timeout(timeout)),
    };

    match result {
        Ok(()) => info!(namespace = namespace, pod = name, "Created event for pod"),
        Err(e) => warn!(
            namespace = namespace,
            pod = name,
            error = %e,
            "Failed to create event for pod"
        ),
    }
}

/// In-memory sink for tests
#[cfg(test)]
pub struct MockAuditSink {
    recorded: std::sync::Mutex<Vec<Pod>>,
    fail: bool,
    delay: Option<Duration>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockAuditSink {
    pub fn new() -> Self {
        MockAuditSink {
            recorded: std::sync::Mutex::new(Vec::new()),
            fail: false,
            delay: None,
        }
    }

    pub fn failing() -> Self {
        MockAuditSink {
            fail: true,
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        MockAuditSink {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn recorded(&self) -> Vec<Pod> {
        self.recorded.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl AuditSink for MockAuditSink {
    async fn record_interception(&self, pod: &Pod) -> Result<(), AuditError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AuditError::MissingNamespace);
        }
        #[allow(clippy::unwrap_used)]
        self.recorded.lock().unwrap().push(pod.clone());
        Ok(())
    }
}
