//! Validating admission webhook for pod evictions
//!
//! The API server sends an `AdmissionReview` for every pod DELETE/UPDATE the
//! webhook is registered for. Each request goes through:
//!
//! 1. Filter: anything but DELETE/UPDATE on a Pod is allowed untouched
//! 2. Decode: the pod is read from `oldObject` (DELETE) or `object` (UPDATE);
//!    a malformed body or pod is answered with HTTP 400
//! 3. Evaluate: latch off => allow; pod's node untracked => allow;
//!    otherwise deny when the windowed NotReady count reaches the pool threshold
//! 4. Respond, echoing the request UID
//!
//! Denials bump `eviction_intercepted_total` and leave an audit event on the
//! pod; allows bump `eviction_allowed_total`.

use crate::monitor::interception::InterceptionOverride;
use crate::monitor::tracker::{NodeHealthTracker, PoolEvaluation};
use crate::server::audit::{audit_interception, AUDIT_TIMEOUT};
use crate::server::health::AppState;
use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const DENY_REASON: &str = "EvictionProtection";
pub const DENY_MESSAGE: &str = "Pod eviction intercepted due to multiple nodes being NotReady";

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub request: AdmissionRequest,
}

fn default_api_version() -> String {
    ADMISSION_API_VERSION.to_string()
}

fn default_kind() -> String {
    "AdmissionReview".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

/// The request part of an AdmissionReview
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Correlation ID, echoed back unchanged
    pub uid: String,
    #[serde(default)]
    pub kind: Option<GroupVersionKind>,
    pub operation: Operation,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub object: Option<Value>,
    #[serde(default)]
    pub old_object: Option<Value>,
}

impl AdmissionRequest {
    /// Whether this request is a pod DELETE/UPDATE we need to evaluate
    pub fn is_guarded(&self) -> bool {
        let is_pod = match &self.kind {
            Some(gvk) => gvk.group.is_empty() && gvk.kind == "Pod",
            None => true,
        };
        is_pod && matches!(self.operation, Operation::Delete | Operation::Update)
    }

    /// Decode the pod under review
    ///
    /// DELETE carries the pod in `oldObject`, UPDATE in `object`. The
    /// request namespace fills in a pod without one.
    pub fn decode_pod(&self) -> Result<Pod, String> {
        let (field, raw) = match self.operation {
            Operation::Delete => ("oldObject", &self.old_object),
            _ => ("object", &self.object),
        };
        let raw = raw
            .as_ref()
            .filter(|v| !v.is_null())
            .ok_or_else(|| format!("{} request has no {}", self.operation_name(), field))?;

        let mut pod: Pod = serde_json::from_value(raw.clone())
            .map_err(|e| format!("Failed to decode pod from {}: {}", field, e))?;

        if pod.metadata.namespace.is_none() {
            pod.metadata.namespace = self.namespace.clone();
        }
        Ok(pod)
    }

    fn operation_name(&self) -> &'static str {
        match self.operation {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Connect => "CONNECT",
            Operation::Unknown => "UNKNOWN",
        }
    }
}

/// Status attached to a denial
#[derive(Debug, Serialize, PartialEq)]
pub struct AdmissionStatus {
    pub status: String,
    pub message: String,
    pub reason: String,
    pub code: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

impl AdmissionResponse {
    pub fn allow(uid: &str) -> Self {
        AdmissionResponse {
            uid: uid.to_string(),
            allowed: true,
            status: None,
        }
    }

    pub fn deny(uid: &str) -> Self {
        AdmissionResponse {
            uid: uid.to_string(),
            allowed: false,
            status: Some(AdmissionStatus {
                status: "Failure".to_string(),
                message: DENY_MESSAGE.to_string(),
                reason: DENY_REASON.to_string(),
                code: StatusCode::FORBIDDEN.as_u16(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// Outcome of evaluating one pod
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Interception is switched off
    AllowDisabled,
    /// Pod is not bound to a node
    AllowUnscheduled,
    /// Pod's node has no NotReady record
    AllowNodeHealthy,
    /// Pod's node is NotReady but the count is under threshold
    AllowBelowThreshold(PoolEvaluation),
    /// Too many nodes went NotReady within the window
    Deny(PoolEvaluation),
}

impl Decision {
    pub fn allowed(&self) -> bool {
        !matches!(self, Decision::Deny(_))
    }
}

/// Decide whether the pod may be evicted
///
/// Reads the latch first and only consults the tracker while intercepting.
pub fn decide(
    pod: &Pod,
    interception: &InterceptionOverride,
    tracker: &NodeHealthTracker,
) -> Decision {
    if !interception.is_intercepting() {
        return Decision::AllowDisabled;
    }

    let Some(node_name) = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
    else {
        return Decision::AllowUnscheduled;
    };

    match tracker.evaluate(node_name) {
        None => Decision::AllowNodeHealthy,
        Some(eval) if eval.should_intercept() => Decision::Deny(eval),
        Some(eval) => Decision::AllowBelowThreshold(eval),
    }
}

fn bad_request(message: String) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Axum handler for the /validate endpoint
pub async fn handle_validate(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            warn!(error = %e, "Failed to decode admission review");
            state.metrics.record_admission_error("review");
            return bad_request(e.to_string());
        }
    };

    let AdmissionReview {
        api_version,
        kind,
        request,
    } = review;

    let response = if !request.is_guarded() {
        debug!(
            uid = %request.uid,
            operation = ?request.operation,
            "Operation not guarded, allowing"
        );
        AdmissionResponse::allow(&request.uid)
    } else {
        let pod = match request.decode_pod() {
            Ok(pod) => pod,
            Err(e) => {
                warn!(uid = %request.uid, error = %e, "Failed to decode pod");
                state.metrics.record_admission_error("pod");
                return bad_request(e);
            }
        };

        let decision = decide(&pod, &state.interception, &state.tracker);
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("");
        let name = pod.metadata.name.as_deref().unwrap_or("");
        info!(
            uid = %request.uid,
            operation = ?request.operation,
            namespace = namespace,
            pod = name,
            decision = ?decision,
            "Admission decision"
        );

        if decision.allowed() {
            state.metrics.record_allowed();
            AdmissionResponse::allow(&request.uid)
        } else {
            state.metrics.record_intercepted();
            audit_interception(state.audit.as_ref(), &pod, AUDIT_TIMEOUT).await;
            AdmissionResponse::deny(&request.uid)
        }
    };

    (
        StatusCode::OK,
        Json(AdmissionReviewResponse {
            api_version,
            kind,
            response,
        }),
    )
        .into_response()
}

#[cfg(test)]
#[path = "webhook_test.rs"]
mod tests;
