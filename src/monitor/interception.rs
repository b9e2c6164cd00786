//! Operator override latch
//!
//! `InterceptionOverride` is the manual kill switch layered on top of
//! automatic health tracking. While `intercepting` is false every eviction
//! is allowed, whatever the tracker reports.
//!
//! It also keeps a mirror of the node names the tracker currently considers
//! NotReady. The mirror is for operators only (`GET /callback/status`) and
//! never feeds the decision. Disabling clears the mirror but leaves the
//! tracker's own records alone.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};
use tracing::info;

#[derive(Debug, Default)]
struct OverrideState {
    intercepting: bool,
    not_ready_nodes: BTreeSet<String>,
}

/// Point-in-time copy of the override for operator inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideStatus {
    pub intercepting: bool,
    /// Sorted node names
    pub not_ready_nodes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InterceptionOverride {
    state: RwLock<OverrideState>,
}

impl InterceptionOverride {
    pub fn new(intercepting: bool) -> Self {
        InterceptionOverride {
            state: RwLock::new(OverrideState {
                intercepting,
                not_ready_nodes: BTreeSet::new(),
            }),
        }
    }

    /// Stop intercepting and forget the mirrored NotReady set
    pub fn disable(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.intercepting = false;
        state.not_ready_nodes.clear();
        info!("Interception disabled via callback");
    }

    /// Start intercepting. The mirrored set is left as is; only later
    /// health events repopulate it.
    pub fn enable(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.intercepting = true;
        info!("Interception enabled via callback");
    }

    pub fn is_intercepting(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .intercepting
    }

    pub fn status(&self) -> OverrideStatus {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        OverrideStatus {
            intercepting: state.intercepting,
            not_ready_nodes: state.not_ready_nodes.iter().cloned().collect(),
        }
    }

    pub fn record_not_ready(&self, node_name: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.not_ready_nodes.insert(node_name.to_string());
    }

    pub fn record_ready(&self, node_name: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.not_ready_nodes.remove(node_name);
    }
}

#[cfg(test)]
#[path = "interception_test.rs"]
mod tests;
