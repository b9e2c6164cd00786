//! Node health tracking
//!
//! `NodeHealthTracker` holds `node name -> NotReady record` for every node
//! last observed with a Ready condition that is not `"True"`. Records are
//! never aged out eagerly: staleness is judged per query against the window
//! of the pool that applies to the evicted pod's node.
//!
//! Events arrive through [`NodeEvent`] from the watch driver and are applied
//! in order by a single consumer. Admission decisions read concurrently.

use crate::config::{NodePoolPolicy, PoolPolicy};
use crate::monitor::clock::{from_k8s_time, Clock};
use crate::monitor::interception::InterceptionOverride;
use crate::server::SharedMetrics;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Typed node change delivered by the watch driver
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Node added or modified
    Upserted(Node),
    /// Node removed from the cluster
    Deleted(Node),
    /// Full relist; replaces everything known so far
    Resynced(Vec<Node>),
}

/// Why a node is not Ready
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    /// Ready=True, or no Ready condition reported at all
    Ready,
    NotReady {
        status: String,
        reason: Option<String>,
        since: Option<DateTime<Utc>>,
    },
}

/// Inspect the node's Ready condition
pub fn readiness(node: &Node) -> Readiness {
    let condition = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"));

    match condition {
        Some(c) if c.status != "True" => Readiness::NotReady {
            status: c.status.clone(),
            reason: c.reason.clone(),
            since: c.last_transition_time.as_ref().and_then(from_k8s_time),
        },
        _ => Readiness::Ready,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeHealthRecord {
    /// Last transition of the Ready condition, as reported by the node
    pub became_not_ready_at: DateTime<Utc>,
    /// Node labels at the time of observation, used for pool matching
    pub labels: BTreeMap<String, String>,
}

/// Result of evaluating the pool policy for one node
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEvaluation {
    pub pool: PoolPolicy,
    /// NotReady nodes across the whole cluster still inside `pool.window`
    pub count: usize,
}

impl PoolEvaluation {
    pub fn threshold(&self) -> u32 {
        self.pool.threshold
    }

    pub fn should_intercept(&self) -> bool {
        self.count >= self.pool.threshold as usize
    }
}

/// Change to push into the interception mirror once the record lock is released
enum MirrorChange {
    NotReady(String),
    Ready(String),
}

pub struct NodeHealthTracker {
    records: RwLock<HashMap<String, NodeHealthRecord>>,
    policy: NodePoolPolicy,
    interception: Arc<InterceptionOverride>,
    clock: Arc<dyn Clock>,
    metrics: Option<SharedMetrics>,
}

impl NodeHealthTracker {
    pub fn new(
        policy: NodePoolPolicy,
        interception: Arc<InterceptionOverride>,
        clock: Arc<dyn Clock>,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        NodeHealthTracker {
            records: RwLock::new(HashMap::new()),
            policy,
            interception,
            clock,
            metrics,
        }
    }

    /// Apply one watch event
    pub fn apply(&self, event: NodeEvent) {
        let changes = match event {
            NodeEvent::Upserted(node) => self.on_node_observed(&node),
            NodeEvent::Deleted(node) => self.on_node_removed(&node),
            NodeEvent::Resynced(nodes) => self.on_resync(&nodes),
        };

        // The record lock is released by now; the override has its own.
        for change in changes {
            match change {
                MirrorChange::NotReady(name) => self.interception.record_not_ready(&name),
                MirrorChange::Ready(name) => self.interception.record_ready(&name),
            }
        }
    }

    fn on_node_observed(&self, node: &Node) -> Vec<MirrorChange> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let change = self.observe_locked(&mut records, node);
        self.publish_tracked(records.len());
        change.into_iter().collect()
    }

    fn on_node_removed(&self, node: &Node) -> Vec<MirrorChange> {
        let Some(name) = node.metadata.name.as_deref() else {
            warn!("Ignoring delete event for node without a name");
            return Vec::new();
        };

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let removed = records.remove(name).is_some();
        self.publish_tracked(records.len());

        if removed {
            info!(
                node = name,
                remaining = records.len(),
                "Node deleted, dropped its NotReady record"
            );
            vec![MirrorChange::Ready(name.to_string())]
        } else {
            debug!(node = name, "Node deleted");
            Vec::new()
        }
    }

    fn on_resync(&self, nodes: &[Node]) -> Vec<MirrorChange> {
        let listed: HashSet<&str> = nodes
            .iter()
            .filter_map(|n| n.metadata.name.as_deref())
            .collect();

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        let vanished: Vec<String> = records
            .keys()
            .filter(|name| !listed.contains(name.as_str()))
            .cloned()
            .collect();

        let mut changes = Vec::with_capacity(vanished.len() + nodes.len());
        for name in vanished {
            records.remove(&name);
            changes.push(MirrorChange::Ready(name));
        }

        for node in nodes {
            changes.extend(self.observe_locked(&mut records, node));
        }

        self.publish_tracked(records.len());
        info!(
            listed = nodes.len(),
            not_ready = records.len(),
            "Applied full node list"
        );
        changes
    }

    /// Upsert or clear the record for one node. Caller holds the write lock.
    fn observe_locked(
        &self,
        records: &mut HashMap<String, NodeHealthRecord>,
        node: &Node,
    ) -> Option<MirrorChange> {
        let Some(name) = node.metadata.name.as_deref() else {
            warn!("Ignoring node without a name");
            return None;
        };

        match readiness(node) {
            Readiness::NotReady {
                status,
                reason,
                since,
            } => {
                // Without a transition time a fresh record sits outside every window
                let became_not_ready_at = match (since, records.get(name)) {
                    (Some(since), _) => since,
                    (None, Some(existing)) => existing.became_not_ready_at,
                    (None, None) => {
                        warn!(node = name, "Ready condition has no lastTransitionTime");
                        DateTime::<Utc>::MIN_UTC
                    }
                };
                let labels = node.metadata.labels.clone().unwrap_or_default();

                records.insert(
                    name.to_string(),
                    NodeHealthRecord {
                        became_not_ready_at,
                        labels,
                    },
                );
                info!(
                    node = name,
                    status = %status,
                    reason = reason.as_deref().unwrap_or(""),
                    since = %became_not_ready_at,
                    tracked = records.len(),
                    "Node is NotReady"
                );
                Some(MirrorChange::NotReady(name.to_string()))
            }
            Readiness::Ready => {
                if records.remove(name).is_some() {
                    info!(
                        node = name,
                        tracked = records.len(),
                        "Node is Ready again, dropped its NotReady record"
                    );
                    Some(MirrorChange::Ready(name.to_string()))
                } else {
                    None
                }
            }
        }
    }

    /// Evaluate the pool policy for the node hosting a pod under eviction
    ///
    /// Returns `None` when the node has no NotReady record. Otherwise the
    /// count covers every tracked node in the cluster, not only the matched
    /// pool, measured against that pool's window.
    pub fn evaluate(&self, node_name: &str) -> Option<PoolEvaluation> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let record = records.get(node_name)?;

        let pool = self.policy.rule_for(&record.labels).clone();
        let now = self.clock.now();
        let window = chrono::Duration::from_std(pool.window).unwrap_or(chrono::Duration::MAX);

        let count = records
            .iter()
            .filter(|(name, r)| {
                let elapsed = now.signed_duration_since(r.became_not_ready_at);
                let inside = elapsed < window;
                debug!(
                    node = name.as_str(),
                    elapsed_secs = elapsed.num_seconds(),
                    inside_window = inside,
                    "NotReady record"
                );
                inside
            })
            .count();
        drop(records);

        if let Some(metrics) = &self.metrics {
            metrics.set_notready_count(count);
        }

        let evaluation = PoolEvaluation { pool, count };
        info!(
            node = node_name,
            pool = evaluation.pool.display_name(),
            count = count,
            threshold = evaluation.threshold(),
            window_secs = evaluation.pool.window.as_secs(),
            "Evaluated NotReady nodes within window"
        );
        Some(evaluation)
    }

    /// Sorted names of every tracked node, inside the window or not
    pub fn not_ready_nodes(&self) -> Vec<String> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = records.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn record(&self, node_name: &str) -> Option<NodeHealthRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_name)
            .cloned()
    }

    fn publish_tracked(&self, tracked: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_notready_tracked(tracked);
        }
    }
}

#[cfg(test)]
#[path = "tracker_test.rs"]
mod tests;
