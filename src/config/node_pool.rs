//! Node-pool policy: label selectors mapped to NotReady thresholds
//!
//! Rules are read once from `node-pools.json` in the ConfigMap directory.
//! The first rule whose selector matches a node's labels wins; nodes that
//! match nothing fall back to the cluster-wide default.

use super::ConfigError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

/// File name of the policy inside the ConfigMap directory
pub const NODE_POOLS_FILE: &str = "node-pools.json";

/// The threshold/window pair that applies to one node
#[derive(Debug, Clone, PartialEq)]
pub struct PoolPolicy {
    /// Rule name, `None` for the cluster-wide default
    pub name: Option<String>,
    pub threshold: u32,
    pub window: Duration,
}

impl PoolPolicy {
    pub fn default_pool(threshold: u32, window: Duration) -> Self {
        PoolPolicy {
            name: None,
            threshold,
            window,
        }
    }

    /// Label used in logs
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("default")
    }
}

/// A single node-pool rule
#[derive(Debug, Clone)]
pub struct NodePoolRule {
    pub selector: LabelSelector,
    pub policy: PoolPolicy,
}

impl NodePoolRule {
    /// Check the rule's selector against a node's labels
    ///
    /// Returns `Err` when the selector itself is malformed.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, String> {
        selector_matches(&self.selector, labels)
    }
}

/// Rule as written in `node-pools.json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    label_selector: LabelSelector,
    threshold: u32,
    window: RawWindow,
}

/// Windows may be given as `"5m"` style strings or as integer nanoseconds
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawWindow {
    Nanos(u64),
    Text(String),
}

impl RawWindow {
    fn to_duration(&self) -> Option<Duration> {
        match self {
            RawWindow::Nanos(0) => None,
            RawWindow::Nanos(nanos) => Some(Duration::from_nanos(*nanos)),
            RawWindow::Text(text) => parse_duration(text),
        }
    }
}

/// Static node-pool policy, immutable after load
#[derive(Debug, Clone)]
pub struct NodePoolPolicy {
    rules: Vec<NodePoolRule>,
    default: PoolPolicy,
}

impl NodePoolPolicy {
    pub fn new(rules: Vec<NodePoolRule>, default: PoolPolicy) -> Self {
        NodePoolPolicy { rules, default }
    }

    /// Load rules from `<dir>/node-pools.json`
    ///
    /// A missing or broken file is logged and leaves only the default in
    /// effect. It is never fatal.
    pub fn load(dir: &Path, default: PoolPolicy) -> Self {
        match Self::try_load(dir, default.clone()) {
            Ok(policy) => {
                info!(
                    rules = policy.rules.len(),
                    default_threshold = policy.default.threshold,
                    default_window_secs = policy.default.window.as_secs(),
                    "Node pool policy loaded"
                );
                policy
            }
            Err(e) => {
                error!(error = %e, "Failed to load node pool config, using default policy only");
                Self::new(Vec::new(), default)
            }
        }
    }

    pub fn try_load(dir: &Path, default: PoolPolicy) -> Result<Self, ConfigError> {
        let path = dir.join(NODE_POOLS_FILE);
        let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&data, default)
    }

    pub fn from_json(data: &str, default: PoolPolicy) -> Result<Self, ConfigError> {
        let raw: Vec<RawRule> = serde_json::from_str(data)?;

        let rules = raw
            .into_iter()
            .enumerate()
            .map(|(index, rule)| {
                let window = rule.window.to_duration().ok_or_else(|| ConfigError::InvalidRule {
                    index,
                    reason: format!("invalid window {:?}", rule.window),
                })?;
                Ok(NodePoolRule {
                    selector: rule.label_selector,
                    policy: PoolPolicy {
                        name: rule.name,
                        threshold: rule.threshold,
                        window,
                    },
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self::new(rules, default))
    }

    pub fn rules(&self) -> &[NodePoolRule] {
        &self.rules
    }

    pub fn default_policy(&self) -> &PoolPolicy {
        &self.default
    }

    /// Pick the policy for a node: first matching rule, else the default
    pub fn rule_for(&self, labels: &BTreeMap<String, String>) -> &PoolPolicy {
        for (index, rule) in self.rules.iter().enumerate() {
            match rule.matches(labels) {
                Ok(true) => return &rule.policy,
                Ok(false) => {}
                Err(reason) => {
                    error!(index = index, reason = %reason, "Invalid label selector in node pool config");
                }
            }
        }
        &self.default
    }
}

/// Evaluate a Kubernetes label selector against a label set
///
/// An empty selector matches everything.
pub fn selector_matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Result<bool, String> {
    // Every requirement is checked, even after a mismatch, so malformed
    // expressions always surface as errors.
    let mut matched = true;

    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                matched = false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for requirement in expressions {
            if !requirement_matches(requirement, labels)? {
                matched = false;
            }
        }
    }

    Ok(matched)
}

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool, String> {
    let values = requirement.values.as_deref().unwrap_or_default();
    let actual = labels.get(&requirement.key);

    match requirement.operator.as_str() {
        "In" | "NotIn" if values.is_empty() => Err(format!(
            "operator {} on key {} requires at least one value",
            requirement.operator, requirement.key
        )),
        "In" => Ok(actual.is_some_and(|v| values.contains(v))),
        "NotIn" => Ok(!actual.is_some_and(|v| values.contains(v))),
        "Exists" | "DoesNotExist" if !values.is_empty() => Err(format!(
            "operator {} on key {} must not have values",
            requirement.operator, requirement.key
        )),
        "Exists" => Ok(actual.is_some()),
        "DoesNotExist" => Ok(actual.is_none()),
        other => Err(format!("unknown operator {}", other)),
    }
}

/// Parse a duration string like "30s", "5m", "1h"
///
/// Returns `None` for empty, zero, or unit-less input. Seconds and minutes
/// are capped at 24h, hours at one week.
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let duration_str = duration_str.trim();

    if duration_str.is_empty() {
        return None;
    }

    let unit = duration_str.chars().last()?;
    let number_str = &duration_str[..duration_str.len() - unit.len_utf8()];
    let number: u64 = number_str.parse().ok()?;

    if number == 0 {
        return None;
    }

    match unit {
        's' if number <= 86400 => Some(Duration::from_secs(number)),
        'm' if number <= 1440 => number.checked_mul(60).map(Duration::from_secs),
        'h' if number <= 168 => number.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}
