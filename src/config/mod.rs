//! Process configuration
//!
//! Settings come from environment variables, with a fixed set of defaults
//! for local development (`--local`). The node-pool policy is loaded
//! separately from a mounted ConfigMap directory, see [`node_pool`].

pub mod node_pool;

pub use node_pool::{
    parse_duration, NodePoolPolicy, NodePoolRule, PoolPolicy, NODE_POOLS_FILE,
};

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default HTTPS port for the admission webhook
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// Default plain HTTP port in local mode
pub const DEFAULT_LOCAL_PORT: u16 = 8080;

/// Default number of windowed NotReady nodes that triggers interception
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Default detection window (5 minutes)
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// Default time allowed for the initial node list to be applied
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";
pub const DEFAULT_CONFIG_MAP_DIR: &str = "/etc/webhook/config";
pub const DEFAULT_SERVICE_NAME: &str = "evictguard";
pub const DEFAULT_NAMESPACE: &str = "evictguard-system";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read node pool config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse node pool config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid node pool rule at index {index}: {reason}")]
    InvalidRule { index: usize, reason: String },
}

/// Runtime configuration for the webhook process
#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_port: u16,
    /// Directory holding `tls.crt` and `tls.key`. `None` serves plain HTTP.
    pub cert_dir: Option<PathBuf>,
    pub config_map_dir: PathBuf,
    pub default_threshold: u32,
    pub default_window: Duration,
    /// Initial state of the interception latch
    pub intercept_on_start: bool,
    pub cache_sync_timeout: Duration,
    /// Generate and publish our own webhook certificates instead of reading `cert_dir`
    pub self_signed_tls: bool,
    pub service_name: String,
    pub namespace: String,
}

impl Config {
    /// Build configuration from environment variables
    ///
    /// - `WEBHOOK_PORT` (default 8443)
    /// - `CERT_DIR` (default `/tmp/k8s-webhook-server/serving-certs`)
    /// - `CONFIG_MAP_DIR` (default `/etc/webhook/config`)
    /// - `NODE_NOTREADY_THRESHOLD` (default 3)
    /// - `NODE_NOTREADY_WINDOW` in seconds (default 300)
    /// - `INTERCEPT_ON_START` (default false)
    /// - `CACHE_SYNC_TIMEOUT` in seconds (default 60)
    /// - `EVICTGUARD_SELF_SIGNED_TLS`, `EVICTGUARD_SERVICE_NAME`, `EVICTGUARD_NAMESPACE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration for running outside the cluster against a local kubeconfig
    pub fn local() -> Self {
        let env = Self::from_env();
        Config {
            webhook_port: DEFAULT_LOCAL_PORT,
            cert_dir: None,
            config_map_dir: PathBuf::from("./config"),
            default_threshold: DEFAULT_THRESHOLD,
            default_window: DEFAULT_WINDOW,
            self_signed_tls: false,
            ..env
        }
    }

    /// Build configuration from an arbitrary variable source
    ///
    /// Split out from [`Config::from_env`] so tests don't have to mutate
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let window_secs: u64 = parse_or_default(&lookup, "NODE_NOTREADY_WINDOW", 300);
        let sync_secs: u64 = parse_or_default(&lookup, "CACHE_SYNC_TIMEOUT", 60);

        Config {
            webhook_port: parse_or_default(&lookup, "WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT),
            cert_dir: Some(PathBuf::from(
                lookup("CERT_DIR").unwrap_or_else(|| DEFAULT_CERT_DIR.to_string()),
            )),
            config_map_dir: PathBuf::from(
                lookup("CONFIG_MAP_DIR").unwrap_or_else(|| DEFAULT_CONFIG_MAP_DIR.to_string()),
            ),
            default_threshold: parse_or_default(
                &lookup,
                "NODE_NOTREADY_THRESHOLD",
                DEFAULT_THRESHOLD,
            ),
            default_window: Duration::from_secs(window_secs),
            intercept_on_start: flag(&lookup, "INTERCEPT_ON_START"),
            cache_sync_timeout: Duration::from_secs(sync_secs),
            self_signed_tls: flag(&lookup, "EVICTGUARD_SELF_SIGNED_TLS"),
            service_name: lookup("EVICTGUARD_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            namespace: lookup("EVICTGUARD_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        }
    }

    /// Load the node-pool policy using this config's defaults and ConfigMap directory
    pub fn load_policy(&self) -> NodePoolPolicy {
        NodePoolPolicy::load(
            &self.config_map_dir,
            PoolPolicy::default_pool(self.default_threshold, self.default_window),
        )
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key = key, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
        None => default,
    }
}

fn flag<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
