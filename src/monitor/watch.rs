//! Node watch driver
//!
//! Bridges `kube::runtime::watcher` to the tracker. Raw watcher events are
//! folded into typed [`NodeEvent`]s (initial list pages become one
//! `Resynced`) and applied by a single background task. Reconnects and
//! relists are the watcher's job; every relist it reports ends in a fresh
//! `Resynced`.

use crate::monitor::tracker::{NodeEvent, NodeHealthTracker};
use crate::server::ShutdownSignal;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Failed to sync node cache: {0}")]
    CacheSyncFailed(String),
}

/// Folds watcher events into [`NodeEvent`]s
#[derive(Debug, Default)]
pub struct EventTranslator {
    pending: Option<Vec<Node>>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while an initial list is still being paged in
    pub fn translate(&mut self, event: Event<Node>) -> Option<NodeEvent> {
        match event {
            Event::Apply(node) => Some(NodeEvent::Upserted(node)),
            Event::Delete(node) => Some(NodeEvent::Deleted(node)),
            Event::Init => {
                self.pending = Some(Vec::new());
                None
            }
            Event::InitApply(node) => {
                self.pending.get_or_insert_with(Vec::new).push(node);
                None
            }
            Event::InitDone => Some(NodeEvent::Resynced(self.pending.take().unwrap_or_default())),
        }
    }
}

/// Drain a watcher stream into the tracker until shutdown
///
/// `synced` fires once, after the first full list has been applied.
pub async fn run_node_watch<S>(
    stream: S,
    tracker: Arc<NodeHealthTracker>,
    mut shutdown: ShutdownSignal,
    synced: oneshot::Sender<()>,
) where
    S: Stream<Item = Result<Event<Node>, watcher::Error>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut translator = EventTranslator::new();
    let mut synced = Some(synced);

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                info!("Node watch stopping on shutdown");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    let Some(event) = translator.translate(event) else {
                        continue;
                    };
                    let resync = matches!(event, NodeEvent::Resynced(_));
                    tracker.apply(event);

                    if resync {
                        if let Some(tx) = synced.take() {
                            let _ = tx.send(());
                            info!("Node cache synced");
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Node watch error, watcher will retry");
                }
                None => {
                    warn!("Node watch stream ended");
                    break;
                }
            }
        }
    }
}

/// Start watching all nodes and block until the initial list is applied
///
/// Failing to sync within `sync_timeout` is startup-fatal: the caller must
/// not serve decisions from an untrusted view.
pub async fn start_node_watch(
    client: Client,
    tracker: Arc<NodeHealthTracker>,
    shutdown: ShutdownSignal,
    sync_timeout: Duration,
) -> Result<JoinHandle<()>, TrackerError> {
    let nodes: Api<Node> = Api::all(client);
    let stream = watcher(nodes, watcher::Config::default()).default_backoff();

    start_with_stream(stream, tracker, shutdown, sync_timeout).await
}

/// Same as [`start_node_watch`] for an arbitrary event stream
pub async fn start_with_stream<S>(
    stream: S,
    tracker: Arc<NodeHealthTracker>,
    shutdown: ShutdownSignal,
    sync_timeout: Duration,
) -> Result<JoinHandle<()>, TrackerError>
where
    S: Stream<Item = Result<Event<Node>, watcher::Error>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(run_node_watch(stream, tracker, shutdown, tx));

    match tokio::time::timeout(sync_timeout, rx).await {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(_)) => Err(TrackerError::CacheSyncFailed(
            "node watch ended before the initial list was applied".to_string(),
        )),
        Err(_) => {
            handle.abort();
            Err(TrackerError::CacheSyncFailed(format!(
                "initial node list not applied within {}s",
                sync_timeout.as_secs()
            )))
        }
    }
}

#[cfg(test)]
#[path = "watch_test.rs"]
mod tests;
