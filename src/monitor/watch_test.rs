//! Tests for the node watch driver

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::config::{NodePoolPolicy, PoolPolicy};
use crate::monitor::clock::SystemClock;
use crate::monitor::interception::InterceptionOverride;
use crate::server::shutdown_channel;
use chrono::Utc;
use futures::stream;
use serde_json::json;

type WatchItem = Result<Event<Node>, watcher::Error>;

fn node(name: &str, ready: &str) -> Node {
    serde_json::from_value(json!({
        "metadata": {"name": name},
        "status": {"conditions": [
            {"type": "Ready", "status": ready, "lastTransitionTime": Utc::now().to_rfc3339()}
        ]}
    }))
    .unwrap()
}

fn tracker() -> Arc<NodeHealthTracker> {
    Arc::new(NodeHealthTracker::new(
        NodePoolPolicy::new(
            Vec::new(),
            PoolPolicy::default_pool(3, Duration::from_secs(300)),
        ),
        Arc::new(InterceptionOverride::new(true)),
        Arc::new(SystemClock),
        None,
    ))
}

fn initial_list(nodes: Vec<Node>) -> Vec<WatchItem> {
    let mut events = vec![Ok(Event::Init)];
    events.extend(nodes.into_iter().map(|n| Ok(Event::InitApply(n))));
    events.push(Ok(Event::InitDone));
    events
}

#[test]
fn test_translator_folds_initial_list() {
    let mut translator = EventTranslator::new();

    assert!(translator.translate(Event::Init).is_none());
    assert!(translator.translate(Event::InitApply(node("a", "False"))).is_none());
    assert!(translator.translate(Event::InitApply(node("b", "True"))).is_none());

    match translator.translate(Event::InitDone) {
        Some(NodeEvent::Resynced(nodes)) => assert_eq!(nodes.len(), 2),
        other => panic!("expected Resynced, got {:?}", other),
    }
}

#[test]
fn test_translator_passes_through_changes() {
    let mut translator = EventTranslator::new();

    assert!(matches!(
        translator.translate(Event::Apply(node("a", "False"))),
        Some(NodeEvent::Upserted(_))
    ));
    assert!(matches!(
        translator.translate(Event::Delete(node("a", "False"))),
        Some(NodeEvent::Deleted(_))
    ));
}

#[test]
fn test_translator_empty_relist() {
    let mut translator = EventTranslator::new();

    match translator.translate(Event::InitDone) {
        Some(NodeEvent::Resynced(nodes)) => assert!(nodes.is_empty()),
        other => panic!("expected empty Resynced, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_returns_after_initial_list_applied() {
    let tracker = tracker();
    let (_controller, signal) = shutdown_channel();
    let events = initial_list(vec![node("a", "False"), node("b", "True")]);
    let stream = stream::iter(events).chain(stream::pending());

    let handle = start_with_stream(stream, tracker.clone(), signal, Duration::from_secs(1))
        .await
        .expect("initial sync should succeed");

    assert_eq!(tracker.not_ready_nodes(), vec!["a".to_string()]);
    handle.abort();
}

#[tokio::test]
async fn test_start_fails_when_stream_ends_before_sync() {
    let (_controller, signal) = shutdown_channel();
    let events: Vec<WatchItem> = vec![Ok(Event::Init), Ok(Event::InitApply(node("a", "False")))];

    let result = start_with_stream(
        stream::iter(events),
        tracker(),
        signal,
        Duration::from_secs(1),
    )
    .await;

    assert!(matches!(result, Err(TrackerError::CacheSyncFailed(_))));
}

#[tokio::test]
async fn test_start_times_out_without_initial_list() {
    let (_controller, signal) = shutdown_channel();

    let result = start_with_stream(
        stream::pending::<WatchItem>(),
        tracker(),
        signal,
        Duration::from_millis(50),
    )
    .await;

    let err = result.expect_err("sync should time out");
    assert!(err.to_string().contains("Failed to sync node cache"));
}

#[tokio::test]
async fn test_events_after_sync_are_applied_in_order() {
    let tracker = tracker();
    let (_controller, signal) = shutdown_channel();
    let (tx, rx) = futures::channel::mpsc::unbounded::<WatchItem>();

    for event in initial_list(vec![]) {
        tx.unbounded_send(event).unwrap();
    }
    let handle = start_with_stream(rx, tracker.clone(), signal, Duration::from_secs(1))
        .await
        .unwrap();

    tx.unbounded_send(Ok(Event::Apply(node("x", "False")))).unwrap();
    tx.unbounded_send(Ok(Event::Apply(node("y", "Unknown")))).unwrap();
    tx.unbounded_send(Ok(Event::Apply(node("x", "True")))).unwrap();
    drop(tx);

    // Stream end terminates the loop once everything is drained
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("watch loop should finish")
        .unwrap();

    assert_eq!(tracker.not_ready_nodes(), vec!["y".to_string()]);
}

#[tokio::test]
async fn test_relist_replaces_state() {
    let tracker = tracker();
    let (_controller, signal) = shutdown_channel();
    let mut events = initial_list(vec![node("a", "False"), node("b", "False")]);
    events.extend(initial_list(vec![node("b", "False"), node("c", "False")]));

    let handle = start_with_stream(stream::iter(events), tracker.clone(), signal, Duration::from_secs(1))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        tracker.not_ready_nodes(),
        vec!["b".to_string(), "c".to_string()]
    );
}

#[tokio::test]
async fn test_shutdown_stops_watch_loop() {
    let (controller, signal) = shutdown_channel();
    let stream = stream::iter(initial_list(vec![])).chain(stream::pending());

    let handle = start_with_stream(stream, tracker(), signal, Duration::from_secs(1))
        .await
        .unwrap();

    controller.shutdown();

    let finished = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(finished.is_ok(), "watch loop should exit on shutdown");
}
