//! Contract Test: Fatal Provider Errors Block the Connector
//!
//! Constraints verified:
//! - A fatal endpoint is fetched once and not again on later rounds
//! - Blocked pairs are reported as failed on every round
//! - Updating a blocked connector fails with Blocked and issues no request
//! - Sibling endpoints of the fatal one keep their measurements
//! - Clearing the block, or reconnecting, resumes syncing

mod common;

use std::sync::Arc;

use common::*;
use hdsync_core::config::SchedulerConfig;
use hdsync_core::model::{ConnectParameters, ConnectResult, unix_now};
use hdsync_core::traits::CredentialStore;
use hdsync_core::{EngineEvent, ErrorKind, MemorySink, SyncEngine, SyncScheduler};

const STEPS: &str = "https://provider.test/steps";
const WEIGHT: &str = "https://provider.test/weight";

fn hourly() -> SchedulerConfig {
    SchedulerConfig {
        sync_interval_secs: 3600,
        connector_concurrency: 2,
    }
}

#[tokio::test]
async fn fatal_endpoint_is_not_refetched_across_rounds() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, fatal_body("bad userid"));
    transport.respond(STEPS, page(&[(unix_now() - 60, 5.0)], None));

    let (engine, _events) = SyncEngine::new(
        vec![Box::new(ScriptedAdapter::paged(&[("steps", STEPS)]))],
        Arc::new(connected_store().await),
        Arc::new(transport.clone()),
        minimal_config(),
    )
    .unwrap();
    let engine = Arc::new(engine);
    let sink = Arc::new(MemorySink::new());
    let scheduler = SyncScheduler::new(engine.clone(), sink.clone(), &hourly()).unwrap();

    let first = scheduler.run_round().await;
    assert_eq!((first.synced, first.failed), (0, 1));

    let second = scheduler.run_round().await;
    assert_eq!((second.synced, second.failed), (0, 1), "A blocked pair keeps failing");
    assert_eq!(transport.requests_to(STEPS), 1, "No request while blocked");

    engine.clear_fatal(USER, "scripted").await.unwrap();
    let third = scheduler.run_round().await;
    assert_eq!((third.synced, third.failed), (1, 0));
    assert_eq!(transport.requests_to(STEPS), 2);
    assert_eq!(sink.count(USER).await, 1);
}

#[tokio::test]
async fn blocked_update_fails_offline_and_siblings_survive() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, fatal_body("invalid userid"));
    transport.respond(WEIGHT, page(&[(BASE + 10, 70.5)], None));
    let store = connected_store().await;

    let (engine, mut events) = SyncEngine::new(
        vec![Box::new(ScriptedAdapter::paged(&[("steps", STEPS), ("weight", WEIGHT)]))],
        Arc::new(store.clone()),
        Arc::new(transport.clone()),
        minimal_config(),
    )
    .unwrap();

    let result = engine.update(USER, "scripted", BASE).await.unwrap();
    assert!(result.blocked);
    assert!(!result.disconnected);
    assert!(!result.is_complete());
    assert_eq!(result.partial_errors.len(), 1);
    assert_eq!(result.partial_errors[0].endpoint, "steps");
    assert_eq!(result.partial_errors[0].kind, ErrorKind::Fatal);

    let weight = result
        .measurement_sets
        .iter()
        .find(|set| set.variable_name == "Weight")
        .expect("weight set");
    assert_eq!(weight.measurements.len(), 1);
    assert!(store.has_credentials(USER, "scripted").await.unwrap(), "Fatal errors keep credentials");

    let requests_before = transport.request_count();
    let err = engine.update(USER, "scripted", BASE).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Blocked);
    assert!(err.to_string().contains("invalid userid"));
    assert_eq!(err.to_response().code, 409);
    assert_eq!(transport.request_count(), requests_before);

    let mut saw_block = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, EngineEvent::ConnectorBlocked { .. }) {
            saw_block = true;
        }
    }
    assert!(saw_block, "A block event must be emitted");
}

#[tokio::test]
async fn reconnect_clears_block() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, fatal_body("bad userid"));
    transport.respond(STEPS, page(&[], None));

    let (engine, _events) = SyncEngine::new(
        vec![Box::new(ScriptedAdapter::paged(&[("steps", STEPS)]))],
        Arc::new(connected_store().await),
        Arc::new(transport.clone()),
        minimal_config(),
    )
    .unwrap();

    assert!(engine.update(USER, "scripted", BASE).await.unwrap().blocked);

    let parameters: ConnectParameters = [("username", "ada"), ("password", "secret")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let connected = engine.connect(USER, "scripted", &parameters).await.unwrap();
    assert_eq!(connected, ConnectResult::Connected);

    let result = engine.update(USER, "scripted", BASE).await.unwrap();
    assert!(!result.blocked);
    assert!(result.is_complete());
    assert_eq!(transport.requests_to(STEPS), 2);
}

#[tokio::test]
async fn clear_fatal_requires_credentials() {
    let (engine, _events) = SyncEngine::new(
        vec![Box::new(ScriptedAdapter::paged(&[("steps", STEPS)]))],
        Arc::new(CountingStore::new()),
        Arc::new(ScriptedTransport::new()),
        minimal_config(),
    )
    .unwrap();

    let err = engine.clear_fatal(USER, "scripted").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    let err = engine.clear_fatal(USER, "unknown").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownConnector);
}
