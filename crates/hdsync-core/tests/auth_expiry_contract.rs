//! Contract Test: Auth Expiry Voids the Connection
//!
//! Constraints verified:
//! - A 401/403 purges the credentials and reports the connector disconnected
//! - The next update fails with NotConnected without any network request
//! - Endpoints not yet started are skipped once the connection is void
//! - Endpoints completed before the expiry keep their sets
//! - Records of the expired endpoint are discarded
//! - A stale 401 never purges credentials stored by a reconnect meanwhile

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use hdsync_core::config::EngineConfig;
use hdsync_core::error::Result;
use hdsync_core::model::{ConnectorState, Credentials};
use hdsync_core::traits::{CredentialStore, HttpRequest, HttpResponse, HttpSession, Transport};
use hdsync_core::{EngineEvent, ErrorKind, SyncEngine};

const STEPS: &str = "https://provider.test/steps";
const WEIGHT: &str = "https://provider.test/weight";
const MOOD: &str = "https://provider.test/mood";

fn sequential() -> EngineConfig {
    EngineConfig {
        endpoint_concurrency: 1,
        ..minimal_config()
    }
}

#[tokio::test]
async fn unauthorized_disconnects_and_next_update_is_offline() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, status(401));
    let store = connected_store().await;

    let (engine, mut events) = SyncEngine::new(
        vec![Box::new(ScriptedAdapter::paged(&[("steps", STEPS)]))],
        Arc::new(store.clone()),
        Arc::new(transport.clone()),
        minimal_config(),
    )
    .unwrap();

    let result = engine.update(USER, "scripted", BASE).await.unwrap();
    assert!(result.disconnected);
    assert_eq!(result.partial_errors[0].kind, ErrorKind::AuthExpired);
    assert_eq!(
        engine.connector_state(USER, "scripted").await.unwrap(),
        ConnectorState::Disconnected
    );
    assert!(!store.has_credentials(USER, "scripted").await.unwrap());

    let requests_before = transport.request_count();
    let err = engine.update(USER, "scripted", BASE).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    assert_eq!(transport.request_count(), requests_before, "No request after disconnect");

    let mut saw_disconnect = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, EngineEvent::ConnectorDisconnected { .. }) {
            saw_disconnect = true;
        }
    }
    assert!(saw_disconnect, "A disconnect event must be emitted");
}

#[tokio::test]
async fn forbidden_mid_pagination_discards_endpoint_records() {
    let transport = ScriptedTransport::new();
    let page_2 = "https://provider.test/steps?page=2";
    transport.respond(STEPS, page(&[(BASE + 100, 5.0)], Some(page_2)));
    transport.respond(page_2, status(403));

    let (engine, _events) = SyncEngine::new(
        vec![Box::new(ScriptedAdapter::paged(&[("steps", STEPS)]))],
        Arc::new(connected_store().await),
        Arc::new(transport.clone()),
        minimal_config(),
    )
    .unwrap();

    let result = engine.update(USER, "scripted", BASE).await.unwrap();
    assert!(result.disconnected);
    assert_eq!(result.measurement_count(), 0, "Expired endpoint records are discarded");
}

#[tokio::test]
async fn remaining_endpoints_are_skipped() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, status(401));
    transport.respond(WEIGHT, page(&[(BASE + 100, 80.0)], None));
    transport.respond(MOOD, page(&[(BASE + 100, 60.0)], None));

    let adapter = ScriptedAdapter::paged(&[("steps", STEPS), ("weight", WEIGHT), ("mood", MOOD)]);
    let (engine, _events) = SyncEngine::new(
        vec![Box::new(adapter)],
        Arc::new(connected_store().await),
        Arc::new(transport.clone()),
        sequential(),
    )
    .unwrap();

    let result = engine.update(USER, "scripted", BASE).await.unwrap();

    assert_eq!(transport.requests(), vec![STEPS], "Only the expiring endpoint was requested");
    assert!(result.measurement_sets.is_empty());
    let kinds: Vec<ErrorKind> = result.partial_errors.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::AuthExpired, ErrorKind::NotConnected, ErrorKind::NotConnected]
    );
}

#[tokio::test]
async fn completed_endpoints_keep_their_sets() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, page(&[(BASE + 100, 5.0)], None));
    transport.respond(WEIGHT, status(401));

    let adapter = ScriptedAdapter::paged(&[("steps", STEPS), ("weight", WEIGHT)]);
    let (engine, _events) = SyncEngine::new(
        vec![Box::new(adapter)],
        Arc::new(connected_store().await),
        Arc::new(transport.clone()),
        sequential(),
    )
    .unwrap();

    let result = engine.update(USER, "scripted", BASE).await.unwrap();
    assert!(result.disconnected);
    assert_eq!(result.measurement_sets.len(), 1);
    assert_eq!(result.measurement_sets[0].variable_name, "Steps");
}

#[tokio::test]
async fn transient_failures_never_disconnect() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, status(500));
    transport.script(WEIGHT, Step::Fail("connection reset".to_string()));
    let store = connected_store().await;

    let adapter = ScriptedAdapter::paged(&[("steps", STEPS), ("weight", WEIGHT)]);
    let (engine, _events) = SyncEngine::new(
        vec![Box::new(adapter)],
        Arc::new(store.clone()),
        Arc::new(transport.clone()),
        minimal_config(),
    )
    .unwrap();

    let result = engine.update(USER, "scripted", BASE).await.unwrap();
    assert!(!result.disconnected);
    assert!(result.partial_errors.iter().all(|e| e.kind == ErrorKind::Transient));
    assert_eq!(store.remove_calls(), 0);
    assert!(store.has_credentials(USER, "scripted").await.unwrap());
}

/// Session that reconnects the user while its own request is in flight
#[derive(Clone)]
struct ReconnectDuringRequest {
    store: CountingStore,
}

impl Transport for ReconnectDuringRequest {
    fn session(&self) -> Result<Arc<dyn HttpSession>> {
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl HttpSession for ReconnectDuringRequest {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
        self.store
            .store(USER, "scripted", Credentials::new().with("token", "fresh"))
            .await?;
        Ok(status(401))
    }
}

#[tokio::test]
async fn stale_unauthorized_keeps_reconnected_credentials() {
    let store = connected_store().await;
    let (engine, mut events) = SyncEngine::new(
        vec![Box::new(ScriptedAdapter::paged(&[("steps", STEPS)]))],
        Arc::new(store.clone()),
        Arc::new(ReconnectDuringRequest { store: store.clone() }),
        minimal_config(),
    )
    .unwrap();

    let result = engine.update(USER, "scripted", BASE).await.unwrap();

    assert_eq!(result.partial_errors[0].kind, ErrorKind::AuthExpired);
    assert!(!result.disconnected, "The connector was reconnected meanwhile");
    assert_eq!(store.remove_calls(), 0);
    assert_eq!(
        store.get(USER, "scripted").await.unwrap(),
        Some(Credentials::new().with("token", "fresh"))
    );
    assert_eq!(
        engine.connector_state(USER, "scripted").await.unwrap(),
        ConnectorState::Connected
    );
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, EngineEvent::ConnectorDisconnected { .. }),
            "No disconnect for replaced credentials"
        );
    }
}
