//! Contract Test: Engine-Owned Rate-Limit Retries
//!
//! Constraints verified:
//! - 409/429 retries the same page a bounded number of times
//! - Exceeding the bound aborts the endpoint but keeps its earlier pages
//! - Retry budgets can be disabled via configuration
//! - A failing endpoint never aborts its siblings

mod common;

use std::sync::Arc;

use common::*;
use hdsync_core::config::EngineConfig;
use hdsync_core::{ErrorKind, SyncEngine};

const STEPS: &str = "https://provider.test/steps";
const STEPS_2: &str = "https://provider.test/steps?page=2";
const WEIGHT: &str = "https://provider.test/weight";

async fn engine(adapter: ScriptedAdapter, transport: &ScriptedTransport, config: EngineConfig) -> SyncEngine {
    let (engine, _events) = SyncEngine::new(
        vec![Box::new(adapter)],
        Arc::new(connected_store().await),
        Arc::new(transport.clone()),
        config,
    )
    .expect("engine construction succeeds");
    engine
}

#[tokio::test]
async fn three_rate_limits_then_success() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, status(429));
    transport.respond(STEPS, status(409));
    transport.respond(STEPS, status(429));
    transport.respond(STEPS, page(&[(BASE + 100, 5.0)], None));

    let engine = engine(ScriptedAdapter::paged(&[("steps", STEPS)]), &transport, minimal_config()).await;
    let result = engine.update(USER, "scripted", BASE).await.unwrap();

    assert_eq!(transport.requests_to(STEPS), 4, "Exactly 3 retries after the first attempt");
    assert!(result.partial_errors.is_empty());
    assert_eq!(result.measurement_count(), 1);
}

#[tokio::test]
async fn fourth_rate_limit_aborts_keeping_prior_pages() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, page(&[(BASE + 100, 5.0)], Some(STEPS_2)));
    for _ in 0..4 {
        transport.respond(STEPS_2, status(429));
    }
    transport.respond(STEPS_2, page(&[(BASE + 50, 1.0)], None));

    let engine = engine(ScriptedAdapter::paged(&[("steps", STEPS)]), &transport, minimal_config()).await;
    let result = engine.update(USER, "scripted", BASE).await.unwrap();

    assert_eq!(transport.requests_to(STEPS_2), 4);
    assert_eq!(result.partial_errors.len(), 1);
    assert_eq!(result.partial_errors[0].kind, ErrorKind::RateLimited);
    assert_eq!(result.partial_errors[0].to_response().code, 429);
    assert_eq!(result.measurement_count(), 1, "Page 1 survives the abort");
    assert!(!result.disconnected);
}

#[tokio::test]
async fn retries_can_be_disabled_via_config() {
    let transport = ScriptedTransport::new();
    transport.respond(STEPS, status(429));
    transport.respond(STEPS, page(&[(BASE + 100, 5.0)], None));

    let config = EngineConfig {
        rate_limit_retries: 0,
        ..minimal_config()
    };
    let engine = engine(ScriptedAdapter::paged(&[("steps", STEPS)]), &transport, config).await;
    let result = engine.update(USER, "scripted", BASE).await.unwrap();

    assert_eq!(transport.requests_to(STEPS), 1);
    assert_eq!(result.partial_errors[0].kind, ErrorKind::RateLimited);
}

#[tokio::test]
async fn failing_endpoint_does_not_abort_siblings() {
    let transport = ScriptedTransport::new();
    for _ in 0..4 {
        transport.respond(STEPS, status(429));
    }
    transport.respond(WEIGHT, page(&[(BASE + 100, 80.0)], None));

    let adapter = ScriptedAdapter::paged(&[("steps", STEPS), ("weight", WEIGHT)]);
    let engine = engine(adapter, &transport, minimal_config()).await;
    let result = engine.update(USER, "scripted", BASE).await.unwrap();

    assert_eq!(result.partial_errors.len(), 1);
    assert_eq!(result.partial_errors[0].endpoint, "steps");
    let weight = result
        .measurement_sets
        .iter()
        .find(|s| s.variable_name == "Weight")
        .expect("weight set present");
    assert_eq!(weight.len(), 1);
}
