//! Minimal embedding example for hdsync-core
//!
//! This example uses hdsync-core as a library with a custom adapter and an
//! in-process transport standing in for a pedometer's HTTP API. The
//! application owns every component: credential store, sink, transport.

use async_trait::async_trait;
use hdsync_core::model::{
    CombinationOperation, ConnectInstructions, ConnectOutcome, ConnectParameter,
    ConnectParameters, Credentials, MeasurementSetTemplate, require_parameter, unix_now,
};
use hdsync_core::traits::{
    ConnectContext, Cursor, EndpointPlan, HttpRequest, HttpResponse, HttpSession, Page,
    ProviderAdapter, RawRecord, SyncWindow, Transport,
};
use hdsync_core::{
    EngineConfig, MemoryCredentialStore, MemorySink, Result, SyncEngine,
};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static TEMPLATES: &[MeasurementSetTemplate] = &[MeasurementSetTemplate::new(
    "steps",
    "Steps",
    "Physical Activity",
    "count",
    CombinationOperation::Sum,
)];

#[derive(Deserialize)]
struct StepPage {
    days: Vec<StepDay>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct StepDay {
    timestamp: i64,
    steps: f64,
}

/// Custom adapter for a device that reports daily step counts
struct PedometerAdapter;

#[async_trait]
impl ProviderAdapter for PedometerAdapter {
    fn name(&self) -> &'static str {
        "pedometer"
    }

    fn display_name(&self) -> &'static str {
        "Pedometer"
    }

    fn connect_instructions(&self, _user_id: &str) -> ConnectInstructions {
        ConnectInstructions {
            authorization_url: String::new(),
            parameters: vec![ConnectParameter::text("Device id", "device_id")],
            use_popup: false,
        }
    }

    async fn connect(
        &self,
        _session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome> {
        let device = require_parameter(context.parameters, "device_id")?;
        Ok(ConnectOutcome::Connected(
            Credentials::new().with("device_id", device),
        ))
    }

    fn templates(&self) -> &'static [MeasurementSetTemplate] {
        TEMPLATES
    }

    async fn plan(
        &self,
        _session: &dyn HttpSession,
        credentials: &Credentials,
        _window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>> {
        let request = HttpRequest::get("https://pedometer.local/days")
            .query("device", credentials.require("device_id")?);
        Ok(vec![EndpointPlan::new("steps", request)])
    }

    fn parse_page(
        &self,
        _plan: &EndpointPlan,
        _request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        let page: StepPage = response.json()?;
        let records = page
            .days
            .into_iter()
            .map(|day| RawRecord::new("steps", day.timestamp, day.steps))
            .collect();
        Ok(Page::new(records, page.next.map(Cursor::Url)))
    }
}

/// In-process transport serving two pages of step counts
struct PedometerTransport {
    requests: Arc<AtomicUsize>,
}

struct PedometerSession {
    requests: Arc<AtomicUsize>,
}

impl Transport for PedometerTransport {
    fn session(&self) -> Result<Arc<dyn HttpSession>> {
        Ok(Arc::new(PedometerSession {
            requests: self.requests.clone(),
        }))
    }
}

#[async_trait]
impl HttpSession for PedometerSession {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        println!("[Transport] GET {}", request.url);

        let day = 86_400;
        let today = unix_now() / day * day;
        let body = if request.url.ends_with("page=2") {
            format!(
                r#"{{"days": [{{"timestamp": {}, "steps": 8042}}]}}"#,
                today - 2 * day
            )
        } else {
            format!(
                r#"{{"days": [{{"timestamp": {}, "steps": 10311}}, {{"timestamp": {}, "steps": 6120}}],
                    "next": "https://pedometer.local/days?page=2"}}"#,
                today,
                today - day
            )
        };
        Ok(HttpResponse::new(200, body))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    println!("=== Embedded hdsync-core Example ===\n");

    let requests = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(PedometerTransport {
        requests: requests.clone(),
    });
    let store = Arc::new(MemoryCredentialStore::new());
    let sink = MemorySink::new();

    let config = EngineConfig {
        rate_limit_retries: 0,
        event_channel_capacity: 100,
        ..Default::default()
    };

    println!("1. Creating engine...");
    let (engine, mut event_rx) =
        SyncEngine::new(vec![Box::new(PedometerAdapter)], store, transport, config)?;

    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {:?}", event);
        }
    });

    println!("2. Connecting user 'alice'...");
    let instructions = engine.get_connect_instructions("alice", "pedometer").await?;
    println!("   Asks for: {}", instructions.parameters[0].display_name);

    let mut parameters = ConnectParameters::new();
    parameters.insert("device_id".to_string(), "PD-1138".to_string());
    engine.connect("alice", "pedometer", &parameters).await?;

    println!("3. Syncing into the sink...");
    let (result, report) = engine.sync_and_store("alice", "pedometer", &sink).await?;
    println!(
        "   {} measurement(s) in {} set(s), {} stored, complete: {}",
        result.measurement_count(),
        result.measurement_sets.len(),
        report.count,
        result.is_complete()
    );
    for set in sink.sets("alice").await {
        for m in &set.measurements {
            println!("   {} {} = {}", set.variable_name, m.timestamp(), m.value());
        }
    }

    println!("4. Disconnecting...");
    engine.disconnect("alice", "pedometer").await?;
    let err = engine.update("alice", "pedometer", 0).await.err();
    if let Some(err) = err {
        println!("   Update after disconnect: {:?}", err.to_response());
    }

    drop(engine);
    let _ = event_listener.await;

    println!("\n=== Embedding Successful ===");
    println!("HTTP requests served: {}", requests.load(Ordering::SeqCst));
    println!("Key Points:");
    println!("- The application supplies the adapter, transport, store and sink");
    println!("- user_id is passed on every call, no global state");
    println!("- Disconnected connectors fail without network I/O");

    Ok(())
}
