//! Test doubles and common utilities for sync engine contract tests
//!
//! The doubles count every call so tests can assert on what the engine
//! did NOT do (no request after disconnect, no store on bad input).

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hdsync_core::classifier::Outcome;
use hdsync_core::config::EngineConfig;
use hdsync_core::error::{Error, Result};
use hdsync_core::model::{
    CombinationOperation, ConnectInstructions, ConnectOutcome, ConnectParameter, Credentials,
    MeasurementSetTemplate, require_parameter,
};
use hdsync_core::traits::{
    ConnectContext, CredentialRecord, CredentialStore, Cursor, EndpointPlan, HttpRequest,
    HttpResponse, HttpSession, Page, ProviderAdapter, RawRecord, SyncWindow, Transport,
};
use hdsync_core::MemoryCredentialStore;

/// Recent, valid base timestamp for scripted records
pub const BASE: i64 = 1_600_000_000;

pub const USER: &str = "user-1";

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Step {
    Respond(HttpResponse),
    /// Transport failure without a response
    Fail(String),
    /// Never answers
    Hang,
}

/// Transport replaying scripted replies per URL
///
/// Unscripted URLs answer 404.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    routes: Arc<Mutex<HashMap<String, VecDeque<Step>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    sessions: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `url`
    pub fn script(&self, url: &str, step: Step) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn respond(&self, url: &str, response: HttpResponse) -> &Self {
        self.script(url, Step::Respond(response))
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn session(&self) -> Result<Arc<dyn HttpSession>> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl HttpSession for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.url.clone());
        let step = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(Error::unreachable(message)),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(HttpResponse::new(404, "not scripted")),
        }
    }
}

/// A JSON page of `{t, v}` items with an optional next URL
pub fn page(items: &[(i64, f64)], next: Option<&str>) -> HttpResponse {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|(t, v)| serde_json::json!({ "t": t, "v": v }))
        .collect();
    HttpResponse::new(200, serde_json::json!({ "items": items, "next": next }).to_string())
}

/// A 200 body carrying a provider error the scripted adapter treats as fatal
pub fn fatal_body(message: &str) -> HttpResponse {
    HttpResponse::new(200, serde_json::json!({ "fatal": message }).to_string())
}

pub fn status(code: u16) -> HttpResponse {
    HttpResponse::new(code, "")
}

pub const TEMPLATES: &[MeasurementSetTemplate] = &[
    MeasurementSetTemplate::new("steps", "Steps", "Physical Activity", "count", CombinationOperation::Sum),
    MeasurementSetTemplate::new("weight", "Weight", "Vital Signs", "kg", CombinationOperation::Mean),
    MeasurementSetTemplate::new("mood", "Overall Mood", "Mood", "%", CombinationOperation::Mean),
];

/// How the scripted adapter connects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// username/password; password "wrong" is rejected
    Password,
    /// redirect with a parked request token, then exchange the verifier
    OAuth1,
}

/// Adapter whose endpoints are supplied by the test
///
/// Endpoint keys double as metric keys; every endpoint pages through
/// JSON bodies produced by [`page`]. Bodies built by [`fatal_body`] are
/// reported as fatal provider errors.
pub struct ScriptedAdapter {
    plans: Vec<EndpointPlan>,
    mode: ConnectMode,
    history_window: Option<i64>,
    min_update_interval: Option<i64>,
    plan_calls: Arc<AtomicUsize>,
    windows: Arc<Mutex<Vec<SyncWindow>>>,
}

impl ScriptedAdapter {
    pub fn new(plans: Vec<EndpointPlan>) -> Self {
        Self {
            plans,
            mode: ConnectMode::Password,
            history_window: None,
            min_update_interval: None,
            plan_calls: Arc::new(AtomicUsize::new(0)),
            windows: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// One newest-first endpoint per `(metric, url)`
    pub fn paged(endpoints: &[(&str, &str)]) -> Self {
        Self::new(
            endpoints
                .iter()
                .map(|(metric, url)| EndpointPlan::new(*metric, HttpRequest::get(*url)).newest_first())
                .collect(),
        )
    }

    pub fn with_mode(mut self, mode: ConnectMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_history_window(mut self, secs: i64) -> Self {
        self.history_window = Some(secs);
        self
    }

    pub fn with_min_update_interval(mut self, secs: i64) -> Self {
        self.min_update_interval = Some(secs);
        self
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    /// Windows passed to `plan`, in call order
    pub fn windows(&self) -> Vec<SyncWindow> {
        self.windows.lock().unwrap().clone()
    }

    /// A second adapter sharing this one's counters
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            plans: other.plans.clone(),
            mode: other.mode,
            history_window: other.history_window,
            min_update_interval: other.min_update_interval,
            plan_calls: Arc::clone(&other.plan_calls),
            windows: Arc::clone(&other.windows),
        }
    }
}

#[derive(serde::Deserialize)]
struct PageBody {
    items: Vec<Item>,
    next: Option<String>,
}

#[derive(serde::Deserialize)]
struct Item {
    t: i64,
    v: f64,
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn display_name(&self) -> &'static str {
        "Scripted"
    }

    fn connect_instructions(&self, _user_id: &str) -> ConnectInstructions {
        ConnectInstructions {
            authorization_url: "http://localhost:8080/connectors/scripted/connect".to_string(),
            parameters: vec![
                ConnectParameter::text("Username", "username"),
                ConnectParameter::password("Password", "password"),
            ],
            use_popup: false,
        }
    }

    async fn connect(&self, _session: &dyn HttpSession, context: ConnectContext<'_>) -> Result<ConnectOutcome> {
        match self.mode {
            ConnectMode::Password => {
                let username = require_parameter(context.parameters, "username")?;
                let password = require_parameter(context.parameters, "password")?;
                if password == "wrong" {
                    return Err(Error::auth_rejected("invalid username or password"));
                }
                Ok(ConnectOutcome::Connected(
                    Credentials::new().with("username", username).with("password", password),
                ))
            }
            ConnectMode::OAuth1 => match context.parameters.get("oauth_verifier") {
                None => Ok(ConnectOutcome::Redirect {
                    url: "https://provider.test/authorize?oauth_token=request-token".to_string(),
                    pending: Some(
                        Credentials::new()
                            .with("token", "request-token")
                            .with("token_secret", "request-secret"),
                    ),
                }),
                Some(verifier) => {
                    let pending = context
                        .pending
                        .ok_or_else(|| Error::auth_rejected("no pending request token"))?;
                    Ok(ConnectOutcome::Connected(
                        Credentials::new()
                            .with("token", format!("access-for-{}", pending.require("token")?))
                            .with("verifier", verifier.as_str()),
                    ))
                }
            },
        }
    }

    fn templates(&self) -> &'static [MeasurementSetTemplate] {
        TEMPLATES
    }

    fn history_window(&self) -> Option<i64> {
        self.history_window
    }

    fn min_update_interval(&self) -> Option<i64> {
        self.min_update_interval
    }

    fn inspect_body(&self, response: &HttpResponse) -> Option<Outcome> {
        let body: serde_json::Value = serde_json::from_str(&response.body).ok()?;
        body.get("fatal")
            .and_then(serde_json::Value::as_str)
            .map(|message| Outcome::Fatal(message.to_string()))
    }

    async fn plan(&self, _session: &dyn HttpSession, _credentials: &Credentials, window: SyncWindow) -> Result<Vec<EndpointPlan>> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(window);
        Ok(self.plans.clone())
    }

    fn parse_page(&self, plan: &EndpointPlan, _request: &HttpRequest, response: &HttpResponse) -> Result<Page> {
        let body: PageBody = response.json()?;
        let records = body
            .items
            .into_iter()
            .map(|item| RawRecord::new(plan.key.clone(), item.t, item.v))
            .collect();
        Ok(Page::new(records, body.next.map(Cursor::Url)))
    }
}

/// Credential store counting calls, backed by memory
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: MemoryCredentialStore,
    store_calls: Arc<AtomicUsize>,
    remove_calls: Arc<AtomicUsize>,
    flush_calls: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn get_record(&self, user_id: &str, connector: &str) -> Result<Option<CredentialRecord>> {
        self.inner.get_record(user_id, connector).await
    }

    async fn store(&self, user_id: &str, connector: &str, credentials: Credentials) -> Result<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.store(user_id, connector, credentials).await
    }

    async fn remove(&self, user_id: &str, connector: &str) -> Result<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(user_id, connector).await
    }

    async fn set_last_sync(&self, user_id: &str, connector: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.set_last_sync(user_id, connector, at).await
    }

    async fn set_blocked(&self, user_id: &str, connector: &str, reason: Option<String>) -> Result<()> {
        self.inner.set_blocked(user_id, connector, reason).await
    }

    async fn list(&self) -> Result<Vec<(String, String)>> {
        self.inner.list().await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

/// Engine settings with a negligible backoff
pub fn minimal_config() -> EngineConfig {
    EngineConfig {
        rate_limit_retries: 3,
        rate_limit_backoff_ms: 1,
        max_pages_per_endpoint: 50,
        endpoint_concurrency: 2,
        sync_timeout_secs: 10,
        event_channel_capacity: 100,
    }
}

/// A store already holding credentials for `USER`/scripted
pub async fn connected_store() -> CountingStore {
    let store = CountingStore::new();
    store
        .inner
        .store(USER, "scripted", Credentials::new().with("token", "t"))
        .await
        .unwrap();
    store
}
