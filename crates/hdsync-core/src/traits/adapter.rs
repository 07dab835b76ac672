// # Provider Adapter Trait
//
// Defines the contract every provider integration implements.
//
// ## Responsibilities
//
// An adapter knows its provider: URLs, authorization scheme, paging
// convention and payload format. It does NOT own:
// - retries or backoff (owned by the fetch loop)
// - credential persistence (owned by the credential manager)
// - scheduling, cancellation or concurrency (owned by `SyncEngine`)
//
// ## Update flow
//
// 1. `plan()` returns one [`EndpointPlan`] per logical endpoint
// 2. The fetch loop sends each plan's request through the session
// 3. `parse_page()` turns every successful response into a [`Page`]
// 4. The engine groups records by metric into measurement sets using
//    `templates()`

use async_trait::async_trait;

use crate::classifier::{Outcome, ResponseClassifier};
use crate::config::ConnectorConfig;
use crate::error::Result;
use crate::model::{
    ConnectInstructions, ConnectOutcome, ConnectParameters, Credentials, MeasurementSetTemplate,
};
use crate::traits::transport::{HttpRequest, HttpResponse, HttpSession};

/// Ordering of records within and across the pages of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrder {
    /// Newest first: the first record older than `from_time` ends paging
    NewestFirst,
    /// No ordering guarantee: older records are dropped, paging continues
    #[default]
    Unordered,
}

/// One logical endpoint to fetch during an update
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointPlan {
    /// Endpoint identifier used in logs and partial errors
    pub key: String,
    /// Metric keys this endpoint feeds
    pub metrics: Vec<String>,
    /// First page request
    pub request: HttpRequest,
    pub order: RecordOrder,
    /// Keep only the first of consecutive equal values per metric
    pub dedup: bool,
    /// Endpoint-specific page cap, tighter than the engine's
    pub max_pages: Option<usize>,
}

impl EndpointPlan {
    /// A plan feeding a single metric named like the endpoint
    pub fn new(key: impl Into<String>, request: HttpRequest) -> Self {
        let key = key.into();
        Self {
            metrics: vec![key.clone()],
            key,
            request,
            order: RecordOrder::Unordered,
            dedup: false,
            max_pages: None,
        }
    }

    pub fn metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.order = RecordOrder::NewestFirst;
        self
    }

    pub fn dedup(mut self) -> Self {
        self.dedup = true;
        self
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.max_pages = Some(pages);
        self
    }
}

/// A provider record before validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub metric: String,
    pub timestamp: i64,
    pub value: f64,
    pub duration: Option<f64>,
}

impl RawRecord {
    pub fn new(metric: impl Into<String>, timestamp: i64, value: f64) -> Self {
        Self {
            metric: metric.into(),
            timestamp,
            value,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Opaque pointer to the next page
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    /// Absolute URL fetched with the plan's headers and authorization
    Url(String),
    /// Fully specified request
    Request(HttpRequest),
}

/// One parsed page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub next: Option<Cursor>,
}

impl Page {
    pub fn new(records: Vec<RawRecord>, next: Option<Cursor>) -> Self {
        Self { records, next }
    }

    /// A page with no successor
    pub fn last(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            next: None,
        }
    }
}

/// Time bounds of one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    /// Lower bound after history clamping
    pub from_time: i64,
    pub now: i64,
}

/// Input to an adapter's `connect`
#[derive(Debug, Clone, Copy)]
pub struct ConnectContext<'a> {
    pub user_id: &'a str,
    pub parameters: &'a ConnectParameters,
    /// Credentials parked by an earlier `Redirect` (e.g. an OAuth1 request token)
    pub pending: Option<&'a Credentials>,
}

/// Trait for provider adapter implementations
///
/// # Thread Safety
///
/// Adapters are shared across concurrent updates and must hold no
/// per-user mutable state; everything user-specific arrives through
/// arguments.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Connector identifier (e.g. "fitbit")
    fn name(&self) -> &'static str;

    /// Human-readable provider name, used as the measurement source
    fn display_name(&self) -> &'static str;

    /// Instructions for starting a connection
    ///
    /// Must not perform network I/O.
    fn connect_instructions(&self, user_id: &str) -> ConnectInstructions;

    /// Run one step of the connection exchange
    ///
    /// # Returns
    ///
    /// - `Ok(ConnectOutcome::Connected)`: the minimal credential bag to store
    /// - `Ok(ConnectOutcome::Redirect)`: the user must visit a URL first
    /// - `Err(Error::MissingParameter)`: required fields absent
    /// - `Err(Error::AuthRejected)`: the provider refused the exchange
    /// - `Err(Error::ProviderUnreachable)`: transport failure
    async fn connect(
        &self,
        session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome>;

    /// Static metric table
    fn templates(&self) -> &'static [MeasurementSetTemplate];

    /// Template for a metric key
    fn template(&self, metric: &str) -> Option<&'static MeasurementSetTemplate> {
        self.templates().iter().find(|t| t.key == metric)
    }

    /// Maximum history fetched when `from_time == 0`, in seconds
    ///
    /// `None` fetches the full history.
    fn history_window(&self) -> Option<i64> {
        None
    }

    /// Minimum time between two syncs, in seconds
    fn min_update_interval(&self) -> Option<i64> {
        None
    }

    /// Status table for this provider
    fn classifier(&self) -> ResponseClassifier {
        ResponseClassifier::standard()
    }

    /// Recognize a status embedded in the payload
    fn inspect_body(&self, _response: &HttpResponse) -> Option<Outcome> {
        None
    }

    /// Plan the endpoints of one update
    ///
    /// May use the session for discovery requests (listing repositories,
    /// logging in). Errors abort the whole update.
    async fn plan(
        &self,
        session: &dyn HttpSession,
        credentials: &Credentials,
        window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>>;

    /// Parse a successful response
    ///
    /// # Parameters
    ///
    /// - `plan`: the endpoint being fetched
    /// - `request`: the request that produced `response`
    /// - `response`: a response classified as `Success`
    ///
    /// # Returns
    ///
    /// Parse failures must be `Error::Transient`.
    fn parse_page(
        &self,
        plan: &EndpointPlan,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page>;
}

/// Helper trait for constructing adapters from configuration
pub trait AdapterFactory: Send + Sync {
    /// Create an adapter instance from configuration
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>>;
}
