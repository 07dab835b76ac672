//! Sync orchestrator
//!
//! The SyncEngine is responsible for:
//! - Driving the connect exchange and storing the resulting credentials
//! - Refusing updates for connectors without credentials
//! - Clamping the history window of initial syncs
//! - Running one fetch loop per endpoint on a bounded worker pool
//! - Purging credentials the provider has revoked
//! - Blocking connectors after a fatal provider error
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────┐
//!   update() ────▶ │    SyncEngine    │ ───▶ EngineEvent (mpsc)
//!                  └──────────────────┘
//!                     │      │      │
//!          ┌──────────┘      │      └───────────┐
//!          ▼                 ▼                  ▼
//! ┌─────────────────┐ ┌──────────────┐ ┌─────────────────┐
//! │CredentialManager│ │ProviderAdapter│ │ FetchLoop × N   │
//! │ (per-key lock)  │ │   (plan)     │ │ (worker pool)   │
//! └─────────────────┘ └──────────────┘ └─────────────────┘
//! ```
//!
//! ## Update Flow
//!
//! 1. Load the credential record; none means `NotConnected`, a block
//!    means `Blocked`, both without I/O
//! 2. Reject the update if the adapter's minimum interval has not passed
//! 3. Clamp `from_time == 0` to the adapter's history window
//! 4. Open a fresh session and let the adapter plan its endpoints
//! 5. Fetch endpoints concurrently (bounded); an expired token skips the
//!    endpoints not yet started and purges the credentials
//! 6. Group records by metric into measurement sets
//! 7. Purge revoked credentials, or block the connector on a fatal error.
//!    Both only apply if the stored credentials are still the ones the
//!    update started with

pub mod scheduler;

pub use scheduler::SyncScheduler;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cancel::{CancelReason, CancelSignal};
use crate::config::EngineConfig;
use crate::credentials::CredentialManager;
use crate::error::{Error, ErrorKind, ErrorResponse, Result};
use crate::fetch::{EndpointReport, FetchLoop, FetchPolicy, Termination};
use crate::model::{
    ConnectInstructions, ConnectOutcome, ConnectParameters, ConnectResult, ConnectorState,
    Credentials, Measurement, MeasurementSet, unix_now,
};
use crate::traits::{
    ConnectContext, CredentialStore, EndpointPlan, MeasurementSink, ProviderAdapter, RawRecord,
    StoreReport, SyncWindow, Transport,
};

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Credentials stored after a successful connect
    Connected { user_id: String, connector: String },

    /// Credentials purged
    ConnectorDisconnected {
        user_id: String,
        connector: String,
        reason: String,
    },

    /// Endpoints planned, fetching begins
    SyncStarted {
        user_id: String,
        connector: String,
        from_time: i64,
        endpoints: usize,
    },

    /// One endpoint stopped paging
    EndpointFinished {
        user_id: String,
        connector: String,
        endpoint: String,
        records: usize,
        termination: String,
    },

    /// Update returned a result
    SyncFinished {
        user_id: String,
        connector: String,
        measurements: usize,
        partial_errors: usize,
    },

    /// A fatal provider error blocked further syncs
    ConnectorBlocked {
        user_id: String,
        connector: String,
        reason: String,
    },

    /// Update failed before any endpoint ran
    SyncFailed {
        user_id: String,
        connector: String,
        error: String,
    },
}

/// An endpoint that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialError {
    pub endpoint: String,
    pub kind: ErrorKind,
    pub detail: String,
}

impl PartialError {
    fn new(endpoint: &str, error: &Error) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            kind: error.kind(),
            detail: error.to_string(),
        }
    }

    /// Caller-facing `{code, title, detail}`
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.kind, self.detail.clone())
    }
}

/// Aggregate result of one update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    pub measurement_sets: Vec<MeasurementSet>,
    pub partial_errors: Vec<PartialError>,
    /// The provider revoked the credentials; the connector is now disconnected
    pub disconnected: bool,
    /// A fatal provider error blocked the connector until `clear_fatal`
    pub blocked: bool,
    /// Set when cancellation or the global timeout cut the update short
    pub interrupted: Option<CancelReason>,
}

impl SyncResult {
    /// Total measurements across all sets
    pub fn measurement_count(&self) -> usize {
        self.measurement_sets.iter().map(MeasurementSet::len).sum()
    }

    /// Every endpoint completed
    pub fn is_complete(&self) -> bool {
        self.partial_errors.is_empty()
            && !self.disconnected
            && !self.blocked
            && self.interrupted.is_none()
    }
}

/// Lower bound of an update after history clamping
pub fn clamp_from_time(from_time: i64, history_window: Option<i64>, now: i64) -> i64 {
    if from_time > 0 {
        return from_time;
    }
    history_window.map_or(0, |window| (now - window).max(0))
}

/// Core sync engine
///
/// ## Threading
///
/// All methods take `&self`; one engine serves concurrent updates for
/// any number of users. Updates share nothing but the credential manager.
///
/// ## Load Resistance
///
/// - **Bounded endpoint pool**: at most `endpoint_concurrency` endpoints
///   of one update are fetched at a time
/// - **Global timeout**: an update never runs longer than `sync_timeout_secs`
/// - **Bounded event channel**: a full channel drops events (logged)
pub struct SyncEngine {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    credentials: Arc<CredentialManager>,
    transport: Arc<dyn Transport>,
    policy: FetchPolicy,
    endpoint_concurrency: usize,
    sync_timeout: Duration,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Create a new sync engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        adapters: Vec<Box<dyn ProviderAdapter>>,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let mut by_name: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        for adapter in adapters {
            let name = adapter.name().to_string();
            if by_name.insert(name.clone(), Arc::from(adapter)).is_some() {
                return Err(Error::config(format!("Duplicate adapter: {}", name)));
            }
        }

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            adapters: by_name,
            credentials: Arc::new(CredentialManager::new(store)),
            transport,
            policy: FetchPolicy::from(&config),
            endpoint_concurrency: config.endpoint_concurrency,
            sync_timeout: Duration::from_secs(config.sync_timeout_secs),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Registered connector names, sorted
    pub fn connectors(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.adapters.values().map(|a| a.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    fn adapter(&self, connector: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(connector)
            .cloned()
            .ok_or_else(|| Error::UnknownConnector(connector.to_string()))
    }

    /// Instructions for connecting `connector`
    ///
    /// Marks the key as awaiting authorization. No network I/O.
    pub async fn get_connect_instructions(
        &self,
        user_id: &str,
        connector: &str,
    ) -> Result<ConnectInstructions> {
        let adapter = self.adapter(connector)?;
        if !self.credentials.has(user_id, connector).await? {
            self.credentials.mark_awaiting(user_id, connector, None).await;
        }
        Ok(adapter.connect_instructions(user_id))
    }

    /// Run one connect step
    ///
    /// # Returns
    ///
    /// - `Ok(ConnectResult::Connected)`: credentials stored
    /// - `Ok(ConnectResult::Redirect)`: the user must visit the URL, then call
    ///   `connect` again with the callback parameters
    /// - `Err(Error::MissingParameter)`: nothing was stored
    /// - `Err(Error::AuthRejected)`: any previous credential state was purged
    pub async fn connect(
        &self,
        user_id: &str,
        connector: &str,
        parameters: &ConnectParameters,
    ) -> Result<ConnectResult> {
        let adapter = self.adapter(connector)?;
        let parked = self.credentials.parked(user_id, connector).await;
        let session = self.transport.session()?;

        let context = ConnectContext {
            user_id,
            parameters,
            pending: parked.as_ref(),
        };

        match adapter.connect(session.as_ref(), context).await {
            Ok(ConnectOutcome::Connected(credentials)) => {
                self.credentials.store(user_id, connector, credentials).await?;
                info!(user_id, connector, "Connector connected");
                self.emit_event(EngineEvent::Connected {
                    user_id: user_id.to_string(),
                    connector: connector.to_string(),
                });
                Ok(ConnectResult::Connected)
            }
            Ok(ConnectOutcome::Redirect { url, pending }) => {
                debug!(user_id, connector, "Connect requires authorization redirect");
                self.credentials.mark_awaiting(user_id, connector, pending).await;
                Ok(ConnectResult::Redirect { url })
            }
            Err(e) => {
                warn!(user_id, connector, error = %e, "Connect failed");
                if e.kind() == ErrorKind::AuthRejected {
                    self.purge(user_id, connector, "authorization rejected").await?;
                }
                Err(e)
            }
        }
    }

    /// Remove a connector's credentials
    pub async fn disconnect(&self, user_id: &str, connector: &str) -> Result<()> {
        self.adapter(connector)?;
        self.purge(user_id, connector, "disconnected by user").await
    }

    pub async fn connector_state(&self, user_id: &str, connector: &str) -> Result<ConnectorState> {
        self.adapter(connector)?;
        self.credentials.state(user_id, connector).await
    }

    /// Lift the block a fatal provider error put on a connector
    ///
    /// Fails with `NotConnected` when no credentials are stored.
    pub async fn clear_fatal(&self, user_id: &str, connector: &str) -> Result<()> {
        self.adapter(connector)?;
        if !self.credentials.unblock(user_id, connector).await? {
            return Err(Error::not_connected(connector));
        }
        info!(user_id, connector, "Connector unblocked");
        Ok(())
    }

    /// Record a successful sync for incremental updates
    pub async fn record_sync(&self, user_id: &str, connector: &str, at: DateTime<Utc>) -> Result<()> {
        self.credentials.set_last_sync(user_id, connector, at).await
    }

    /// Fetch every measurement newer than `from_time`
    ///
    /// `from_time == 0` requests the adapter's full history window.
    pub async fn update(&self, user_id: &str, connector: &str, from_time: i64) -> Result<SyncResult> {
        self.update_with_cancel(user_id, connector, from_time, CancelSignal::never())
            .await
    }

    /// [`update`](Self::update) with an external cancellation signal
    ///
    /// Cancellation abandons in-flight requests and returns what was
    /// gathered so far, with `interrupted` set.
    pub async fn update_with_cancel(
        &self,
        user_id: &str,
        connector: &str,
        from_time: i64,
        cancel: CancelSignal,
    ) -> Result<SyncResult> {
        let adapter = self.adapter(connector)?;

        let record = self
            .credentials
            .record(user_id, connector)
            .await?
            .ok_or_else(|| Error::not_connected(connector))?;

        if let Some(reason) = &record.blocked {
            return Err(Error::blocked(format!("{}: {}", connector, reason)));
        }

        if let (Some(min_interval), Some(elapsed)) = (
            adapter.min_update_interval(),
            record.seconds_since_sync(Utc::now()),
        ) {
            if elapsed < min_interval {
                return Err(Error::UpdateTooSoon(format!(
                    "{} was synchronized {}s ago; minimum interval is {}s",
                    connector, elapsed, min_interval
                )));
            }
        }

        let now = unix_now();
        let window = SyncWindow {
            from_time: clamp_from_time(from_time, adapter.history_window(), now),
            now,
        };
        let cancel = cancel.with_deadline(Instant::now() + self.sync_timeout);
        let session = self.transport.session()?;

        let planned = tokio::select! {
            planned = adapter.plan(session.as_ref(), &record.credentials, window) => planned,
            reason = cancel.cancelled() => {
                warn!(user_id, connector, "Update {} while planning", reason);
                return Ok(SyncResult {
                    interrupted: Some(reason),
                    ..SyncResult::default()
                });
            }
        };

        let plans = match planned {
            Ok(plans) => plans,
            Err(e) => {
                error!(user_id, connector, error = %e, "Failed to plan update");
                match e.kind() {
                    ErrorKind::AuthExpired => {
                        self.purge_stale(user_id, connector, &record.credentials).await?;
                    }
                    ErrorKind::Fatal => {
                        self.block(user_id, connector, &record.credentials, &e.to_string())
                            .await?;
                    }
                    _ => {}
                }
                self.emit_event(EngineEvent::SyncFailed {
                    user_id: user_id.to_string(),
                    connector: connector.to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        info!(
            user_id,
            connector,
            from_time = window.from_time,
            endpoints = plans.len(),
            "Update started"
        );
        self.emit_event(EngineEvent::SyncStarted {
            user_id: user_id.to_string(),
            connector: connector.to_string(),
            from_time: window.from_time,
            endpoints: plans.len(),
        });

        let outcomes = self
            .fetch_endpoints(&adapter, session, &plans, window.from_time, &cancel)
            .await;

        let mut result = SyncResult::default();
        let mut records: Vec<RawRecord> = Vec::new();
        let mut completed: HashSet<&str> = HashSet::new();
        let mut fatal: Option<String> = None;

        for (plan, outcome) in plans.iter().zip(outcomes) {
            let report = match outcome {
                EndpointOutcome::Fetched(report) => report,
                EndpointOutcome::Skipped => {
                    result.partial_errors.push(PartialError {
                        endpoint: plan.key.clone(),
                        kind: ErrorKind::NotConnected,
                        detail: format!("{}: skipped, the provider revoked the credentials", plan.key),
                    });
                    continue;
                }
                EndpointOutcome::Failed(detail) => {
                    result.partial_errors.push(PartialError {
                        endpoint: plan.key.clone(),
                        kind: ErrorKind::Internal,
                        detail,
                    });
                    continue;
                }
            };

            self.emit_event(EngineEvent::EndpointFinished {
                user_id: user_id.to_string(),
                connector: connector.to_string(),
                endpoint: report.endpoint.clone(),
                records: report.records.len(),
                termination: report.termination.to_string(),
            });

            match &report.termination {
                Termination::AuthExpired => result.disconnected = true,
                Termination::Cancelled(reason) => {
                    result.interrupted.get_or_insert(*reason);
                }
                _ => {}
            }
            match report.termination.to_error(&plan.key) {
                Some(e) => {
                    if e.kind() == ErrorKind::Fatal {
                        fatal.get_or_insert_with(|| e.to_string());
                    }
                    result.partial_errors.push(PartialError::new(&plan.key, &e));
                }
                None => completed.extend(plan.metrics.iter().map(String::as_str)),
            }
            records.extend(report.records);
        }

        result.measurement_sets = build_sets(adapter.as_ref(), records, &completed, now);

        if result.disconnected {
            result.disconnected = self.purge_stale(user_id, connector, &record.credentials).await?;
        } else if let Some(reason) = fatal {
            result.blocked = self.block(user_id, connector, &record.credentials, &reason).await?;
        }

        info!(
            user_id,
            connector,
            sets = result.measurement_sets.len(),
            measurements = result.measurement_count(),
            partial_errors = result.partial_errors.len(),
            "Update finished"
        );
        self.emit_event(EngineEvent::SyncFinished {
            user_id: user_id.to_string(),
            connector: connector.to_string(),
            measurements: result.measurement_count(),
            partial_errors: result.partial_errors.len(),
        });

        Ok(result)
    }

    /// Incremental sync from the last successful sync into `sink`
    ///
    /// `last_sync` only advances when every endpoint completed, so a
    /// failed endpoint is fetched again from the same point next time.
    pub async fn sync_and_store(
        &self,
        user_id: &str,
        connector: &str,
        sink: &dyn MeasurementSink,
    ) -> Result<(SyncResult, StoreReport)> {
        let record = self
            .credentials
            .record(user_id, connector)
            .await?
            .ok_or_else(|| Error::not_connected(connector))?;
        let from_time = record.last_sync.map_or(0, |at| at.timestamp());
        let started = Utc::now();

        let result = self.update(user_id, connector, from_time).await?;
        let report = sink.store_measurements(user_id, &result.measurement_sets).await?;

        if !report.errors.is_empty() {
            warn!(
                user_id,
                connector,
                rejected = report.errors.len(),
                "Sink rejected measurements"
            );
        }
        if result.is_complete() {
            self.record_sync(user_id, connector, started).await?;
        }
        Ok((result, report))
    }

    /// Run the endpoints of one update on the worker pool
    ///
    /// Outcomes are returned in plan order.
    async fn fetch_endpoints(
        &self,
        adapter: &Arc<dyn ProviderAdapter>,
        session: Arc<dyn crate::traits::HttpSession>,
        plans: &[EndpointPlan],
        from_time: i64,
        cancel: &CancelSignal,
    ) -> Vec<EndpointOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.endpoint_concurrency));
        let auth_void = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut index_of = HashMap::new();

        for (index, plan) in plans.iter().cloned().enumerate() {
            let adapter = adapter.clone();
            let session = session.clone();
            let policy = self.policy.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let auth_void = auth_void.clone();

            let handle = tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return EndpointOutcome::Skipped;
                };
                if auth_void.load(Ordering::SeqCst) {
                    debug!(endpoint = %plan.key, "Skipping endpoint, connection is void");
                    return EndpointOutcome::Skipped;
                }
                let report = FetchLoop::new(adapter.as_ref(), session.as_ref(), &policy, &cancel)
                    .run(&plan, from_time)
                    .await;
                if report.termination == Termination::AuthExpired {
                    auth_void.store(true, Ordering::SeqCst);
                }
                EndpointOutcome::Fetched(report)
            });
            index_of.insert(handle.id(), index);
        }

        let mut outcomes: Vec<EndpointOutcome> = plans
            .iter()
            .map(|_| EndpointOutcome::Failed("endpoint task did not report".to_string()))
            .collect();

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => {
                    error!("Endpoint task failed: {}", e);
                    (e.id(), EndpointOutcome::Failed(e.to_string()))
                }
            };
            if let Some(&index) = index_of.get(&id) {
                outcomes[index] = outcome;
            }
        }
        outcomes
    }

    /// Purge credentials and pending state for a key
    async fn purge(&self, user_id: &str, connector: &str, reason: &str) -> Result<()> {
        self.credentials.remove(user_id, connector).await?;
        warn!(user_id, connector, reason, "Connector disconnected");
        self.emit_event(EngineEvent::ConnectorDisconnected {
            user_id: user_id.to_string(),
            connector: connector.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Purge credentials the provider revoked during an update
    ///
    /// Credentials replaced by a reconnect while the update ran are kept.
    /// Returns whether the connector was disconnected.
    async fn purge_stale(&self, user_id: &str, connector: &str, used: &Credentials) -> Result<bool> {
        if !self.credentials.remove_if_unchanged(user_id, connector, used).await? {
            info!(user_id, connector, "Credentials changed during update, not purging");
            return Ok(false);
        }
        let reason = "credentials expired";
        warn!(user_id, connector, reason, "Connector disconnected");
        self.emit_event(EngineEvent::ConnectorDisconnected {
            user_id: user_id.to_string(),
            connector: connector.to_string(),
            reason: reason.to_string(),
        });
        Ok(true)
    }

    /// Stop syncing a connector after a fatal provider error
    ///
    /// Returns whether the block was recorded.
    async fn block(&self, user_id: &str, connector: &str, used: &Credentials, reason: &str) -> Result<bool> {
        if !self
            .credentials
            .block_if_unchanged(user_id, connector, used, reason)
            .await?
        {
            return Ok(false);
        }
        error!(user_id, connector, reason, "Connector blocked until cleared");
        self.emit_event(EngineEvent::ConnectorBlocked {
            user_id: user_id.to_string(),
            connector: connector.to_string(),
            reason: reason.to_string(),
        });
        Ok(true)
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("connectors", &self.connectors())
            .field("policy", &self.policy)
            .field("endpoint_concurrency", &self.endpoint_concurrency)
            .field("sync_timeout", &self.sync_timeout)
            .finish_non_exhaustive()
    }
}

enum EndpointOutcome {
    Fetched(EndpointReport),
    /// Not started because the connection was found void
    Skipped,
    /// The endpoint task panicked
    Failed(String),
}

/// Group records into one set per template
///
/// Metrics of completed endpoints always yield a set, possibly empty.
/// Measurements are ordered by timestamp; invalid records are dropped.
fn build_sets(
    adapter: &dyn ProviderAdapter,
    records: Vec<RawRecord>,
    completed: &HashSet<&str>,
    now: i64,
) -> Vec<MeasurementSet> {
    let mut by_metric: HashMap<String, Vec<Measurement>> = HashMap::new();
    for record in records {
        if adapter.template(&record.metric).is_none() {
            warn!(metric = %record.metric, "No template for metric, dropping record");
            continue;
        }
        match Measurement::validated(record.timestamp, record.value, record.duration, now) {
            Ok(measurement) => by_metric.entry(record.metric).or_default().push(measurement),
            Err(e) => warn!(metric = %record.metric, error = %e, "Dropping invalid record"),
        }
    }

    let mut sets = Vec::new();
    for template in adapter.templates() {
        let measurements = match by_metric.remove(template.key) {
            Some(mut measurements) => {
                measurements.sort_by_key(Measurement::timestamp);
                measurements
            }
            None if completed.contains(template.key) => Vec::new(),
            None => continue,
        };
        match MeasurementSet::from_template(template, adapter.display_name(), measurements) {
            Ok(set) => sets.push(set),
            Err(e) => error!(metric = template.key, error = %e, "Invalid measurement template"),
        }
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_from_time() {
        let now = 1_700_000_000;
        assert_eq!(clamp_from_time(0, Some(63_113_852), now), now - 63_113_852);
        assert_eq!(clamp_from_time(0, None, now), 0);
        assert_eq!(clamp_from_time(1_600_000_000, Some(100), now), 1_600_000_000);
        assert_eq!(clamp_from_time(0, Some(i64::MAX), now), 0);
    }

    #[test]
    fn test_sync_result_completeness() {
        let mut result = SyncResult::default();
        assert!(result.is_complete());
        result.interrupted = Some(CancelReason::TimedOut);
        assert!(!result.is_complete());

        let blocked = SyncResult {
            blocked: true,
            ..SyncResult::default()
        };
        assert!(!blocked.is_complete());
    }

    #[test]
    fn test_partial_error_response() {
        let partial = PartialError::new("steps", &Error::rate_limited("steps: still limited"));
        let response = partial.to_response();
        assert_eq!(response.code, 429);
        assert_eq!(partial.kind, ErrorKind::RateLimited);
    }
}
