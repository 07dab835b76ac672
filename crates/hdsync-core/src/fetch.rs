//! Paginated fetch loop
//!
//! Drives the pages of one endpoint until a termination condition fires.
//!
//! ## Termination
//!
//! | condition                                 | accumulated records |
//! |-------------------------------------------|---------------------|
//! | record older than `from_time` (ordered)   | kept                |
//! | no next cursor                            | kept                |
//! | page limit                                | kept                |
//! | auth expired                              | discarded           |
//! | rate limited beyond the retry budget      | kept                |
//! | transient failure                         | kept                |
//! | fatal provider error                      | kept                |
//! | cancellation / deadline                   | kept                |
//!
//! Pages are fetched strictly sequentially. Rate-limit retries repeat the
//! same page after a fixed backoff; the retry budget resets on every page.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::{CancelReason, CancelSignal};
use crate::classifier::{Outcome, ResponseClassifier};
use crate::config::EngineConfig;
use crate::error::{Error, ErrorKind};
use crate::traits::{
    Cursor, EndpointPlan, HttpRequest, HttpSession, ProviderAdapter, RawRecord, RecordOrder,
};

/// Retry and paging limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub rate_limit_retries: u32,
    pub rate_limit_backoff: Duration,
    pub max_pages: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for FetchPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            rate_limit_retries: config.rate_limit_retries,
            rate_limit_backoff: Duration::from_millis(config.rate_limit_backoff_ms),
            max_pages: config.max_pages_per_endpoint,
        }
    }
}

/// Why an endpoint stopped paging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// A record older than `from_time` was reached
    Boundary,
    /// The provider reported no further page
    Exhausted,
    /// The page cap was reached
    PageLimit,
    /// Credentials were rejected
    AuthExpired,
    /// Still rate limited after `retries` retries
    RateLimited { retries: u32 },
    Transient(String),
    Fatal(String),
    Cancelled(CancelReason),
}

impl Termination {
    /// Whether the endpoint finished without error
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Termination::Boundary | Termination::Exhausted | Termination::PageLimit
        )
    }

    /// The error reported for an incomplete endpoint
    pub fn to_error(&self, endpoint: &str) -> Option<Error> {
        match self {
            Termination::Boundary | Termination::Exhausted | Termination::PageLimit => None,
            Termination::AuthExpired => Some(Error::auth_expired(format!(
                "{}: credentials rejected by provider",
                endpoint
            ))),
            Termination::RateLimited { retries } => Some(Error::rate_limited(format!(
                "{}: still rate limited after {} retries",
                endpoint, retries
            ))),
            Termination::Transient(msg) => Some(Error::transient(format!("{}: {}", endpoint, msg))),
            Termination::Fatal(msg) => Some(Error::fatal(format!("{}: {}", endpoint, msg))),
            Termination::Cancelled(reason) => {
                Some(Error::Cancelled(format!("{}: {}", endpoint, reason)))
            }
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Boundary => f.write_str("boundary"),
            Termination::Exhausted => f.write_str("exhausted"),
            Termination::PageLimit => f.write_str("page limit"),
            Termination::AuthExpired => f.write_str("auth expired"),
            Termination::RateLimited { retries } => write!(f, "rate limited after {} retries", retries),
            Termination::Transient(msg) => write!(f, "transient: {}", msg),
            Termination::Fatal(msg) => write!(f, "fatal: {}", msg),
            Termination::Cancelled(reason) => write!(f, "{}", reason),
        }
    }
}

/// Result of fetching one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointReport {
    pub endpoint: String,
    pub records: Vec<RawRecord>,
    pub termination: Termination,
    /// Pages successfully parsed
    pub pages: usize,
    /// Requests sent, retries included
    pub requests: usize,
}

/// Mutable state of one endpoint fetch
#[derive(Debug, Default)]
struct LoopState {
    accumulated: Vec<RawRecord>,
    attempts_on_current_page: u32,
    pages: usize,
    requests: usize,
    last_value: HashMap<String, f64>,
}

/// Fetch loop bound to one adapter and session
pub struct FetchLoop<'a> {
    adapter: &'a dyn ProviderAdapter,
    session: &'a dyn HttpSession,
    classifier: ResponseClassifier,
    policy: &'a FetchPolicy,
    cancel: &'a CancelSignal,
}

impl<'a> FetchLoop<'a> {
    pub fn new(
        adapter: &'a dyn ProviderAdapter,
        session: &'a dyn HttpSession,
        policy: &'a FetchPolicy,
        cancel: &'a CancelSignal,
    ) -> Self {
        Self {
            classifier: adapter.classifier(),
            adapter,
            session,
            policy,
            cancel,
        }
    }

    /// Fetch every page of `plan` newer than `from_time`
    pub async fn run(&self, plan: &EndpointPlan, from_time: i64) -> EndpointReport {
        let mut state = LoopState::default();
        let max_pages = plan
            .max_pages
            .map_or(self.policy.max_pages, |p| p.min(self.policy.max_pages));
        let mut request = plan.request.clone();

        loop {
            if let Some(reason) = self.cancel.reason() {
                return self.finish(plan, state, Termination::Cancelled(reason));
            }
            if state.pages >= max_pages {
                debug!(endpoint = %plan.key, pages = state.pages, "Page limit reached");
                return self.finish(plan, state, Termination::PageLimit);
            }

            state.requests += 1;
            let sent = tokio::select! {
                result = self.session.send(request.clone()) => result,
                reason = self.cancel.cancelled() => {
                    return self.finish(plan, state, Termination::Cancelled(reason));
                }
            };

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    let outcome = self.classifier.classify_failure(&e);
                    warn!(endpoint = %plan.key, error = %e, "Request failed without response");
                    return self.finish(plan, state, terminal(outcome));
                }
            };

            let outcome = self
                .classifier
                .classify(response.status, self.adapter.inspect_body(&response));

            match outcome {
                Outcome::Success => {
                    state.attempts_on_current_page = 0;
                    let page = match self.adapter.parse_page(plan, &request, &response) {
                        Ok(page) => page,
                        Err(e) => {
                            warn!(endpoint = %plan.key, error = %e, "Failed to parse page");
                            let termination = if e.kind() == ErrorKind::Fatal {
                                Termination::Fatal(e.to_string())
                            } else {
                                Termination::Transient(e.to_string())
                            };
                            return self.finish(plan, state, termination);
                        }
                    };
                    state.pages += 1;
                    debug!(
                        endpoint = %plan.key,
                        page = state.pages,
                        records = page.records.len(),
                        "Fetched page"
                    );

                    if absorb(plan, &mut state, page.records, from_time) {
                        return self.finish(plan, state, Termination::Boundary);
                    }

                    request = match page.next {
                        None => return self.finish(plan, state, Termination::Exhausted),
                        Some(cursor) => cursor_request(plan, cursor),
                    };
                }
                Outcome::Empty => {
                    state.pages += 1;
                    return self.finish(plan, state, Termination::Exhausted);
                }
                Outcome::RateLimited => {
                    if state.attempts_on_current_page >= self.policy.rate_limit_retries {
                        let retries = state.attempts_on_current_page;
                        return self.finish(plan, state, Termination::RateLimited { retries });
                    }
                    state.attempts_on_current_page += 1;
                    warn!(
                        endpoint = %plan.key,
                        attempt = state.attempts_on_current_page,
                        "Rate limited, backing off for {:?}",
                        self.policy.rate_limit_backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.rate_limit_backoff) => {}
                        reason = self.cancel.cancelled() => {
                            return self.finish(plan, state, Termination::Cancelled(reason));
                        }
                    }
                }
                other => return self.finish(plan, state, terminal(other)),
            }
        }
    }

    fn finish(&self, plan: &EndpointPlan, mut state: LoopState, termination: Termination) -> EndpointReport {
        if termination == Termination::AuthExpired {
            state.accumulated.clear();
        }
        if !termination.is_complete() {
            warn!(
                endpoint = %plan.key,
                connector = self.adapter.name(),
                kept = state.accumulated.len(),
                "Endpoint stopped: {}",
                termination
            );
        }
        EndpointReport {
            endpoint: plan.key.clone(),
            records: state.accumulated,
            termination,
            pages: state.pages,
            requests: state.requests,
        }
    }
}

/// Map a non-success outcome to its termination
fn terminal(outcome: Outcome) -> Termination {
    match outcome {
        Outcome::AuthExpired => Termination::AuthExpired,
        Outcome::RateLimited => Termination::RateLimited { retries: 0 },
        Outcome::Transient(msg) => Termination::Transient(msg),
        Outcome::Fatal(msg) => Termination::Fatal(msg),
        Outcome::Success | Outcome::Empty => Termination::Exhausted,
    }
}

/// Append a page's records; returns true when the boundary was reached
fn absorb(plan: &EndpointPlan, state: &mut LoopState, records: Vec<RawRecord>, from_time: i64) -> bool {
    for record in records {
        if record.timestamp < from_time {
            match plan.order {
                RecordOrder::NewestFirst => return true,
                RecordOrder::Unordered => continue,
            }
        }
        if plan.dedup {
            if state.last_value.get(&record.metric) == Some(&record.value) {
                continue;
            }
            state.last_value.insert(record.metric.clone(), record.value);
        }
        state.accumulated.push(record);
    }
    false
}

/// Build the request for a cursor relative to the plan's first request
fn cursor_request(plan: &EndpointPlan, cursor: Cursor) -> HttpRequest {
    match cursor {
        Cursor::Url(url) => plan.request.follow_up(url),
        Cursor::Request(request) => request,
    }
}
