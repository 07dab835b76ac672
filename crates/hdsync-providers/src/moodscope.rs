// # Moodscope Adapter
//
// Moodscope has no API: the adapter logs in with the user's password
// and scrapes the monthly mood chart.
//
// ## Login
//
// 1. `GET /` to obtain the session cookie
// 2. `POST /login` with the form fields, without following the redirect
// 3. A redirect (or body) pointing back at `/login` means rejection
//
// ## Update
//
// The chart is fetched one month per page, walking backwards from the
// current month to the month of `from_time`, at most 36 months.

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use hdsync_core::config::ConnectorConfig;
use hdsync_core::model::{
    CombinationOperation, ConnectInstructions, ConnectOutcome, ConnectParameter, Credentials,
    MeasurementSetTemplate, require_parameter,
};
use hdsync_core::traits::{
    AdapterFactory, ConnectContext, Cursor, EndpointPlan, HttpRequest, HttpResponse, HttpSession,
    Page, ProviderAdapter, RawRecord, SyncWindow,
};
use hdsync_core::{AdapterRegistry, Error, Result};
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::connect_url;

const NAME: &str = "moodscope";
const BASE: &str = "https://www.moodscope.com";
const MAX_MONTHS: usize = 36;
const LOGIN_PATH: &str = "/login";

const MOOD: &str = "mood";

static TEMPLATES: &[MeasurementSetTemplate] = &[MeasurementSetTemplate::new(
    MOOD,
    "Overall Mood",
    "Mood",
    "%",
    CombinationOperation::Mean,
)];

/// One chart point: label, `Date.UTC(year, month0, day)`, score
static MOOD_POINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"name: '(.*)',fillColor: '#FF0033',\s+x:\s+Date\.UTC\((\d+),\s+(\d+),\s+(\d+)\),\s+y:\s+(\d+),\s+lineWidth",
    )
    .expect("Invalid regex")
});

/// `(year, month)` of a Unix timestamp
fn year_month(timestamp: i64) -> (i32, u32) {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map_or((1970, 1), |dt| (dt.year(), dt.month()))
}

fn previous_month((year, month): (i32, u32)) -> (i32, u32) {
    if month <= 1 { (year - 1, 12) } else { (year, month - 1) }
}

/// Months from `from` to `to`, both included
fn months_between(from: (i32, u32), to: (i32, u32)) -> usize {
    let span = (to.0 - from.0) * 12 + to.1 as i32 - from.1 as i32 + 1;
    usize::try_from(span).unwrap_or(0).max(1)
}

/// Parse `month=YYYY-M`
fn parse_month(value: &str) -> Option<(i32, u32)> {
    let (year, month) = value.split_once('-')?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year.parse().ok()?, month))
}

/// Extract the mood points of a chart page
pub fn parse_chart(html: &str) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    for captures in MOOD_POINT.captures_iter(html) {
        let number = |i: usize| captures.get(i).and_then(|m| m.as_str().parse::<i64>().ok());
        let (Some(year), Some(month0), Some(day), Some(score)) = (number(2), number(3), number(4), number(5))
        else {
            continue;
        };
        let timestamp = u32::try_from(month0 + 1)
            .ok()
            .zip(u32::try_from(day).ok())
            .and_then(|(month, day)| {
                Utc.with_ymd_and_hms(i32::try_from(year).ok()?, month, day, 0, 0, 0)
                    .single()
            })
            .ok_or_else(|| Error::transient(format!("invalid chart date {}-{}-{}", year, month0 + 1, day)))?;
        records.push(RawRecord::new(MOOD, timestamp.timestamp(), score as f64));
    }
    Ok(records)
}

/// Moodscope adapter
#[derive(Debug)]
pub struct MoodscopeAdapter {
    base: String,
    connect_url: String,
}

impl MoodscopeAdapter {
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            base: config.api_base_or(BASE).to_string(),
            connect_url: connect_url(config, NAME),
        }
    }

    fn chart_request(&self, month: (i32, u32)) -> HttpRequest {
        HttpRequest::get(format!("{}/chart", self.base)).query("month", format!("{}-{}", month.0, month.1))
    }

    /// Log the session in
    ///
    /// Returns `Ok(false)` when Moodscope rejects the credentials.
    async fn login(&self, session: &dyn HttpSession, username: &str, password: &str) -> Result<bool> {
        let home = session.send(HttpRequest::get(format!("{}/", self.base))).await?;
        if home.status >= 500 {
            return Err(Error::unreachable(format!("Moodscope home page: HTTP {}", home.status)));
        }

        let (x, y) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(2..=80), rng.gen_range(2..=20))
        };
        let request = HttpRequest::post(format!("{}{}", self.base, LOGIN_PATH))
            .form("_username", username)
            .form("_password", password)
            .form("login.x", x.to_string())
            .form("login.y", y.to_string())
            .form("login", "Login!")
            .follow_redirects(false);
        let response = session.send(request).await?;

        if response.status >= 500 {
            return Err(Error::unreachable(format!("Moodscope login: HTTP {}", response.status)));
        }
        let rejected = match response.header("location") {
            Some(location) => location.trim_end_matches('/').ends_with(LOGIN_PATH),
            None => response.body.contains(LOGIN_PATH),
        };
        debug!(status = response.status, rejected, "Moodscope login answered");
        Ok(!rejected)
    }
}

#[async_trait]
impl ProviderAdapter for MoodscopeAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Moodscope"
    }

    fn connect_instructions(&self, _user_id: &str) -> ConnectInstructions {
        ConnectInstructions {
            authorization_url: self.connect_url.clone(),
            parameters: vec![
                ConnectParameter::text("Username", "username"),
                ConnectParameter::password("Password", "password"),
            ],
            use_popup: false,
        }
    }

    async fn connect(
        &self,
        session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome> {
        let username = require_parameter(context.parameters, "username")?;
        let password = require_parameter(context.parameters, "password")?;

        if !self.login(session, username, password).await? {
            return Err(Error::auth_rejected("Invalid username or password"));
        }
        Ok(ConnectOutcome::Connected(
            Credentials::new()
                .with("username", username)
                .with("password", password),
        ))
    }

    fn templates(&self) -> &'static [MeasurementSetTemplate] {
        TEMPLATES
    }

    async fn plan(
        &self,
        session: &dyn HttpSession,
        credentials: &Credentials,
        window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>> {
        let username = credentials.require("username")?;
        let password = credentials.require("password")?;
        if !self.login(session, username, password).await? {
            return Err(Error::auth_expired("Moodscope no longer accepts the stored password"));
        }

        let current = year_month(window.now);
        let months = months_between(year_month(window.from_time), current).min(MAX_MONTHS);
        Ok(vec![
            EndpointPlan::new("chart", self.chart_request(current))
                .metrics([MOOD])
                .max_pages(months),
        ])
    }

    fn parse_page(
        &self,
        _plan: &EndpointPlan,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        let records = parse_chart(&response.body)?;
        let next = request
            .query_value("month")
            .and_then(parse_month)
            .map(|month| Cursor::Request(self.chart_request(previous_month(month))));
        Ok(Page::new(records, next))
    }
}

/// Factory for the Moodscope adapter
pub struct MoodscopeFactory;

impl AdapterFactory for MoodscopeFactory {
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(MoodscopeAdapter::new(config)))
    }
}

/// Register the Moodscope adapter with a registry
pub fn register(registry: &AdapterRegistry) {
    registry.register_adapter(NAME, Box::new(MoodscopeFactory));
}
