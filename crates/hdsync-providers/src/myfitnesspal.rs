// # MyFitnessPal Adapter
//
// No public API: the adapter logs in with the user's password and reads
// the JSON behind the nutrition report pages, one report per nutrient.
//
// ## Login
//
// 1. `GET /` for the session cookie and the form's `authenticity_token`
// 2. `POST /account/login` with the token and the password
// 3. A body carrying one of the known failure messages means rejection
//
// ## Reports
//
// A report covers the last N days and lists `{"date": "M/D", "total": n}`
// oldest first, without a year. Years are recovered by walking back from
// today: a month larger than the one after it belongs to the previous year.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use hdsync_core::config::ConnectorConfig;
use hdsync_core::model::{
    CombinationOperation, ConnectInstructions, ConnectOutcome, ConnectParameter, Credentials,
    MeasurementSetTemplate, require_parameter,
};
use hdsync_core::traits::{
    AdapterFactory, ConnectContext, EndpointPlan, HttpRequest, HttpResponse, HttpSession, Page,
    ProviderAdapter, RawRecord, SyncWindow,
};
use hdsync_core::{AdapterRegistry, Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::{TWO_YEARS_SECS, connect_url};

const NAME: &str = "myfitnesspal";
const BASE: &str = "https://www.myfitnesspal.com";

/// Half a day, in seconds
const MIN_UPDATE_INTERVAL_SECS: i64 = 43_200;

/// Longest report MyFitnessPal serves
const MAX_DAYS: i64 = 730;

const REJECTIONS: &[&str] = &[
    "Incorrect username or password",
    "exceeded the maximum number of consecutive failed login attempts",
];

const fn nutrient(key: &'static str, report: &'static str, unit: &'static str) -> MeasurementSetTemplate {
    MeasurementSetTemplate::new(key, report, "Nutrition", unit, CombinationOperation::Sum)
}

/// The template variable doubles as the report name
static TEMPLATES: &[MeasurementSetTemplate] = &[
    nutrient("carbs", "Carbs", "g"),
    nutrient("fat", "Fat", "g"),
    nutrient("protein", "Protein", "g"),
    nutrient("saturated_fat", "Saturated Fat", "g"),
    nutrient("polyunsaturated_fat", "Polyunsaturated Fat", "g"),
    nutrient("monounsaturated_fat", "Monounsaturated Fat", "g"),
    nutrient("trans_fat", "Trans Fat", "g"),
    nutrient("cholesterol", "Cholesterol", "mg"),
    nutrient("sodium", "Sodium", "mg"),
    nutrient("potassium", "Potassium", "mg"),
    nutrient("fiber", "Fiber", "g"),
    nutrient("sugar", "Sugar", "g"),
    nutrient("vitamin_a", "Vitamin A", "%RDA"),
    nutrient("vitamin_c", "Vitamin C", "%RDA"),
    nutrient("iron", "Iron", "%RDA"),
    nutrient("calcium", "Calcium", "%RDA"),
];

static AUTHENTICITY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name="authenticity_token" type="hidden" value="([^"]+)""#).expect("Invalid regex")
});

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    data: Vec<ReportDay>,
}

#[derive(Debug, Deserialize)]
struct ReportDay {
    date: String,
    total: f64,
}

/// Days a report must span to cover `window`, rounded to the nearest day
fn report_days(window: SyncWindow) -> i64 {
    let days = ((window.now - window.from_time) as f64 / 86_400.0 - 0.5).ceil() as i64;
    days.clamp(1, MAX_DAYS)
}

/// `M/D` as `(month, day)`
fn parse_month_day(value: &str) -> Option<(u32, u32)> {
    let (month, day) = value.trim().split_once('/')?;
    Some((month.parse().ok()?, day.parse().ok()?))
}

/// Records of one nutrition report, at midnight UTC
///
/// `today` anchors the year of the newest entry. Days with a zero total
/// are nothing logged and are skipped.
pub fn parse_report(body: &str, today: NaiveDate, metric: &str) -> Result<Vec<RawRecord>> {
    let report: Report = serde_json::from_str(body)
        .map_err(|e| Error::transient(format!("unreadable MyFitnessPal report: {}", e)))?;

    let mut year = today.year();
    let mut later_month = today.month();
    let mut records = Vec::new();

    for day in report.data.iter().rev() {
        let Some((month, day_of_month)) = parse_month_day(&day.date) else {
            debug!(date = %day.date, "Skipping report day with unreadable date");
            continue;
        };
        if month > later_month {
            year -= 1;
        }
        later_month = month;

        if day.total == 0.0 {
            continue;
        }
        let Some(timestamp) = NaiveDate::from_ymd_opt(year, month, day_of_month)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
        else {
            debug!(date = %day.date, year, "Skipping report day with invalid date");
            continue;
        };
        records.push(RawRecord::new(metric, timestamp, day.total));
    }

    records.reverse();
    Ok(records)
}

/// MyFitnessPal adapter
#[derive(Debug)]
pub struct MyFitnessPalAdapter {
    base: String,
    connect_url: String,
}

impl MyFitnessPalAdapter {
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            base: config.api_base_or(BASE).to_string(),
            connect_url: connect_url(config, NAME),
        }
    }

    fn report_request(&self, report: &str, days: i64) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/reports/results/nutrition/{}/{}.json",
            self.base,
            urlencoding::encode(report),
            days
        ))
        .query("report_name", 1)
    }

    /// Log the session in
    ///
    /// Returns `Ok(false)` when MyFitnessPal rejects the credentials.
    async fn login(&self, session: &dyn HttpSession, username: &str, password: &str) -> Result<bool> {
        let home = session.send(HttpRequest::get(format!("{}/", self.base))).await?;
        if !home.is_success() {
            return Err(Error::unreachable(format!("MyFitnessPal home page: HTTP {}", home.status)));
        }
        let token = AUTHENTICITY_TOKEN
            .captures(&home.body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| Error::unreachable("MyFitnessPal login form has no authenticity token"))?;

        let request = HttpRequest::post(format!("{}/account/login", self.base))
            .form("utf8", "\u{2713}")
            .form("authenticity_token", token)
            .form("username", username)
            .form("password", password)
            .form("remember_me", "1");
        let response = session.send(request).await?;
        if response.status >= 500 {
            return Err(Error::unreachable(format!("MyFitnessPal login: HTTP {}", response.status)));
        }

        let rejected = REJECTIONS.iter().any(|message| response.body.contains(message));
        debug!(status = response.status, rejected, "MyFitnessPal login answered");
        Ok(!rejected)
    }
}

#[async_trait]
impl ProviderAdapter for MyFitnessPalAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "MyFitnessPal"
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
            return Err(Error::auth_rejected("Incorrect username or password"));
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

    fn history_window(&self) -> Option<i64> {
        Some(TWO_YEARS_SECS)
    }

    fn min_update_interval(&self) -> Option<i64> {
        Some(MIN_UPDATE_INTERVAL_SECS)
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
            return Err(Error::auth_expired("MyFitnessPal no longer accepts the stored password"));
        }

        let days = report_days(window);
        Ok(TEMPLATES
            .iter()
            .map(|template| EndpointPlan::new(template.key, self.report_request(template.variable, days)))
            .collect())
    }

    fn parse_page(
        &self,
        plan: &EndpointPlan,
        _request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        let records = parse_report(&response.body, Utc::now().date_naive(), &plan.key)?;
        Ok(Page::last(records))
    }
}

/// Factory for the MyFitnessPal adapter
pub struct MyFitnessPalFactory;

impl AdapterFactory for MyFitnessPalFactory {
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(MyFitnessPalAdapter::new(config)))
    }
}

/// Register the MyFitnessPal adapter with a registry
pub fn register(registry: &AdapterRegistry) {
    registry.register_adapter(NAME, Box::new(MyFitnessPalFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdsync_core::ErrorKind;
    use hdsync_core::model::ConnectParameters;
    use hdsync_core::traits::Transport;
    use hdsync_http::ReqwestTransport;
    use mockito::{Matcher, Server, ServerGuard};

    const HOME: &str = r#"<form action="/account/login" method="post">
        <input name="authenticity_token" type="hidden" value="tok+123=" />
        </form>"#;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn midnight(year: i32, month: u32, day: u32) -> i64 {
        date(year, month, day).and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp()
    }

    fn credentials() -> ConnectParameters {
        [("username", "ada"), ("password", "secret")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn server_with_login(login_body: &str) -> ServerGuard {
        let mut server = Server::new_async().await;
        server.mock("GET", "/").with_body(HOME).create_async().await;
        server
            .mock("POST", "/account/login")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("authenticity_token=tok%2B123%3D".into()),
                Matcher::Regex("username=ada".into()),
                Matcher::Regex("remember_me=1".into()),
            ]))
            .with_body(login_body)
            .create_async()
            .await;
        server
    }

    async fn connect(adapter: &MyFitnessPalAdapter, session: &dyn HttpSession) -> Result<ConnectOutcome> {
        let parameters = credentials();
        let context = ConnectContext {
            user_id: "u1",
            parameters: &parameters,
            pending: None,
        };
        adapter.connect(session, context).await
    }

    #[test]
    fn test_parse_report_recovers_years() {
        let body = r#"{"title": "Carbs", "data": [
            {"date": "12/30", "total": 210.5},
            {"date": "12/31", "total": 0},
            {"date": "1/1", "total": 180},
            {"date": "1/2", "total": 95.25}
        ]}"#;
        let records = parse_report(body, date(2014, 1, 2), "carbs").unwrap();
        assert_eq!(
            records,
            vec![
                RawRecord::new("carbs", midnight(2013, 12, 30), 210.5),
                RawRecord::new("carbs", midnight(2014, 1, 1), 180.0),
                RawRecord::new("carbs", midnight(2014, 1, 2), 95.25),
            ]
        );
    }

    #[test]
    fn test_parse_report_skips_unreadable_days() {
        let body = r#"{"data": [{"date": "2/30", "total": 5}, {"date": "today", "total": 7}, {"date": "3/1", "total": 9}]}"#;
        let records = parse_report(body, date(2014, 3, 1), "iron").unwrap();
        assert_eq!(records, vec![RawRecord::new("iron", midnight(2014, 3, 1), 9.0)]);

        assert!(parse_report(r#"{"data": []}"#, date(2014, 3, 1), "iron").unwrap().is_empty());
        let err = parse_report("<html>", date(2014, 3, 1), "iron").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_report_days_rounds_and_caps() {
        let now = 1_400_000_000;
        let window = |span: i64| SyncWindow { from_time: now - span, now };
        assert_eq!(report_days(window(86_400 * 3)), 3);
        assert_eq!(report_days(window(86_400 * 3 + 50_000)), 4);
        assert_eq!(report_days(window(3_600)), 1);
        assert_eq!(report_days(window(TWO_YEARS_SECS)), MAX_DAYS);
    }

    #[test]
    fn test_report_request_encodes_nutrient() {
        let adapter = MyFitnessPalAdapter::new(&ConnectorConfig::new(NAME));
        let request = adapter.report_request("Saturated Fat", 7);
        assert_eq!(
            request.url,
            "https://www.myfitnesspal.com/reports/results/nutrition/Saturated%20Fat/7.json"
        );
        assert_eq!(request.query_value("report_name"), Some("1"));
    }

    #[tokio::test]
    async fn test_connect_logs_in() {
        let server = server_with_login("<html>Welcome back</html>").await;
        let adapter = MyFitnessPalAdapter::new(&ConnectorConfig::new(NAME).with_api_base(server.url()));
        let session = ReqwestTransport::new().session().unwrap();

        let outcome = connect(&adapter, session.as_ref()).await.unwrap();
        assert_eq!(
            outcome,
            ConnectOutcome::Connected(
                Credentials::new().with("username", "ada").with("password", "secret")
            )
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_password() {
        let server = server_with_login("<p>Incorrect username or password. Please try again.</p>").await;
        let adapter = MyFitnessPalAdapter::new(&ConnectorConfig::new(NAME).with_api_base(server.url()));
        let session = ReqwestTransport::new().session().unwrap();

        let err = connect(&adapter, session.as_ref()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRejected);
    }

    #[tokio::test]
    async fn test_missing_token_is_unreachable() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/").with_body("<html>maintenance</html>").create_async().await;
        let adapter = MyFitnessPalAdapter::new(&ConnectorConfig::new(NAME).with_api_base(server.url()));
        let session = ReqwestTransport::new().session().unwrap();

        let err = connect(&adapter, session.as_ref()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnreachable);
    }

    #[tokio::test]
    async fn test_plan_requests_every_nutrient() {
        let server = server_with_login("<html>Welcome back</html>").await;
        let adapter = MyFitnessPalAdapter::new(&ConnectorConfig::new(NAME).with_api_base(server.url()));
        let session = ReqwestTransport::new().session().unwrap();
        let stored = Credentials::new().with("username", "ada").with("password", "secret");
        let window = SyncWindow { from_time: 1_400_000_000 - 86_400 * 5, now: 1_400_000_000 };

        let plans = adapter.plan(session.as_ref(), &stored, window).await.unwrap();
        assert_eq!(plans.len(), 16);
        assert_eq!(plans[0].key, "carbs");
        assert_eq!(plans[0].metrics, vec!["carbs".to_string()]);
        assert!(plans[0].request.url.ends_with("/reports/results/nutrition/Carbs/5.json"));
        assert!(plans.iter().all(|plan| plan.request.query_value("report_name") == Some("1")));
    }

    #[tokio::test]
    async fn test_plan_with_rejected_password_expires() {
        let server = server_with_login("You have exceeded the maximum number of consecutive failed login attempts").await;
        let adapter = MyFitnessPalAdapter::new(&ConnectorConfig::new(NAME).with_api_base(server.url()));
        let session = ReqwestTransport::new().session().unwrap();
        let stored = Credentials::new().with("username", "ada").with("password", "secret");
        let window = SyncWindow { from_time: 0, now: 1_400_000_000 };

        let err = adapter.plan(session.as_ref(), &stored, window).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
    }

    #[test]
    fn test_templates_sum_nutrition() {
        let adapter = MyFitnessPalAdapter::new(&ConnectorConfig::new(NAME));
        assert!(adapter
            .templates()
            .iter()
            .all(|t| t.category == "Nutrition" && t.operation == CombinationOperation::Sum));
        assert_eq!(adapter.template("vitamin_c").map(|t| t.unit), Some("%RDA"));
        assert_eq!(adapter.min_update_interval(), Some(43_200));
    }
}
