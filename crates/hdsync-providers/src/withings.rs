// # Withings Adapter
//
// Two endpoints, both OAuth 1.0a signed and addressed by the `userid`
// returned with the access token:
//
// - body measures: `GET /measure?action=getmeas&startdate&enddate`,
//   paged with `more`/`offset`; only category 1 (real measures) counts
// - daily activity: `GET /v2/measure?action=getactivity&startdateymd&enddateymd`
//
// Withings reports errors with HTTP 200 and a numeric `status` in the
// body, checked by `inspect_body`.

use async_trait::async_trait;
use hdsync_core::classifier::Outcome;
use hdsync_core::config::ConnectorConfig;
use hdsync_core::model::{
    CombinationOperation, ConnectInstructions, ConnectOutcome, Credentials, MeasurementSetTemplate,
};
use hdsync_core::traits::{
    AdapterFactory, ConnectContext, Cursor, EndpointPlan, HttpRequest, HttpResponse, HttpSession,
    Page, ProviderAdapter, RawRecord, SyncWindow,
};
use hdsync_core::{AdapterRegistry, Result};
use serde::Deserialize;

use crate::oauth::OAuth1Flow;
use crate::{TWO_YEARS_SECS, connect_url, date_timestamp, format_date, json_number};

const NAME: &str = "withings";
const API_BASE: &str = "https://wbsapi.withings.net";
const AUTH_BASE: &str = "https://oauth.withings.com";

const USER_ID: &str = "userid";
const STATUS_OK: i64 = 0;
const STATUS_TOO_MANY_REQUESTS: i64 = 601;

/// Body measure groups of this category are real measurements
const CATEGORY_MEASURE: i64 = 1;

const BODY_ENDPOINT: &str = "measure";
const ACTIVITY_ENDPOINT: &str = "activity";

/// Catalogued `status` codes that will not heal on retry
static STATUS_CATALOG: &[(i64, &str)] = &[
    (247, "The userid provided is absent, or incorrect"),
    (250, "The provided userid and/or Oauth credentials do not match"),
    (286, "No such subscription was found"),
    (293, "The callback URL is either absent or incorrect"),
    (294, "No such subscription could be deleted"),
    (304, "The comment is either absent or incorrect"),
    (305, "Too many notifications are already set"),
    (342, "The signature (using Oauth) is invalid"),
    (343, "Wrong Notification Callback Url don't exist"),
    (2554, "Unspecified unknown error occurred"),
    (2555, "An unknown error occurred"),
];

/// Body measure type to metric key
static BODY_TYPES: &[(i64, &str)] = &[
    (1, "weight"),
    (4, "height"),
    (5, "fat_free_mass"),
    (6, "fat_ratio"),
    (8, "fat_mass_weight"),
    (9, "diastolic_blood_pressure"),
    (10, "systolic_blood_pressure"),
    (11, "heart_pulse"),
];

static ACTIVITY_FIELDS: &[&str] = &["steps", "distance", "calories", "elevation"];

static TEMPLATES: &[MeasurementSetTemplate] = &[
    MeasurementSetTemplate::new("weight", "Weight", "Physique", "kg", CombinationOperation::Mean),
    MeasurementSetTemplate::new("height", "Height", "Physique", "m", CombinationOperation::Mean),
    MeasurementSetTemplate::new("fat_free_mass", "fatFreeMass", "Physique", "kg", CombinationOperation::Mean),
    MeasurementSetTemplate::new("fat_ratio", "Fat Ratio", "Physique", "%", CombinationOperation::Mean),
    MeasurementSetTemplate::new("fat_mass_weight", "fatMassWeight", "Physique", "kg", CombinationOperation::Mean),
    MeasurementSetTemplate::new("diastolic_blood_pressure", "Diastolic Pressure", "Vital Signs", "mmHg", CombinationOperation::Mean),
    MeasurementSetTemplate::new("systolic_blood_pressure", "Systolic Pressure", "Vital Signs", "mmHg", CombinationOperation::Mean),
    MeasurementSetTemplate::new("heart_pulse", "Heart Rate", "Vital Signs", "bpm", CombinationOperation::Mean),
    MeasurementSetTemplate::new("steps", "Steps", "Physical Activity", "count", CombinationOperation::Sum),
    MeasurementSetTemplate::new("distance", "Distance", "Physical Activity", "m", CombinationOperation::Sum),
    MeasurementSetTemplate::new("calories", "Calories Burned", "Physical Activity", "kcal", CombinationOperation::Sum),
    MeasurementSetTemplate::new("elevation", "Elevation", "Physical Activity", "m", CombinationOperation::Sum),
];

/// Classify a body `status` code
pub fn classify_status(status: i64) -> Option<Outcome> {
    match status {
        STATUS_OK => None,
        STATUS_TOO_MANY_REQUESTS => Some(Outcome::RateLimited),
        code => Some(
            match STATUS_CATALOG.iter().find(|(c, _)| *c == code) {
                Some((_, message)) => Outcome::Fatal(format!("Withings says: {}", message)),
                None => Outcome::Transient(format!("Withings says: unknown error code {}", code)),
            },
        ),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: i64,
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StatusOnly {
    status: i64,
}

#[derive(Debug, Deserialize)]
struct MeasureBody {
    #[serde(default)]
    measuregrps: Vec<MeasureGroup>,
    #[serde(default)]
    more: serde_json::Value,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MeasureGroup {
    date: i64,
    category: i64,
    #[serde(default)]
    measures: Vec<Measure>,
}

#[derive(Debug, Deserialize)]
struct Measure {
    #[serde(rename = "type")]
    kind: i64,
    value: f64,
    unit: i32,
}

#[derive(Debug, Deserialize)]
struct ActivityBody {
    #[serde(default)]
    activities: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Withings adapter
#[derive(Debug)]
pub struct WithingsAdapter {
    api_base: String,
    callback_url: String,
    oauth: OAuth1Flow,
}

impl WithingsAdapter {
    pub fn new(config: &ConnectorConfig) -> Result<Self> {
        let auth_base = config.api_base_or(AUTH_BASE);
        let callback_url = connect_url(config, NAME);
        Ok(Self {
            api_base: config.api_base_or(API_BASE).to_string(),
            oauth: OAuth1Flow {
                provider: "Withings",
                consumer_key: config.require_client_id()?.to_string(),
                consumer_secret: config.require_client_secret()?.to_string(),
                request_token_url: format!("{}/account/request_token", auth_base),
                authorize_url: format!("{}/account/authorize", auth_base),
                access_token_url: format!("{}/account/access_token", auth_base),
                callback_url: callback_url.clone(),
                keep_fields: &[USER_ID],
            },
            callback_url,
        })
    }

    fn parse_measures(&self, request: &HttpRequest, body: MeasureBody) -> Page {
        let records = body
            .measuregrps
            .iter()
            .filter(|group| group.category == CATEGORY_MEASURE)
            .flat_map(|group| {
                group.measures.iter().filter_map(move |measure| {
                    let (_, key) = BODY_TYPES.iter().find(|(kind, _)| *kind == measure.kind)?;
                    let value = measure.value * 10f64.powi(measure.unit);
                    Some(RawRecord::new(*key, group.date, value))
                })
            })
            .collect();

        let more = match &body.more {
            serde_json::Value::Bool(more) => *more,
            other => json_number(other).is_some_and(|n| n != 0.0),
        };
        let next = match (more, body.offset) {
            (true, Some(offset)) => {
                let mut next = request.clone();
                next.query.retain(|(k, _)| k != "offset");
                Some(Cursor::Request(next.query("offset", offset)))
            }
            _ => None,
        };
        Page::new(records, next)
    }

    fn parse_activities(&self, body: ActivityBody) -> Result<Page> {
        let mut records = Vec::new();
        for day in body.activities {
            let Some(date) = day.get("date").and_then(|d| d.as_str()) else {
                continue;
            };
            let timestamp = date_timestamp(date)?;
            for field in ACTIVITY_FIELDS {
                if let Some(value) = day.get(*field).and_then(json_number) {
                    records.push(RawRecord::new(*field, timestamp, value));
                }
            }
        }
        Ok(Page::last(records))
    }
}

#[async_trait]
impl ProviderAdapter for WithingsAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Withings"
    }

    fn connect_instructions(&self, _user_id: &str) -> ConnectInstructions {
        ConnectInstructions {
            authorization_url: self.callback_url.clone(),
            parameters: Vec::new(),
            use_popup: true,
        }
    }

    async fn connect(
        &self,
        session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome> {
        self.oauth.connect(session, context).await
    }

    fn templates(&self) -> &'static [MeasurementSetTemplate] {
        TEMPLATES
    }

    fn history_window(&self) -> Option<i64> {
        Some(TWO_YEARS_SECS)
    }

    fn inspect_body(&self, response: &HttpResponse) -> Option<Outcome> {
        let status: StatusOnly = serde_json::from_str(&response.body).ok()?;
        classify_status(status.status)
    }

    async fn plan(
        &self,
        _session: &dyn HttpSession,
        credentials: &Credentials,
        window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>> {
        let auth = self.oauth.signing(credentials)?;
        let user_id = credentials.require(USER_ID)?;

        let body = HttpRequest::get(format!("{}/measure", self.api_base))
            .query("action", "getmeas")
            .query(USER_ID, user_id)
            .query("startdate", window.from_time)
            .query("enddate", window.now)
            .auth(auth.clone());
        let activity = HttpRequest::get(format!("{}/v2/measure", self.api_base))
            .query("action", "getactivity")
            .query(USER_ID, user_id)
            .query("startdateymd", format_date(window.from_time))
            .query("enddateymd", format_date(window.now))
            .auth(auth);

        Ok(vec![
            EndpointPlan::new(BODY_ENDPOINT, body)
                .metrics(BODY_TYPES.iter().map(|(_, key)| *key)),
            EndpointPlan::new(ACTIVITY_ENDPOINT, activity).metrics(ACTIVITY_FIELDS.iter().copied()),
        ])
    }

    fn parse_page(
        &self,
        plan: &EndpointPlan,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        if plan.key == BODY_ENDPOINT {
            let envelope: Envelope<MeasureBody> = response.json()?;
            match envelope.body {
                Some(body) if envelope.status == STATUS_OK => Ok(self.parse_measures(request, body)),
                _ => Ok(Page::default()),
            }
        } else {
            let envelope: Envelope<ActivityBody> = response.json()?;
            match envelope.body {
                Some(body) if envelope.status == STATUS_OK => self.parse_activities(body),
                _ => Ok(Page::default()),
            }
        }
    }
}

/// Factory for the Withings adapter
pub struct WithingsFactory;

impl AdapterFactory for WithingsFactory {
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(WithingsAdapter::new(config)?))
    }
}

/// Register the Withings adapter with a registry
pub fn register(registry: &AdapterRegistry) {
    registry.register_adapter(NAME, Box::new(WithingsFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdsync_core::ErrorKind;
    use hdsync_core::traits::Transport;

    fn adapter() -> WithingsAdapter {
        WithingsAdapter::new(&ConnectorConfig::new(NAME).with_client("ck", "cs")).unwrap()
    }

    fn credentials() -> Credentials {
        Credentials::new()
            .with("oauth_token", "t")
            .with("oauth_token_secret", "ts")
            .with(USER_ID, "1234")
    }

    async fn plans() -> Vec<EndpointPlan> {
        let session = hdsync_http::ReqwestTransport::new().session().unwrap();
        let window = SyncWindow {
            from_time: 1_298_937_600,
            now: 1_299_196_800,
        };
        adapter().plan(session.as_ref(), &credentials(), window).await.unwrap()
    }

    #[test]
    fn test_status_catalog() {
        assert_eq!(classify_status(0), None);
        assert_eq!(classify_status(601), Some(Outcome::RateLimited));
        assert_eq!(
            classify_status(342),
            Some(Outcome::Fatal("Withings says: The signature (using Oauth) is invalid".to_string()))
        );
        assert!(matches!(classify_status(9999), Some(Outcome::Transient(_))));
    }

    #[test]
    fn test_inspect_body_feeds_classifier() {
        let adapter = adapter();
        let response = HttpResponse::new(200, r#"{"status": 250}"#);
        let outcome = adapter
            .classifier()
            .classify(response.status, adapter.inspect_body(&response));
        assert!(matches!(outcome, Outcome::Fatal(_)));

        let ok = HttpResponse::new(200, r#"{"status": 0, "body": {}}"#);
        assert_eq!(adapter.inspect_body(&ok), None);
        assert_eq!(adapter.inspect_body(&HttpResponse::new(200, "<html>")), None);
    }

    #[tokio::test]
    async fn test_plan_addresses_user() {
        let plans = plans().await;
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].request.query_value("userid"), Some("1234"));
        assert_eq!(plans[0].request.query_value("startdate"), Some("1298937600"));
        assert_eq!(plans[1].request.url, "https://wbsapi.withings.net/v2/measure");
        assert_eq!(plans[1].request.query_value("startdateymd"), Some("2011-03-01"));
        assert_eq!(plans[1].request.query_value("enddateymd"), Some("2011-03-04"));
        assert_eq!(plans[0].metrics.len(), 8);
    }

    #[tokio::test]
    async fn test_plan_without_userid_expires_auth() {
        let session = hdsync_http::ReqwestTransport::new().session().unwrap();
        let credentials = Credentials::new()
            .with("oauth_token", "t")
            .with("oauth_token_secret", "ts");
        let err = adapter()
            .plan(session.as_ref(), &credentials, SyncWindow { from_time: 0, now: 0 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
    }

    #[tokio::test]
    async fn test_parse_measures_scales_and_pages() {
        let plans = plans().await;
        let body = r#"{"status": 0, "body": {
            "more": 1, "offset": 2,
            "measuregrps": [
                {"grpid": 1, "date": 1298960000, "category": 1, "measures": [
                    {"value": 79300, "type": 1, "unit": -3},
                    {"value": 120, "type": 10, "unit": 0},
                    {"value": 5, "type": 77, "unit": 0}
                ]},
                {"grpid": 2, "date": 1298970000, "category": 2, "measures": [
                    {"value": 90000, "type": 1, "unit": -3}
                ]}
            ]
        }}"#;
        let page = adapter()
            .parse_page(&plans[0], &plans[0].request, &HttpResponse::new(200, body))
            .unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].metric, "weight");
        assert!((page.records[0].value - 79.3).abs() < 1e-9);
        assert_eq!(page.records[1], RawRecord::new("systolic_blood_pressure", 1_298_960_000, 120.0));

        let Some(Cursor::Request(next)) = page.next else {
            panic!("Expected an offset cursor");
        };
        assert_eq!(next.query_value("offset"), Some("2"));
        assert_eq!(next.query_value("userid"), Some("1234"));
    }

    #[tokio::test]
    async fn test_parse_activities() {
        let plans = plans().await;
        let body = r#"{"status": 0, "body": {"activities": [
            {"date": "2011-03-01", "timezone": "Europe/Paris", "steps": 8000, "distance": 6100.5, "calories": 310.2, "elevation": 12},
            {"date": "2011-03-02", "timezone": "Europe/Paris", "steps": 4000}
        ]}}"#;
        let page = adapter()
            .parse_page(&plans[1], &plans[1].request, &HttpResponse::new(200, body))
            .unwrap();

        assert_eq!(page.records.len(), 5);
        assert_eq!(page.records[0], RawRecord::new("steps", 1_298_937_600, 8000.0));
        assert_eq!(page.records[4], RawRecord::new("steps", 1_299_024_000, 4000.0));
        assert!(page.next.is_none());
    }
}
