// # MoodPanda Adapter
//
// Key-based XML API. Connecting resolves the user's e-mail to a numeric
// MoodPanda user id (`0` means unknown or private); updates read the mood
// feed for a date range.
//
// MoodPanda only serves recent history and asks clients to sync at most
// twice a day.

use async_trait::async_trait;
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
use std::sync::LazyLock;
use tracing::debug;

use crate::{ONE_MONTH_SECS, connect_url, format_date, naive_timestamp};

const NAME: &str = "moodpanda";
const API_BASE: &str = "http://www.moodpanda.com/api";

/// Half a day, in seconds
const MIN_UPDATE_INTERVAL_SECS: i64 = 43_200;

const USER_ID: &str = "user_id";
const MOODS: &str = "moods";

const DATE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y %I:%M:%S %p"];

static TEMPLATES: &[MeasurementSetTemplate] = &[MeasurementSetTemplate::new(
    MOODS,
    "MoodPanda Moods",
    "Activity",
    "event",
    CombinationOperation::Mean,
)];

static USER_ID_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<UserID>\s*(-?\d+)\s*</UserID>").expect("Invalid regex"));

static FEED_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(Date|Rating)>\s*([^<]*?)\s*</(?:Date|Rating)>").expect("Invalid regex")
});

/// User id in a `user/data.ashx` response, `None` when unknown
pub fn parse_user_id(xml: &str) -> Option<u64> {
    USER_ID_TAG
        .captures(xml)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .filter(|id| *id != 0)
}

/// Mood entries of a feed response, pairing each `<Date>` with the next `<Rating>`
pub fn parse_feed(xml: &str) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut date: Option<i64> = None;

    for captures in FEED_FIELD.captures_iter(xml) {
        let (Some(tag), Some(value)) = (captures.get(1), captures.get(2)) else {
            continue;
        };
        match tag.as_str() {
            "Date" => {
                date = naive_timestamp(value.as_str(), DATE_FORMATS);
                if date.is_none() {
                    debug!(value = value.as_str(), "Skipping mood with unreadable date");
                }
            }
            _ => {
                if let (Some(timestamp), Ok(rating)) = (date.take(), value.as_str().parse::<f64>()) {
                    records.push(RawRecord::new(MOODS, timestamp, rating));
                }
            }
        }
    }
    records
}

/// MoodPanda adapter
pub struct MoodPandaAdapter {
    api_base: String,
    api_key: String,
    connect_url: String,
}

impl std::fmt::Debug for MoodPandaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoodPandaAdapter")
            .field("api_base", &self.api_base)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl MoodPandaAdapter {
    pub fn new(config: &ConnectorConfig) -> Result<Self> {
        Ok(Self {
            api_base: config.api_base_or(API_BASE).to_string(),
            api_key: config.require_api_key()?.to_string(),
            connect_url: connect_url(config, NAME),
        })
    }
}

#[async_trait]
impl ProviderAdapter for MoodPandaAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "MoodPanda"
    }

    fn connect_instructions(&self, _user_id: &str) -> ConnectInstructions {
        ConnectInstructions {
            authorization_url: self.connect_url.clone(),
            parameters: vec![ConnectParameter::text("Email", "email")],
            use_popup: false,
        }
    }

    async fn connect(
        &self,
        session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome> {
        let email = require_parameter(context.parameters, "email")?;

        let request = HttpRequest::get(format!("{}/user/data.ashx", self.api_base))
            .query("email", email)
            .query("format", "xml")
            .query("key", &self.api_key);
        let response = session.send(request).await?;
        if !response.is_success() {
            return Err(Error::unreachable(format!(
                "MoodPanda user lookup failed: HTTP {}",
                response.status
            )));
        }

        let user_id = parse_user_id(&response.body).ok_or_else(|| {
            Error::auth_rejected("MoodPanda couldn't find this user, do you have Privacy disabled?")
        })?;
        Ok(ConnectOutcome::Connected(
            Credentials::new().with(USER_ID, user_id.to_string()),
        ))
    }

    fn templates(&self) -> &'static [MeasurementSetTemplate] {
        TEMPLATES
    }

    fn history_window(&self) -> Option<i64> {
        Some(ONE_MONTH_SECS)
    }

    fn min_update_interval(&self) -> Option<i64> {
        Some(MIN_UPDATE_INTERVAL_SECS)
    }

    async fn plan(
        &self,
        _session: &dyn HttpSession,
        credentials: &Credentials,
        window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>> {
        let request = HttpRequest::get(format!("{}/user/feed/data.ashx", self.api_base))
            .query("userid", credentials.require(USER_ID)?)
            .query("from", format_date(window.from_time))
            .query("to", format_date(window.now))
            .query("format", "xml")
            .query("key", &self.api_key);
        Ok(vec![EndpointPlan::new("feed", request).metrics([MOODS])])
    }

    fn parse_page(
        &self,
        _plan: &EndpointPlan,
        _request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        Ok(Page::last(parse_feed(&response.body)))
    }
}

/// Factory for the MoodPanda adapter
pub struct MoodPandaFactory;

impl AdapterFactory for MoodPandaFactory {
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(MoodPandaAdapter::new(config)?))
    }
}

/// Register the MoodPanda adapter with a registry
pub fn register(registry: &AdapterRegistry) {
    registry.register_adapter(NAME, Box::new(MoodPandaFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdsync_core::ErrorKind;
    use hdsync_core::model::ConnectParameters;
    use hdsync_core::traits::Transport;
    use hdsync_http::ReqwestTransport;
    use mockito::{Matcher, Server};

    fn config() -> ConnectorConfig {
        ConnectorConfig::new(NAME).with_api_key("panda-key")
    }

    #[test]
    fn test_factory_requires_api_key() {
        let err = MoodPandaFactory.create(&ConnectorConfig::new(NAME)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_debug_hides_key() {
        let adapter = MoodPandaAdapter::new(&config()).unwrap();
        assert!(!format!("{:?}", adapter).contains("panda-key"));
    }

    #[test]
    fn test_parse_user_id() {
        let xml = "<MoodPanda><User><UserID>7566412</UserID><Name>m</Name></User></MoodPanda>";
        assert_eq!(parse_user_id(xml), Some(7_566_412));
        assert_eq!(parse_user_id("<User><UserID>0</UserID></User>"), None);
        assert_eq!(parse_user_id("<error/>"), None);
    }

    #[test]
    fn test_parse_feed_pairs_dates_and_ratings() {
        let xml = "<ArrayOfMoodItem>
            <MoodItem><Date>2014-05-12T10:00:00</Date><Rating>7</Rating></MoodItem>
            <MoodItem><Date>not a date</Date><Rating>3</Rating></MoodItem>
            <MoodItem><Date>2014-05-13 08:30:00</Date><Rating>5</Rating></MoodItem>
        </ArrayOfMoodItem>";
        assert_eq!(
            parse_feed(xml),
            vec![
                RawRecord::new(MOODS, 1_399_888_800, 7.0),
                RawRecord::new(MOODS, 1_399_969_800, 5.0),
            ]
        );
    }

    async fn connect(server_url: String) -> Result<ConnectOutcome> {
        let adapter = MoodPandaAdapter::new(&config().with_api_base(server_url)).unwrap();
        let session = ReqwestTransport::new().session().unwrap();
        let parameters: ConnectParameters =
            [("email".to_string(), "panda@example.com".to_string())].into_iter().collect();
        let context = ConnectContext {
            user_id: "u1",
            parameters: &parameters,
            pending: None,
        };
        adapter.connect(session.as_ref(), context).await
    }

    #[tokio::test]
    async fn test_connect_resolves_user_id() {
        let mut server = Server::new_async().await;
        let lookup = server
            .mock("GET", "/user/data.ashx")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("email".into(), "panda@example.com".into()),
                Matcher::UrlEncoded("format".into(), "xml".into()),
                Matcher::UrlEncoded("key".into(), "panda-key".into()),
            ]))
            .with_body("<MoodPanda><User><UserID>42</UserID></User></MoodPanda>")
            .create_async()
            .await;

        let outcome = connect(server.url()).await.unwrap();
        lookup.assert_async().await;
        assert_eq!(
            outcome,
            ConnectOutcome::Connected(Credentials::new().with(USER_ID, "42"))
        );
    }

    #[tokio::test]
    async fn test_connect_unknown_user_is_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/user/data.ashx")
            .match_query(Matcher::Any)
            .with_body("<MoodPanda><User><UserID>0</UserID></User></MoodPanda>")
            .create_async()
            .await;

        let err = connect(server.url()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthRejected);
        assert!(err.to_string().contains("Privacy"));
    }

    #[tokio::test]
    async fn test_connect_requires_email() {
        let adapter = MoodPandaAdapter::new(&config()).unwrap();
        let session = ReqwestTransport::new().session().unwrap();
        let parameters = ConnectParameters::new();
        let context = ConnectContext {
            user_id: "u1",
            parameters: &parameters,
            pending: None,
        };
        let err = adapter.connect(session.as_ref(), context).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
    }

    #[test]
    fn test_windows() {
        let adapter = MoodPandaAdapter::new(&config()).unwrap();
        assert_eq!(adapter.history_window(), Some(2_629_743));
        assert_eq!(adapter.min_update_interval(), Some(43_200));
    }
}
