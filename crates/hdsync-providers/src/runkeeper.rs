// # RunKeeper Adapter
//
// Reads the fitness activity feed, newest first, following the feed's
// `next` link until an activity older than `from_time` shows up.
// Only activities recorded by RunKeeper itself are counted; imported
// activities would duplicate other connectors.

use async_trait::async_trait;
use hdsync_core::config::ConnectorConfig;
use hdsync_core::model::{
    CombinationOperation, ConnectInstructions, ConnectOutcome, Credentials, MeasurementSetTemplate,
};
use hdsync_core::traits::{
    AdapterFactory, ConnectContext, Cursor, EndpointPlan, HttpRequest, HttpResponse, HttpSession,
    Page, ProviderAdapter, RawRecord, SyncWindow,
};
use hdsync_core::{AdapterRegistry, Error, Result};
use serde::Deserialize;
use tracing::debug;

use crate::oauth::OAuth2Flow;
use crate::{connect_url, naive_timestamp};

const NAME: &str = "runkeeper";
const API_BASE: &str = "https://api.runkeeper.com";
const AUTH_BASE: &str = "https://runkeeper.com";
const FEED_MEDIA_TYPE: &str = "application/vnd.com.runkeeper.FitnessActivityFeed+json";

/// `Tue, 1 Mar 2011 07:00:00`
const START_TIME_FORMATS: &[&str] = &["%a, %d %b %Y %H:%M:%S"];

const CALORIES: &str = "calories";

static TEMPLATES: &[MeasurementSetTemplate] = &[MeasurementSetTemplate::new(
    CALORIES,
    "Calories Burned",
    "Physical Activity",
    "kcal",
    CombinationOperation::Sum,
)];

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    items: Vec<Activity>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Activity {
    start_time: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    total_calories: Option<f64>,
    #[serde(default)]
    source: Option<String>,
}

/// RunKeeper adapter
#[derive(Debug)]
pub struct RunKeeperAdapter {
    api_base: String,
    oauth: OAuth2Flow,
}

impl RunKeeperAdapter {
    pub fn new(config: &ConnectorConfig) -> Result<Self> {
        let auth_base = config.api_base_or(AUTH_BASE);
        Ok(Self {
            api_base: config.api_base_or(API_BASE).to_string(),
            oauth: OAuth2Flow {
                provider: "RunKeeper",
                client_id: config.require_client_id()?.to_string(),
                client_secret: config.require_client_secret()?.to_string(),
                authorize_url: format!("{}/apps/authorize", auth_base),
                token_url: format!("{}/apps/token", auth_base),
                redirect_uri: connect_url(config, NAME),
                scopes: &[],
            },
        })
    }

    /// Feed links are relative to the API host
    fn absolute(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.api_base, link.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl ProviderAdapter for RunKeeperAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "RunKeeper"
    }

    fn connect_instructions(&self, _user_id: &str) -> ConnectInstructions {
        ConnectInstructions {
            authorization_url: self.oauth.authorization_url(),
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

    async fn plan(
        &self,
        _session: &dyn HttpSession,
        credentials: &Credentials,
        _window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>> {
        let request = HttpRequest::get(format!("{}/fitnessActivities", self.api_base))
            .header("Accept", FEED_MEDIA_TYPE)
            .auth(self.oauth.signing(credentials)?);
        Ok(vec![
            EndpointPlan::new("fitnessActivities", request)
                .metrics([CALORIES])
                .newest_first(),
        ])
    }

    fn parse_page(
        &self,
        _plan: &EndpointPlan,
        _request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        let feed: Feed = response.json()?;
        let mut records = Vec::with_capacity(feed.items.len());

        for activity in feed.items {
            let timestamp = naive_timestamp(&activity.start_time, START_TIME_FORMATS).ok_or_else(|| {
                Error::transient(format!("unreadable start_time '{}'", activity.start_time))
            })?;
            if activity.source.as_deref() != Some("RunKeeper") {
                debug!(timestamp, "Skipping imported activity");
                continue;
            }
            let Some(calories) = activity.total_calories else {
                continue;
            };
            let mut record = RawRecord::new(CALORIES, timestamp, calories);
            if let Some(duration) = activity.duration {
                record = record.with_duration(duration.round());
            }
            records.push(record);
        }

        let next = feed
            .next
            .filter(|n| !n.is_empty())
            .map(|n| Cursor::Url(self.absolute(&n)));
        Ok(Page::new(records, next))
    }
}

/// Factory for the RunKeeper adapter
pub struct RunKeeperFactory;

impl AdapterFactory for RunKeeperFactory {
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(RunKeeperAdapter::new(config)?))
    }
}

/// Register the RunKeeper adapter with a registry
pub fn register(registry: &AdapterRegistry) {
    registry.register_adapter(NAME, Box::new(RunKeeperFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdsync_core::ErrorKind;
    use hdsync_core::classifier::Outcome;
    use hdsync_core::traits::RecordOrder;

    fn adapter() -> RunKeeperAdapter {
        RunKeeperAdapter::new(&ConnectorConfig::new(NAME).with_client("id", "secret")).unwrap()
    }

    fn parse(body: &str) -> Result<Page> {
        let plan = EndpointPlan::new("fitnessActivities", HttpRequest::get("https://x"));
        adapter().parse_page(&plan, &HttpRequest::get("https://x"), &HttpResponse::new(200, body))
    }

    #[tokio::test]
    async fn test_plan_is_newest_first_with_bearer() {
        let transport = hdsync_http::ReqwestTransport::new();
        let session = hdsync_core::traits::Transport::session(&transport).unwrap();
        let credentials = Credentials::new().with("access_token", "tok");
        let plans = adapter()
            .plan(session.as_ref(), &credentials, SyncWindow { from_time: 0, now: 1 })
            .await
            .unwrap();

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].order, RecordOrder::NewestFirst);
        assert_eq!(plans[0].request.url, "https://api.runkeeper.com/fitnessActivities");
        assert_eq!(
            plans[0].request.auth,
            hdsync_core::traits::RequestAuth::Bearer("tok".to_string())
        );
    }

    #[test]
    fn test_parse_feed() {
        let page = parse(
            r#"{
                "size": 3,
                "items": [
                    {"start_time": "Wed, 2 Mar 2011 07:00:00", "duration": 1800.4, "total_calories": 250, "source": "RunKeeper"},
                    {"start_time": "Tue, 1 Mar 2011 07:00:00", "duration": 600, "total_calories": 90, "source": "Garmin"},
                    {"start_time": "Tue, 1 Mar 2011 06:00:00", "total_calories": 120.5, "source": "RunKeeper"}
                ],
                "next": "/fitnessActivities?page=1&pageSize=25"
            }"#,
        )
        .unwrap();

        assert_eq!(
            page.records,
            vec![
                RawRecord::new(CALORIES, 1_299_049_200, 250.0).with_duration(1800.0),
                RawRecord::new(CALORIES, 1_298_959_200, 120.5),
            ]
        );
        assert_eq!(
            page.next,
            Some(Cursor::Url(
                "https://api.runkeeper.com/fitnessActivities?page=1&pageSize=25".to_string()
            ))
        );
    }

    #[test]
    fn test_last_page_has_no_next() {
        let page = parse(r#"{"size": 0, "items": []}"#).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn test_unreadable_start_time_is_transient() {
        let err = parse(r#"{"items": [{"start_time": "soon", "source": "RunKeeper"}]}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_revoked_token_expires_auth() {
        assert_eq!(adapter().classifier().classify(403, None), Outcome::AuthExpired);
    }
}
