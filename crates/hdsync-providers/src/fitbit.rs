// # Fitbit Adapter
//
// One date-range request per time series:
// `GET /1/user/-/{series}/date/{from}/{today}.json`
//
// The response holds `{series with '/' replaced by '-'}: [{dateTime, value}]`.
// Consecutive equal values are dropped (Fitbit repeats the last known
// weight on every day without a weigh-in). Fitbit answers 409 when the
// hourly quota is spent.

use async_trait::async_trait;
use hdsync_core::config::ConnectorConfig;
use hdsync_core::model::{
    CombinationOperation, ConnectInstructions, ConnectOutcome, Credentials, MeasurementSetTemplate,
};
use hdsync_core::traits::{
    AdapterFactory, ConnectContext, EndpointPlan, HttpRequest, HttpResponse, HttpSession, Page,
    ProviderAdapter, RawRecord, SyncWindow,
};
use hdsync_core::{AdapterRegistry, Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

use crate::oauth::OAuth1Flow;
use crate::{TWO_YEARS_SECS, connect_url, date_timestamp, format_date, json_number};

const NAME: &str = "fitbit";
const API_BASE: &str = "https://api.fitbit.com";
const WWW_BASE: &str = "https://www.fitbit.com";

static TEMPLATES: &[MeasurementSetTemplate] = &[
    MeasurementSetTemplate::new("body/weight", "Weight", "Physique", "kg", CombinationOperation::Mean),
    MeasurementSetTemplate::new("body/bmi", "BMI", "Physique", "index", CombinationOperation::Mean),
    MeasurementSetTemplate::new("body/fat", "Body Fat", "Physique", "%", CombinationOperation::Mean),
    MeasurementSetTemplate::new("sleep/minutesAsleep", "Sleep Duration", "Sleep", "min", CombinationOperation::Sum),
    MeasurementSetTemplate::new("sleep/awakeningsCount", "Awakenings", "Sleep", "count", CombinationOperation::Sum),
    MeasurementSetTemplate::new("activities/calories", "Calories Burned", "Physical Activity", "cal", CombinationOperation::Sum),
    MeasurementSetTemplate::new("activities/steps", "Steps", "Physical Activity", "count", CombinationOperation::Sum),
    MeasurementSetTemplate::new("activities/distance", "Distance", "Physical Activity", "km", CombinationOperation::Sum),
    MeasurementSetTemplate::new("activities/elevation", "Elevation", "Physical Activity", "m", CombinationOperation::Sum),
    MeasurementSetTemplate::new("foods/log/caloriesIn", "CaloriesIn", "Nutrition", "cal", CombinationOperation::Sum),
    MeasurementSetTemplate::new("foods/log/water", "Water", "Foods", "mL", CombinationOperation::Sum),
];

#[derive(Debug, Deserialize)]
struct Point {
    #[serde(rename = "dateTime")]
    date_time: String,
    value: serde_json::Value,
}

/// Fitbit adapter
#[derive(Debug)]
pub struct FitbitAdapter {
    api_base: String,
    callback_url: String,
    oauth: OAuth1Flow,
}

impl FitbitAdapter {
    pub fn new(config: &ConnectorConfig) -> Result<Self> {
        let api_base = config.api_base_or(API_BASE).to_string();
        let www_base = config.api_base_or(WWW_BASE);
        let callback_url = connect_url(config, NAME);
        Ok(Self {
            oauth: OAuth1Flow {
                provider: "Fitbit",
                consumer_key: config.require_client_id()?.to_string(),
                consumer_secret: config.require_client_secret()?.to_string(),
                request_token_url: format!("{}/oauth/request_token", api_base),
                authorize_url: format!("{}/oauth/authorize", www_base),
                access_token_url: format!("{}/oauth/access_token", api_base),
                callback_url: callback_url.clone(),
                keep_fields: &[],
            },
            api_base,
            callback_url,
        })
    }
}

#[async_trait]
impl ProviderAdapter for FitbitAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Fitbit"
    }

    /// Points at the local connect endpoint so no request token is
    /// fetched just to show the instructions
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

    async fn plan(
        &self,
        _session: &dyn HttpSession,
        credentials: &Credentials,
        window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>> {
        let auth = self.oauth.signing(credentials)?;
        let from = format_date(window.from_time);
        let to = format_date(window.now);

        Ok(TEMPLATES
            .iter()
            .map(|template| {
                let url = format!(
                    "{}/1/user/-/{}/date/{}/{}.json",
                    self.api_base, template.key, from, to
                );
                EndpointPlan::new(template.key, HttpRequest::get(url).auth(auth.clone())).dedup()
            })
            .collect())
    }

    fn parse_page(
        &self,
        plan: &EndpointPlan,
        _request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        let mut body: HashMap<String, serde_json::Value> = response.json()?;
        let series = plan.key.replace('/', "-");
        let points: Vec<Point> = body
            .remove(&series)
            .ok_or_else(|| Error::transient(format!("response lacks '{}'", series)))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| Error::transient(format!("malformed '{}' series: {}", series, e)))
            })?;

        let records = points
            .into_iter()
            .map(|point| {
                let value = json_number(&point.value).ok_or_else(|| {
                    Error::transient(format!("non-numeric {} value on {}", series, point.date_time))
                })?;
                Ok(RawRecord::new(plan.key.clone(), date_timestamp(&point.date_time)?, value))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::last(records))
    }
}

/// Factory for the Fitbit adapter
pub struct FitbitFactory;

impl AdapterFactory for FitbitFactory {
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(FitbitAdapter::new(config)?))
    }
}

/// Register the Fitbit adapter with a registry
pub fn register(registry: &AdapterRegistry) {
    registry.register_adapter(NAME, Box::new(FitbitFactory));
}
