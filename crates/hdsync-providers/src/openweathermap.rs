// # OpenWeatherMap Adapter
//
// Key-based JSON API. The user supplies a free-text location, checked
// once at connect time; updates read the current conditions for it and
// record them as the day's reading (midnight UTC of the observation).
//
// ## Errors
//
// - `cod: 404` in the body: the location is unknown. Rejected on connect,
//   fatal on update
// - HTTP 401: the operator's API key is invalid, fatal rather than a
//   reason to drop the user's location

use async_trait::async_trait;
use hdsync_core::classifier::{Outcome, ResponseClassifier};
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
use serde::Deserialize;

use crate::{connect_url, json_number};

const NAME: &str = "openweathermap";
const API_BASE: &str = "https://api.openweathermap.org";
const LOCATION: &str = "location";

const TEMPERATURE: &str = "temperature";
const PRESSURE: &str = "pressure";
const HUMIDITY: &str = "humidity";

const DAY_SECS: i64 = 86_400;

static TEMPLATES: &[MeasurementSetTemplate] = &[
    MeasurementSetTemplate::new(TEMPERATURE, "Outdoor Temperature", "Environment", "K", CombinationOperation::Mean),
    MeasurementSetTemplate::new(PRESSURE, "Barometric Pressure", "Environment", "hPa", CombinationOperation::Mean),
    MeasurementSetTemplate::new(HUMIDITY, "Outdoor Humidity", "Environment", "%", CombinationOperation::Mean),
];

#[derive(Debug, Deserialize)]
struct Conditions {
    dt: i64,
    main: MainReadings,
}

#[derive(Debug, Deserialize)]
struct MainReadings {
    temp: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
}

/// The `{cod, message}` pair OpenWeatherMap embeds in every body
///
/// `cod` is a number on success and a string on errors.
fn status_code(body: &str) -> Option<(u16, String)> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let code = json_number(value.get("cod")?)? as u16;
    let message = value
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("no message")
        .to_string();
    Some((code, message))
}

/// Current conditions as one record per metric, at midnight UTC
pub fn parse_conditions(body: &str) -> Result<Vec<RawRecord>> {
    let conditions: Conditions = serde_json::from_str(body)
        .map_err(|e| Error::transient(format!("unreadable OpenWeatherMap conditions: {}", e)))?;
    let day = conditions.dt - conditions.dt.rem_euclid(DAY_SECS);

    let readings = [
        (TEMPERATURE, conditions.main.temp),
        (PRESSURE, conditions.main.pressure),
        (HUMIDITY, conditions.main.humidity),
    ];
    Ok(readings
        .into_iter()
        .filter_map(|(metric, value)| value.map(|v| RawRecord::new(metric, day, v)))
        .collect())
}

/// OpenWeatherMap adapter
pub struct OpenWeatherMapAdapter {
    api_base: String,
    api_key: String,
    connect_url: String,
}

impl std::fmt::Debug for OpenWeatherMapAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherMapAdapter")
            .field("api_base", &self.api_base)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl OpenWeatherMapAdapter {
    pub fn new(config: &ConnectorConfig) -> Result<Self> {
        Ok(Self {
            api_base: config.api_base_or(API_BASE).to_string(),
            api_key: config.require_api_key()?.to_string(),
            connect_url: connect_url(config, NAME),
        })
    }

    fn weather_request(&self, location: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/data/2.5/weather", self.api_base))
            .query("q", location)
            .query("appid", &self.api_key)
    }
}

#[async_trait]
impl ProviderAdapter for OpenWeatherMapAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "OpenWeatherMap"
    }

    fn connect_instructions(&self, _user_id: &str) -> ConnectInstructions {
        ConnectInstructions {
            authorization_url: self.connect_url.clone(),
            parameters: vec![ConnectParameter::text("Location", LOCATION)],
            use_popup: false,
        }
    }

    async fn connect(
        &self,
        session: &dyn HttpSession,
        context: ConnectContext<'_>,
    ) -> Result<ConnectOutcome> {
        let location = require_parameter(context.parameters, LOCATION)?;
        let response = session.send(self.weather_request(location)).await?;

        if let Some((404, message)) = status_code(&response.body) {
            return Err(Error::auth_rejected(format!(
                "OpenWeatherMap doesn't know '{}': {}",
                location, message
            )));
        }
        if response.status == 401 {
            return Err(Error::config("OpenWeatherMap rejected the API key"));
        }
        if !response.is_success() {
            return Err(Error::unreachable(format!(
                "OpenWeatherMap location lookup failed: HTTP {}",
                response.status
            )));
        }
        Ok(ConnectOutcome::Connected(Credentials::new().with(LOCATION, location)))
    }

    fn templates(&self) -> &'static [MeasurementSetTemplate] {
        TEMPLATES
    }

    fn classifier(&self) -> ResponseClassifier {
        ResponseClassifier::standard().with_override(
            401,
            Outcome::Fatal("OpenWeatherMap rejected the API key".to_string()),
        )
    }

    fn inspect_body(&self, response: &HttpResponse) -> Option<Outcome> {
        match status_code(&response.body)? {
            (404, message) => Some(Outcome::Fatal(format!("location not found: {}", message))),
            _ => None,
        }
    }

    async fn plan(
        &self,
        _session: &dyn HttpSession,
        credentials: &Credentials,
        _window: SyncWindow,
    ) -> Result<Vec<EndpointPlan>> {
        let request = self.weather_request(credentials.require(LOCATION)?);
        Ok(vec![
            EndpointPlan::new("weather", request).metrics([TEMPERATURE, PRESSURE, HUMIDITY]),
        ])
    }

    fn parse_page(
        &self,
        _plan: &EndpointPlan,
        _request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<Page> {
        Ok(Page::last(parse_conditions(&response.body)?))
    }
}

/// Factory for the OpenWeatherMap adapter
pub struct OpenWeatherMapFactory;

impl AdapterFactory for OpenWeatherMapFactory {
    fn create(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        Ok(Box::new(OpenWeatherMapAdapter::new(config)?))
    }
}

/// Register the OpenWeatherMap adapter with a registry
pub fn register(registry: &AdapterRegistry) {
    registry.register_adapter(NAME, Box::new(OpenWeatherMapFactory));
}
