// # Provider Adapters
//
// Adapters for the supported health-data providers. Each module exposes
// an adapter type, its factory and a `register()` function.
//
// | connector   | authorization        | paging                         |
// |-------------|----------------------|--------------------------------|
// | `github`    | OAuth2 (bearer)      | `Link: rel="next"` per repo    |
// | `runkeeper` | OAuth2 (bearer)      | `next` field, newest first     |
// | `fitbit`    | OAuth 1.0a           | one date-range request         |
// | `withings`  | OAuth 1.0a + userid  | `more`/`offset`                |
// | `moodscope` | form login (cookies) | one page per month, backwards  |
// | `moodpanda` | API key + email      | one date-range request         |
// | `openweathermap` | API key + location | current conditions only     |
// | `myfitnesspal` | form login (cookies) | one report per nutrient     |
//
// ## Boundaries
//
// Adapters describe requests and parse responses. They do not:
// - retry or back off (owned by the fetch loop)
// - store credentials (owned by the credential manager)
// - spawn tasks or keep per-user state
//
// ## Usage
//
// ```rust,ignore
// let registry = AdapterRegistry::new();
// hdsync_providers::register_all(&registry);
// let adapters = registry.create_all(&config)?;
// ```

pub mod fitbit;
pub mod github;
pub mod moodpanda;
pub mod moodscope;
pub mod myfitnesspal;
pub mod oauth;
pub mod openweathermap;
pub mod runkeeper;
pub mod withings;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use hdsync_core::classifier::{Outcome, ResponseClassifier};
use hdsync_core::config::ConnectorConfig;
use hdsync_core::traits::HttpResponse;
use hdsync_core::{AdapterRegistry, Error, Result};

pub use fitbit::FitbitAdapter;
pub use github::GithubAdapter;
pub use moodpanda::MoodPandaAdapter;
pub use moodscope::MoodscopeAdapter;
pub use myfitnesspal::MyFitnessPalAdapter;
pub use openweathermap::OpenWeatherMapAdapter;
pub use runkeeper::RunKeeperAdapter;
pub use withings::WithingsAdapter;

/// Two years, in seconds
pub const TWO_YEARS_SECS: i64 = 63_113_852;

/// One month, in seconds
pub const ONE_MONTH_SECS: i64 = 2_629_743;

/// Register every bundled adapter
pub fn register_all(registry: &AdapterRegistry) {
    github::register(registry);
    runkeeper::register(registry);
    fitbit::register(registry);
    withings::register(registry);
    moodscope::register(registry);
    moodpanda::register(registry);
    openweathermap::register(registry);
    myfitnesspal::register(registry);
}

/// `{callback_base}/connectors/{name}/connect`
pub(crate) fn connect_url(config: &ConnectorConfig, name: &str) -> String {
    format!("{}/connectors/{}/connect", config.callback_base(), name)
}

/// Fail a discovery or connect request that was not classified `Success`
///
/// Used outside the fetch loop, where no retry happens.
pub(crate) fn expect_success(
    classifier: &ResponseClassifier,
    response: &HttpResponse,
    context: &str,
) -> Result<()> {
    match classifier.classify(response.status, None) {
        Outcome::Success | Outcome::Empty => Ok(()),
        Outcome::AuthExpired => Err(Error::auth_expired(format!(
            "{} refused: HTTP {}",
            context, response.status
        ))),
        Outcome::RateLimited => Err(Error::rate_limited(format!(
            "{}: HTTP {}",
            context, response.status
        ))),
        Outcome::Transient(msg) => Err(Error::transient(format!("{}: {}", context, msg))),
        Outcome::Fatal(msg) => Err(Error::fatal(format!("{}: {}", context, msg))),
    }
}

/// Midnight UTC of a `YYYY-MM-DD` date
pub(crate) fn date_timestamp(date: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| Error::transient(format!("invalid date '{}': {}", date, e)))?;
    Ok(date.and_hms_opt(0, 0, 0).map_or(0, |dt| dt.and_utc().timestamp()))
}

/// `YYYY-MM-DD` of a Unix timestamp, in UTC
pub(crate) fn format_date(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Parse a provider timestamp without an offset as UTC
pub(crate) fn naive_timestamp(value: &str, formats: &[&str]) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|dt| dt.and_utc().timestamp())
}

/// Numeric JSON value that may be sent as a string
pub(crate) fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
