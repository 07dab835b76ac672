// # Canonical Measurement Model
//
// Every provider record is normalized into a `Measurement`, grouped by
// metric into a `MeasurementSet`.
//
// ## Invariants
//
// - `946684800 <= timestamp <= now + 604800`
// - `value` is finite
// - `duration`, when present, is finite and non-negative
// - all five scalar fields of a set are non-empty

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Earliest accepted timestamp (2000-01-01T00:00:00Z)
pub const MIN_TIMESTAMP: i64 = 946_684_800;

/// How far into the future a timestamp may lie (one week)
pub const MAX_FUTURE_SECS: i64 = 604_800;

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A single timestamped observation
///
/// Fields are private so a `Measurement` can only be obtained through a
/// validating constructor. Deserialization validates as well.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMeasurement")]
pub struct Measurement {
    timestamp: i64,
    value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
}

/// Unchecked wire form of a [`Measurement`]
#[derive(Deserialize)]
struct RawMeasurement {
    timestamp: i64,
    value: f64,
    #[serde(default)]
    duration: Option<f64>,
}

impl TryFrom<RawMeasurement> for Measurement {
    type Error = Error;

    fn try_from(raw: RawMeasurement) -> Result<Self> {
        Self::validated(raw.timestamp, raw.value, raw.duration, unix_now())
    }
}

impl Measurement {
    /// Create a measurement, validated against the current clock
    pub fn new(timestamp: i64, value: f64) -> Result<Self> {
        Self::validated(timestamp, value, None, unix_now())
    }

    /// Create a measurement with a duration in seconds
    pub fn with_duration(timestamp: i64, value: f64, duration: f64) -> Result<Self> {
        Self::validated(timestamp, value, Some(duration), unix_now())
    }

    /// Create a measurement, validated against an explicit `now`
    pub fn validated(timestamp: i64, value: f64, duration: Option<f64>, now: i64) -> Result<Self> {
        let measurement = Self {
            timestamp,
            value,
            duration,
        };
        measurement.validate_at(now)?;
        Ok(measurement)
    }

    /// Check the invariants against an explicit `now`
    pub fn validate_at(&self, now: i64) -> Result<()> {
        if self.timestamp < MIN_TIMESTAMP {
            return Err(Error::invalid_measurement(format!(
                "timestamp {} is before {}",
                self.timestamp, MIN_TIMESTAMP
            )));
        }
        if self.timestamp > now + MAX_FUTURE_SECS {
            return Err(Error::invalid_measurement(format!(
                "timestamp {} is more than a week in the future",
                self.timestamp
            )));
        }
        if !self.value.is_finite() {
            return Err(Error::invalid_measurement(format!(
                "value {} is not finite",
                self.value
            )));
        }
        if let Some(duration) = self.duration
            && (!duration.is_finite() || duration < 0.0)
        {
            return Err(Error::invalid_measurement(format!(
                "duration {} must be a non-negative number",
                duration
            )));
        }
        Ok(())
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }
}

/// Downstream aggregation applied to a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombinationOperation {
    #[serde(rename = "SUM")]
    Sum,
    #[serde(rename = "MEAN")]
    Mean,
}

impl CombinationOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            CombinationOperation::Sum => "SUM",
            CombinationOperation::Mean => "MEAN",
        }
    }
}

impl std::fmt::Display for CombinationOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-metric mapping entry
///
/// Adapters declare one template per metric key; the engine turns the
/// records of a metric into a [`MeasurementSet`] using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementSetTemplate {
    /// Metric key used by the adapter (e.g. `activities/steps`)
    pub key: &'static str,
    pub variable: &'static str,
    pub category: &'static str,
    pub unit: &'static str,
    pub operation: CombinationOperation,
}

impl MeasurementSetTemplate {
    pub const fn new(
        key: &'static str,
        variable: &'static str,
        category: &'static str,
        unit: &'static str,
        operation: CombinationOperation,
    ) -> Self {
        Self {
            key,
            variable,
            category,
            unit,
            operation,
        }
    }
}

/// A named, typed, aggregatable collection of measurements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSet {
    pub variable_name: String,
    pub category_name: String,
    pub unit_name: String,
    pub source_name: String,
    pub combination_operation: CombinationOperation,
    pub measurements: Vec<Measurement>,
}

impl MeasurementSet {
    /// Create a set, rejecting empty scalar fields
    pub fn new(
        variable_name: impl Into<String>,
        category_name: impl Into<String>,
        unit_name: impl Into<String>,
        source_name: impl Into<String>,
        combination_operation: CombinationOperation,
        measurements: Vec<Measurement>,
    ) -> Result<Self> {
        let set = Self {
            variable_name: variable_name.into(),
            category_name: category_name.into(),
            unit_name: unit_name.into(),
            source_name: source_name.into(),
            combination_operation,
            measurements,
        };
        set.validate_fields()?;
        Ok(set)
    }

    /// Create a set from a static template
    pub fn from_template(
        template: &MeasurementSetTemplate,
        source_name: &str,
        measurements: Vec<Measurement>,
    ) -> Result<Self> {
        Self::new(
            template.variable,
            template.category,
            template.unit,
            source_name,
            template.operation,
            measurements,
        )
    }

    /// Check that all scalar fields are non-empty
    pub fn validate_fields(&self) -> Result<()> {
        let fields = [
            ("variableName", &self.variable_name),
            ("categoryName", &self.category_name),
            ("unitName", &self.unit_name),
            ("sourceName", &self.source_name),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::invalid_measurement(format!("{} is empty", name)));
            }
        }
        Ok(())
    }

    /// Full revalidation, including every measurement
    pub fn validate_at(&self, now: i64) -> Result<()> {
        self.validate_fields()?;
        for measurement in &self.measurements {
            measurement.validate_at(now)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}
