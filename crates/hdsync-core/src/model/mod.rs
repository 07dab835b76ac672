// # Data Model
//
// Value types shared by adapters, the engine and storage sinks.

pub mod connect;
pub mod measurement;

pub use connect::{
    ConnectInstructions, ConnectOutcome, ConnectParameter, ConnectParameters, ConnectResult,
    ConnectorState, Credentials, ParameterKind, optional_parameter, require_parameter,
};
pub use measurement::{
    CombinationOperation, MAX_FUTURE_SECS, MIN_TIMESTAMP, Measurement, MeasurementSet,
    MeasurementSetTemplate, unix_now,
};
