// # Measurement Sink Trait
//
// Storage collaborator receiving the measurement sets of a sync.
//
// Sinks never trust their input: every set and measurement is
// revalidated, invalid measurements are skipped and counted, invalid
// sets are rejected as a whole.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::MeasurementSet;

/// Outcome of storing a batch of sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReport {
    /// Variable names that received at least one measurement
    pub modified_variables: Vec<String>,
    /// Number of measurements stored
    pub count: usize,
    /// Human-readable validation failures
    pub errors: Vec<String>,
}

impl StoreReport {
    pub fn merge(&mut self, other: StoreReport) {
        for variable in other.modified_variables {
            if !self.modified_variables.contains(&variable) {
                self.modified_variables.push(variable);
            }
        }
        self.count += other.count;
        self.errors.extend(other.errors);
    }
}

/// Trait for measurement storage backends
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    /// Store the sets of one sync for `user_id`
    ///
    /// # Returns
    ///
    /// - `Ok(StoreReport)`: what was stored and what was rejected
    /// - `Err(Error::Storage)`: the backend failed
    async fn store_measurements(&self, user_id: &str, sets: &[MeasurementSet])
    -> Result<StoreReport>;
}
