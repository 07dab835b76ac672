// # Memory Sink
//
// Keeps accepted measurement sets per user, in arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::screen;
use crate::error::Result;
use crate::model::{MeasurementSet, unix_now};
use crate::traits::{MeasurementSink, StoreReport};

/// In-memory measurement sink
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<RwLock<HashMap<String, Vec<MeasurementSet>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything stored for a user
    pub async fn sets(&self, user_id: &str) -> Vec<MeasurementSet> {
        self.inner
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total measurements stored for a user
    pub async fn count(&self, user_id: &str) -> usize {
        self.inner
            .read()
            .await
            .get(user_id)
            .map_or(0, |sets| sets.iter().map(MeasurementSet::len).sum())
    }
}

#[async_trait]
impl MeasurementSink for MemorySink {
    async fn store_measurements(&self, user_id: &str, sets: &[MeasurementSet]) -> Result<StoreReport> {
        let now = unix_now();
        let mut report = StoreReport::default();
        let mut accepted = Vec::new();

        for set in sets {
            match screen(set, now) {
                Ok(screened) => {
                    report.errors.extend(screened.errors);
                    if screened.set.is_empty() {
                        continue;
                    }
                    report.count += screened.set.len();
                    if !report.modified_variables.contains(&screened.set.variable_name) {
                        report.modified_variables.push(screened.set.variable_name.clone());
                    }
                    accepted.push(screened.set);
                }
                Err(message) => report.errors.push(message),
            }
        }

        if !accepted.is_empty() {
            self.inner
                .write()
                .await
                .entry(user_id.to_string())
                .or_default()
                .extend(accepted);
        }
        Ok(report)
    }
}
