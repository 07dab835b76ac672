// # JSON Lines Sink
//
// Appends one JSON object per accepted measurement to a file:
//
// ```json
// {"user_id":"u1","variable":"Steps","category":"Physical Activity","unit":"count","source":"Fitbit","operation":"SUM","timestamp":1700000000,"value":8512.0}
// ```
//
// Writes from concurrent syncs are serialized; each batch is flushed
// before `store_measurements` returns.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::screen;
use crate::error::{Error, Result};
use crate::model::{CombinationOperation, MeasurementSet, unix_now};
use crate::traits::{MeasurementSink, StoreReport};

#[derive(Serialize)]
struct Line<'a> {
    user_id: &'a str,
    variable: &'a str,
    category: &'a str,
    unit: &'a str,
    source: &'a str,
    operation: CombinationOperation,
    timestamp: i64,
    value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
}

/// Append-only JSON lines sink
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    /// Create a sink appending to `path`
    ///
    /// The file and its parent directories are created on first write.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MeasurementSink for JsonLinesSink {
    async fn store_measurements(&self, user_id: &str, sets: &[MeasurementSet]) -> Result<StoreReport> {
        let now = unix_now();
        let mut report = StoreReport::default();
        let mut buffer = String::new();

        for set in sets {
            let screened = match screen(set, now) {
                Ok(screened) => screened,
                Err(message) => {
                    report.errors.push(message);
                    continue;
                }
            };
            report.errors.extend(screened.errors);

            let set = &screened.set;
            for measurement in &set.measurements {
                let line = Line {
                    user_id,
                    variable: &set.variable_name,
                    category: &set.category_name,
                    unit: &set.unit_name,
                    source: &set.source_name,
                    operation: set.combination_operation,
                    timestamp: measurement.timestamp(),
                    value: measurement.value(),
                    duration: measurement.duration(),
                };
                buffer.push_str(&serde_json::to_string(&line)?);
                buffer.push('\n');
            }
            if !set.is_empty() {
                report.count += set.len();
                if !report.modified_variables.contains(&set.variable_name) {
                    report.modified_variables.push(set.variable_name.clone());
                }
            }
        }

        if buffer.is_empty() {
            return Ok(report);
        }

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::storage(format!("Failed to open {}: {}", self.path.display(), e)))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| Error::storage(format!("Failed to append to {}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| Error::storage(format!("Failed to flush {}: {}", self.path.display(), e)))?;

        tracing::debug!(
            user = user_id,
            count = report.count,
            path = %self.path.display(),
            "Appended measurements"
        );
        Ok(report)
    }
}
