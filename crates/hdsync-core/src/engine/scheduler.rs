//! Periodic sync rounds
//!
//! Every `sync_interval_secs` the scheduler runs one incremental
//! [`SyncEngine::sync_and_store`] per stored `(user, connector)` pair,
//! at most `connector_concurrency` at a time. Pairs are independent: a
//! failing connector is logged and retried on the next round, unless a
//! fatal provider error blocked it. Blocked pairs count as failed every
//! round until [`SyncEngine::clear_fatal`] is called.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

use super::SyncEngine;
use crate::config::SchedulerConfig;
use crate::error::{ErrorKind, Result};
use crate::traits::MeasurementSink;

/// Counters of one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub measurements: usize,
}

/// Drives periodic syncs of every connected pair
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    sink: Arc<dyn MeasurementSink>,
    interval: Duration,
    connector_concurrency: usize,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        sink: Arc<dyn MeasurementSink>,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            sink,
            interval: Duration::from_secs(config.sync_interval_secs),
            connector_concurrency: config.connector_concurrency,
        })
    }

    /// Run rounds until SIGINT
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run rounds until `shutdown_rx` fires (or SIGINT when `None`)
    ///
    /// An in-progress round is abandoned on shutdown; pairs it did not
    /// finish keep their previous `last_sync`.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let mut ticks = IntervalStream::new(tokio::time::interval(self.interval));
        info!("Scheduler started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                tick = ticks.next() => {
                    if tick.is_none() {
                        break;
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            tokio::select! {
                summary = self.run_round() => {
                    info!(
                        synced = summary.synced,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        measurements = summary.measurements,
                        "Sync round finished"
                    );
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received during sync round");
                    break;
                }
            }
        }

        self.engine.credentials().backend().flush().await?;
        info!("Credentials flushed, scheduler stopped");
        Ok(())
    }

    /// Sync every stored pair once
    pub async fn run_round(&self) -> RoundSummary {
        let mut summary = RoundSummary::default();

        let pairs = match self.engine.credentials().backend().list().await {
            Ok(pairs) => pairs,
            Err(e) => {
                error!("Failed to list connections: {}", e);
                return summary;
            }
        };
        let known = self.engine.connectors();

        let semaphore = Arc::new(Semaphore::new(self.connector_concurrency));
        let mut tasks = JoinSet::new();

        for (user_id, connector) in pairs {
            if !known.iter().any(|name| *name == connector) {
                debug!(user_id = %user_id, connector = %connector, "No adapter configured, skipping");
                summary.skipped += 1;
                continue;
            }
            let engine = self.engine.clone();
            let sink = self.sink.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return PairOutcome::Skipped;
                };
                match engine.sync_and_store(&user_id, &connector, sink.as_ref()).await {
                    Ok((result, report)) if result.blocked => {
                        error!(
                            user_id = %user_id,
                            connector = %connector,
                            stored = report.count,
                            "Sync hit a fatal provider error, connector blocked"
                        );
                        PairOutcome::Failed(report.count)
                    }
                    Ok((result, report)) => {
                        debug!(
                            user_id = %user_id,
                            connector = %connector,
                            stored = report.count,
                            partial_errors = result.partial_errors.len(),
                            "Pair synchronized"
                        );
                        PairOutcome::Synced(report.count)
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::UpdateTooSoon | ErrorKind::NotConnected) => {
                        debug!(user_id = %user_id, connector = %connector, "Skipping: {}", e);
                        PairOutcome::Skipped
                    }
                    Err(e) if e.kind() == ErrorKind::Blocked => {
                        error!(user_id = %user_id, connector = %connector, error = %e, "Connector blocked");
                        PairOutcome::Failed(0)
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, connector = %connector, error = %e, "Sync failed");
                        PairOutcome::Failed(0)
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(PairOutcome::Synced(count)) => {
                    summary.synced += 1;
                    summary.measurements += count;
                }
                Ok(PairOutcome::Skipped) => summary.skipped += 1,
                Ok(PairOutcome::Failed(count)) => {
                    summary.failed += 1;
                    summary.measurements += count;
                }
                Err(e) => {
                    error!("Sync task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

enum PairOutcome {
    Synced(usize),
    Skipped,
    /// Measurements stored before the failure, if any
    Failed(usize),
}
