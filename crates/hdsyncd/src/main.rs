// # hdsyncd - Health Data Sync Daemon
//
// Thin integration layer: everything that syncs lives in hdsync-core and
// the adapters in hdsync-providers. The daemon:
// 1. Reads configuration from environment variables
// 2. Builds the adapters of the enabled connectors
// 3. Opens the credential store and the measurement sink
// 4. Runs periodic sync rounds until SIGTERM or SIGINT
//
// Connecting users happens through the library API (see `demos/`); the
// daemon syncs every pair already present in the credential store.
//
// ## Configuration
//
// ### Connectors
// - `HDSYNC_CONNECTORS`: Comma-separated connector names (e.g. `github,fitbit`)
// - `HDSYNC_<CONNECTOR>_CLIENT_ID`: OAuth client id / consumer key
// - `HDSYNC_<CONNECTOR>_CLIENT_SECRET`: OAuth client secret / consumer secret
// - `HDSYNC_<CONNECTOR>_API_KEY`: API key (moodpanda, openweathermap)
// - `HDSYNC_<CONNECTOR>_API_BASE`: Override of the provider base URL
// - `HDSYNC_CALLBACK_BASE_URL`: Public base URL used in OAuth callbacks
//
// ### Storage
// - `HDSYNC_CREDENTIAL_STORE_TYPE`: `file` (default) or `memory`
// - `HDSYNC_CREDENTIAL_STORE_PATH`: Path of the credentials file
// - `HDSYNC_SINK_PATH`: JSON-lines file receiving measurement sets
//
// ### Engine
// - `HDSYNC_SYNC_INTERVAL_SECS`: Seconds between sync rounds
// - `HDSYNC_SYNC_TIMEOUT_SECS`: Deadline of one update
// - `HDSYNC_ENDPOINT_CONCURRENCY`: Endpoints fetched concurrently per update
// - `HDSYNC_CONNECTOR_CONCURRENCY`: Connectors synced concurrently per round
// - `HDSYNC_RATE_LIMIT_RETRIES`: Retries of a rate-limited page
// - `HDSYNC_HTTP_TIMEOUT_SECS`: Timeout of one HTTP exchange
// - `HDSYNC_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export HDSYNC_CONNECTORS=github,moodpanda
// export HDSYNC_GITHUB_CLIENT_ID=abc
// export HDSYNC_GITHUB_CLIENT_SECRET=def
// export HDSYNC_MOODPANDA_API_KEY=ghi
// export HDSYNC_CREDENTIAL_STORE_PATH=/var/lib/hdsync/credentials.json
// export HDSYNC_SINK_PATH=/var/lib/hdsync/measurements.jsonl
//
// hdsyncd
// ```

use anyhow::{Context, Result};
use hdsync_core::{
    AdapterRegistry, ConnectorConfig, CredentialStoreConfig, EngineConfig, EngineEvent,
    JsonLinesSink, ProviderAdapter, SchedulerConfig, SyncConfig, SyncEngine, SyncScheduler,
};
use hdsync_http::ReqwestTransport;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes, following systemd conventions
#[derive(Debug, Clone, Copy)]
enum HdsyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<HdsyncExitCode> for ExitCode {
    fn from(code: HdsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    sync: SyncConfig,
    sink_path: String,
    http_timeout_secs: u64,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let names: Vec<String> = var("HDSYNC_CONNECTORS")
            .context("HDSYNC_CONNECTORS is required. Set it via: export HDSYNC_CONNECTORS=github,fitbit")?
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let callback_base_url = var("HDSYNC_CALLBACK_BASE_URL");
        let connectors = names
            .into_iter()
            .map(|name| {
                let prefix = format!("HDSYNC_{}", name.to_uppercase());
                ConnectorConfig {
                    client_id: var(&format!("{}_CLIENT_ID", prefix)),
                    client_secret: var(&format!("{}_CLIENT_SECRET", prefix)),
                    api_key: var(&format!("{}_API_KEY", prefix)),
                    api_base: var(&format!("{}_API_BASE", prefix)),
                    callback_base_url: callback_base_url.clone(),
                    name,
                }
            })
            .collect();

        let credential_store = match var("HDSYNC_CREDENTIAL_STORE_TYPE").as_deref() {
            None | Some("file") => CredentialStoreConfig::File {
                path: var("HDSYNC_CREDENTIAL_STORE_PATH").context(
                    "HDSYNC_CREDENTIAL_STORE_PATH is required when HDSYNC_CREDENTIAL_STORE_TYPE=file",
                )?,
            },
            Some("memory") => CredentialStoreConfig::Memory,
            Some(other) => anyhow::bail!(
                "HDSYNC_CREDENTIAL_STORE_TYPE '{}' is not supported. Supported types: file, memory",
                other
            ),
        };

        let mut engine = EngineConfig::default();
        if let Some(v) = parse_var(&var, "HDSYNC_SYNC_TIMEOUT_SECS")? {
            engine.sync_timeout_secs = v;
        }
        if let Some(v) = parse_var(&var, "HDSYNC_ENDPOINT_CONCURRENCY")? {
            engine.endpoint_concurrency = v;
        }
        if let Some(v) = parse_var(&var, "HDSYNC_RATE_LIMIT_RETRIES")? {
            engine.rate_limit_retries = v;
        }

        let mut scheduler = SchedulerConfig::default();
        if let Some(v) = parse_var(&var, "HDSYNC_SYNC_INTERVAL_SECS")? {
            scheduler.sync_interval_secs = v;
        }
        if let Some(v) = parse_var(&var, "HDSYNC_CONNECTOR_CONCURRENCY")? {
            scheduler.connector_concurrency = v;
        }

        Ok(Self {
            sync: SyncConfig {
                connectors,
                credential_store,
                engine,
                scheduler,
            },
            sink_path: var("HDSYNC_SINK_PATH").context(
                "HDSYNC_SINK_PATH is required. Set it via: export HDSYNC_SINK_PATH=/var/lib/hdsync/measurements.jsonl",
            )?,
            http_timeout_secs: parse_var(&var, "HDSYNC_HTTP_TIMEOUT_SECS")?.unwrap_or(30),
            log_level: var("HDSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration against the registered adapters
    fn validate(&self, registry: &AdapterRegistry) -> Result<()> {
        self.sync.validate()?;

        for connector in &self.sync.connectors {
            if !registry.has_adapter(&connector.name) {
                anyhow::bail!(
                    "Connector '{}' is not supported. Supported connectors: {}",
                    connector.name,
                    registry.list_adapters().join(", ")
                );
            }
        }

        if let CredentialStoreConfig::File { path } = &self.sync.credential_store {
            check_parent_exists("HDSYNC_CREDENTIAL_STORE_PATH", path)?;
        }
        check_parent_exists("HDSYNC_SINK_PATH", &self.sink_path)?;

        if !(1..=600).contains(&self.http_timeout_secs) {
            anyhow::bail!(
                "HDSYNC_HTTP_TIMEOUT_SECS must be between 1 and 600 seconds. Got: {}",
                self.http_timeout_secs
            );
        }

        if self.sync.engine.rate_limit_retries > 10 {
            anyhow::bail!(
                "HDSYNC_RATE_LIMIT_RETRIES must be between 0 and 10. Got: {}",
                self.sync.engine.rate_limit_retries
            );
        }

        log_level(&self.log_level)?;
        Ok(())
    }
}

/// Parse an optional numeric variable, rejecting malformed values
fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|value| {
            value
                .parse()
                .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", name, value, e))
        })
        .transpose()
}

fn check_parent_exists(variable: &str, path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        anyhow::bail!(
            "{} parent directory does not exist: {}. Create it first: sudo mkdir -p {}",
            variable,
            parent.display(),
            parent.display()
        );
    }
    Ok(())
}

fn log_level(level: &str) -> Result<Level> {
    Ok(match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => anyhow::bail!(
            "HDSYNC_LOG_LEVEL '{}' is not valid. Valid levels: trace, debug, info, warn, error",
            level
        ),
    })
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return HdsyncExitCode::ConfigError.into();
        }
    };

    let registry = AdapterRegistry::new();
    hdsync_providers::register_all(&registry);

    if let Err(e) = config.validate(&registry) {
        eprintln!("Configuration validation error: {:#}", e);
        return HdsyncExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&config.log_level).unwrap_or(Level::INFO))
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return HdsyncExitCode::ConfigError.into();
    }

    // Missing client ids and API keys surface here
    let adapters = match registry.create_all(&config.sync) {
        Ok(adapters) => adapters,
        Err(e) => {
            error!("Failed to create adapters: {}", e);
            return HdsyncExitCode::ConfigError.into();
        }
    };

    info!("Starting hdsyncd daemon");
    info!(
        "Configuration loaded: {} connector(s): {}",
        adapters.len(),
        adapters.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return HdsyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config, adapters).await {
            error!("Daemon error: {:#}", e);
            HdsyncExitCode::RuntimeError
        } else {
            HdsyncExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal
async fn run_daemon(config: Config, adapters: Vec<Box<dyn ProviderAdapter>>) -> Result<()> {
    let store = hdsync_core::credentials::open_store(&config.sync.credential_store)
        .await
        .context("Failed to open credential store")?;
    let transport =
        Arc::new(ReqwestTransport::new().with_timeout(Duration::from_secs(config.http_timeout_secs)));

    let (engine, events) = SyncEngine::new(adapters, store, transport, config.sync.engine.clone())?;
    let engine = Arc::new(engine);
    tokio::spawn(log_events(events));

    let sink = Arc::new(JsonLinesSink::new(&config.sink_path));
    info!("Writing measurements to {}", sink.path().display());

    let scheduler = SyncScheduler::new(engine, sink, &config.sync.scheduler)?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Shutdown listener failed: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    scheduler.run_with_shutdown(Some(shutdown_rx)).await?;
    info!("Shutting down daemon");
    Ok(())
}

/// Drain engine events into the log
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::ConnectorDisconnected {
                user_id,
                connector,
                reason,
            } => warn!(%user_id, %connector, %reason, "Connector disconnected"),
            EngineEvent::SyncFailed {
                user_id,
                connector,
                error,
            } => warn!(%user_id, %connector, %error, "Sync failed"),
            EngineEvent::ConnectorBlocked {
                user_id,
                connector,
                reason,
            } => error!(%user_id, %connector, %reason, "Connector blocked until cleared"),
            other => debug!(?other, "Engine event"),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for SIGINT
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
