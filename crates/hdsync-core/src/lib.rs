// # hdsync-core
//
// Core library for synchronizing personal health data from third-party
// providers.
//
// ## Architecture Overview
//
// - **ProviderAdapter**: Trait implemented once per provider (connect, plan, parse)
// - **CredentialStore**: Trait for persisting credentials per (user, connector)
// - **Transport**: Trait for HTTP sessions (cookie jar, OAuth signing)
// - **MeasurementSink**: Trait for the storage backend
// - **FetchLoop**: Paginated fetch state machine with classified terminations
// - **SyncEngine**: Orchestrates connect and update for every connector
// - **AdapterRegistry**: Plugin-based registry for adapter factories
//
// ## Design Principles
//
// 1. **Adapters describe, the engine drives**: retries, paging and
//    credential purging live in one place
// 2. **Explicit users**: `user_id` is an argument everywhere, never ambient
// 3. **Plugin-Based**: Adapters are registered dynamically
// 4. **Partial results**: one failing endpoint never discards its siblings

pub mod cancel;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod model;
pub mod registry;
pub mod sink;
pub mod traits;

// Re-export core types for convenience
pub use cancel::{CancelHandle, CancelReason, CancelSignal};
pub use classifier::{Outcome, ResponseClassifier};
pub use config::{ConnectorConfig, CredentialStoreConfig, EngineConfig, SchedulerConfig, SyncConfig};
pub use credentials::{CredentialManager, FileCredentialStore, MemoryCredentialStore};
pub use engine::{EngineEvent, PartialError, SyncEngine, SyncResult, SyncScheduler};
pub use error::{Error, ErrorKind, ErrorResponse, Result};
pub use fetch::{EndpointReport, FetchLoop, FetchPolicy, Termination};
pub use model::{CombinationOperation, Measurement, MeasurementSet, MeasurementSetTemplate};
pub use registry::AdapterRegistry;
pub use sink::{JsonLinesSink, MemorySink};
pub use traits::{CredentialStore, HttpSession, MeasurementSink, ProviderAdapter, Transport};
