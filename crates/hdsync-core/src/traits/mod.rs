//! Core traits for the sync engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ProviderAdapter`]: One provider's connect/update contract
//! - [`CredentialStore`]: Persistent credentials per (user, connector)
//! - [`Transport`]: HTTP sessions with cookie affinity and request signing
//! - [`MeasurementSink`]: Storage backend for measurement sets

pub mod adapter;
pub mod credential_store;
pub mod sink;
pub mod transport;

pub use adapter::{
    AdapterFactory, ConnectContext, Cursor, EndpointPlan, Page, ProviderAdapter, RawRecord,
    RecordOrder, SyncWindow,
};
pub use credential_store::{CredentialRecord, CredentialStore};
pub use sink::{MeasurementSink, StoreReport};
pub use transport::{
    HttpRequest, HttpResponse, HttpSession, Method, OAuth1Params, RequestAuth, Transport,
};
