//! Mod Repository Request Broker
//!
//! Client-side broker for a mod-hosting REST API. Callers submit typed
//! requests; the broker queues them, keeps a bounded number in flight, follows
//! permanent redirects, tracks the server's rate-limit quota, and hands back
//! exactly one outcome per request.
//!
//! # Architecture
//!
//! - [`broker`] - Queue, dispatcher, response classification, stats and observers
//! - [`request`] - Request kinds, per-request options and endpoint construction
//! - [`transport`] - The [`Transport`](transport::Transport) seam and its reqwest implementation
//! - [`config`] - Broker settings and the optional TOML config file
//! - [`auth`] - Session cookie jar seeded from Netscape cookie exports
//! - [`cache`] - Response cache directory administration
//! - [`credentials`] / [`registry`] - Collaborators supplying API keys and game metadata

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod broker;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod registry;
pub mod request;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use broker::{
    ApiStats, Broker, BrokerBuilder, BrokerError, Failure, FailureKind, FileList, FileRecord,
    Outcome, Payload, RateLimits, SubmitError, Ticket,
};
pub use config::{BrokerConfig, ConfigError};
pub use credentials::{AccountTier, CredentialProvider, Credentials, StaticCredentials};
pub use registry::{GameDescriptor, GameRegistry, PassthroughGameRegistry, StaticGameRegistry};
pub use request::{
    AllowedErrors, ApiRequest, DownloadGrant, RequestId, RequestKind, RequestOptions,
    UpdatePeriod,
};
pub use transport::{ApiCall, Exchange, Transport, TransportError, TransportErrorKind};
