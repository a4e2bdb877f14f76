//! Broker error types.
//!
//! Request failures are never errors here: they arrive as
//! [`Failure`](super::Failure) inside an [`Outcome`](super::Outcome). These
//! types cover construction, submission and the admin operations.

use crate::auth::CookieError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::request::RequestId;
use crate::transport::ClientBuildError;

/// Submission was refused before the request was queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The game registry does not know the game.
    #[error("unknown game '{name}'")]
    UnknownGame { name: String },

    /// The dispatcher task is gone.
    #[error("request broker is shut down")]
    Closed,
}

impl SubmitError {
    pub(crate) fn unknown_game(name: &str) -> Self {
        Self::UnknownGame {
            name: name.to_string(),
        }
    }
}

/// Errors from building the broker, awaiting tickets and admin operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid broker configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no {name} configured")]
    MissingCollaborator { name: &'static str },

    #[error(transparent)]
    Client(#[from] ClientBuildError),

    /// The request was refused at dispatch (e.g. no usable download grant)
    /// or the broker stopped before it finished.
    #[error("request {id} ended without an outcome")]
    RequestDropped { id: RequestId },

    #[error("response cache: {0}")]
    Cache(#[from] CacheError),

    #[error("cookie store: {0}")]
    Cookies(#[from] CookieError),
}

impl BrokerError {
    pub(crate) fn missing(name: &'static str) -> Self {
        Self::MissingCollaborator { name }
    }
}
