//! Transport layer between the broker and the remote API.
//!
//! The broker never talks to `reqwest` directly. It hands a fully built
//! [`ApiCall`] to a [`Transport`] and gets back an [`Exchange`]: the status,
//! headers, body, redirect target and (if the exchange failed) a
//! [`TransportError`]. Failures are data, not `Err`, so that the response
//! classifier sees every completed or aborted exchange exactly once.
//!
//! # Architecture
//!
//! - [`Transport`] - Async trait implemented by the HTTP backend and test doubles
//! - [`HttpTransport`] - `reqwest`-backed implementation (redirects are not followed)
//! - [`TransportErrorKind`] - Error class used by [`crate::request::AllowedErrors`]

mod http;

pub use http::{ClientBuildError, HttpTransport};

use std::fmt;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Classification of a failed exchange.
///
/// HTTP error statuses (4xx, 5xx) are transport errors too, each mapped to a
/// class; the numeric status stays available on the [`Exchange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportErrorKind {
    /// The remote host refused the connection.
    ConnectionRefused,
    /// DNS lookup failed.
    HostNotFound,
    /// The transport gave up waiting (connect timeout, read timeout).
    Timeout,
    /// The exchange was aborted locally (deadline reached).
    OperationCanceled,
    /// HTTP 400.
    ProtocolInvalidOperation,
    /// HTTP 401.
    AuthenticationRequired,
    /// HTTP 403.
    ContentAccessDenied,
    /// HTTP 404.
    ContentNotFound,
    /// HTTP 409.
    ContentConflict,
    /// HTTP 410.
    ContentGone,
    /// Any other 4xx status (including 429).
    UnknownContent,
    /// HTTP 500.
    InternalServerError,
    /// HTTP 503.
    ServiceUnavailable,
    /// Any other 5xx status.
    UnknownServer,
    /// Connection-level failure that does not fit another class.
    Network,
}

impl TransportErrorKind {
    /// Maps an HTTP status to its error class, or `None` for non-error statuses.
    #[must_use]
    pub fn from_status(status: u16) -> Option<Self> {
        let kind = match status {
            400 => Self::ProtocolInvalidOperation,
            401 => Self::AuthenticationRequired,
            403 => Self::ContentAccessDenied,
            404 => Self::ContentNotFound,
            409 => Self::ContentConflict,
            410 => Self::ContentGone,
            500 => Self::InternalServerError,
            503 => Self::ServiceUnavailable,
            400..=499 => Self::UnknownContent,
            500..=599 => Self::UnknownServer,
            _ => return None,
        };
        Some(kind)
    }

    /// Returns the stable label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection_refused",
            Self::HostNotFound => "host_not_found",
            Self::Timeout => "timeout",
            Self::OperationCanceled => "operation_canceled",
            Self::ProtocolInvalidOperation => "protocol_invalid_operation",
            Self::AuthenticationRequired => "authentication_required",
            Self::ContentAccessDenied => "content_access_denied",
            Self::ContentNotFound => "content_not_found",
            Self::ContentConflict => "content_conflict",
            Self::ContentGone => "content_gone",
            Self::UnknownContent => "unknown_content",
            Self::InternalServerError => "internal_server_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::UnknownServer => "unknown_server",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to an [`Exchange`] that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// Error class.
    pub kind: TransportErrorKind,
    /// Transport-supplied description.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates the error produced when an in-flight exchange is aborted.
    #[must_use]
    pub fn aborted() -> Self {
        Self::new(TransportErrorKind::OperationCanceled, "operation canceled")
    }

    /// Creates the error for an HTTP error status, or `None` if `status` is not an error.
    #[must_use]
    pub fn from_status(url: &str, status: u16, reason: Option<&str>) -> Option<Self> {
        let kind = TransportErrorKind::from_status(status)?;
        let message = match reason {
            Some(reason) => format!("error transferring {url} - server replied: {reason}"),
            None => format!("error transferring {url} - server replied: HTTP {status}"),
        };
        Some(Self::new(kind, message))
    }
}

/// A fully built outgoing call.
#[derive(Debug, Clone)]
pub struct ApiCall {
    /// HTTP verb.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Headers to send (credential, user agent, protocol headers).
    pub headers: HeaderMap,
    /// Serialized JSON body, if any.
    pub body: Option<Vec<u8>>,
}

/// Result of one transport exchange, successful or not.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    /// URL the exchange was issued against.
    pub url: String,
    /// HTTP status, `None` when no response was received.
    pub status: Option<u16>,
    /// Response headers (empty when no response was received).
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Vec<u8>,
    /// Absolute redirect target from the `Location` header, if any.
    pub redirect_target: Option<String>,
    /// Set when the exchange failed at transport level or with an HTTP error status.
    pub error: Option<TransportError>,
}

impl Exchange {
    /// Creates an exchange for a response with the given status.
    ///
    /// Error statuses get a [`TransportError`] of the matching class.
    pub fn response(url: impl Into<String>, status: u16) -> Self {
        let url = url.into();
        let error = TransportError::from_status(&url, status, None);
        Self {
            url,
            status: Some(status),
            error,
            ..Self::default()
        }
    }

    /// Creates an exchange that failed before any response arrived.
    pub fn failed(url: impl Into<String>, error: TransportError) -> Self {
        Self {
            url: url.into(),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Creates the exchange reported for an aborted call.
    pub fn aborted(url: impl Into<String>) -> Self {
        Self::failed(url, TransportError::aborted())
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds a response header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Sets the redirect target.
    #[must_use]
    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect_target = Some(target.into());
        self
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Executes [`ApiCall`]s.
///
/// # Object Safety
///
/// This trait uses `async_trait` so the broker can hold an `Arc<dyn Transport>`.
/// Implementations must never panic on network failures; every outcome is an
/// [`Exchange`].
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Issues the call and waits for the exchange to finish.
    async fn execute(&self, call: ApiCall) -> Exchange;
}
