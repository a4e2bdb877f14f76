//! `reqwest`-backed [`Transport`].
//!
//! The client is built once and reused for every call so connections are
//! pooled. Redirects are never followed here: a 301 must reach the response
//! classifier, which decides whether to reroute the request.

use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, instrument, warn};

use super::{ApiCall, Exchange, Transport, TransportError, TransportErrorKind};
use crate::auth::SessionCookieJar;

/// Errors raised while constructing the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// `reqwest` rejected the configuration.
    #[error("HTTP client construction failed: {0}")]
    Build(#[from] reqwest::Error),

    /// The builder panicked even with the env-proxy fallback.
    #[error("HTTP client construction panicked while initializing networking")]
    Panicked,
}

/// HTTP transport for API calls.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use modrepo_broker::transport::HttpTransport;
///
/// let transport = HttpTransport::new(Duration::from_secs(30), None)?;
/// # Ok::<(), modrepo_broker::transport::ClientBuildError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with the given connect timeout and optional cookie jar.
    ///
    /// There is no overall request timeout on the client; the broker's
    /// per-request deadline aborts slow exchanges instead.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] when the underlying client cannot be built.
    #[instrument(level = "debug", skip(cookies))]
    pub fn new(
        connect_timeout: Duration,
        cookies: Option<Arc<SessionCookieJar>>,
    ) -> Result<Self, ClientBuildError> {
        let client = build_client(cookies, connect_timeout)?;
        Ok(Self { client })
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, call), fields(method = %call.method, url = %call.url))]
    async fn execute(&self, call: ApiCall) -> Exchange {
        let ApiCall {
            method,
            url,
            headers,
            body,
        } = call;

        let mut request = self.client.request(method, &url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                debug!(error = %error, "request failed before a response arrived");
                return Exchange::failed(url, map_reqwest_error(&error));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let redirect_target = if status.is_redirection() {
            headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| response.url().join(location).ok())
                .map(|target| target.to_string())
        } else {
            None
        };
        let error = TransportError::from_status(&url, status.as_u16(), status.canonical_reason());

        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(read_error) => {
                debug!(error = %read_error, "failed to read response body");
                return Exchange {
                    url,
                    status: Some(status.as_u16()),
                    headers,
                    redirect_target,
                    error: Some(map_reqwest_error(&read_error)),
                    ..Exchange::default()
                };
            }
        };

        debug!(status = status.as_u16(), bytes = body.len(), "exchange finished");

        Exchange {
            url,
            status: Some(status.as_u16()),
            headers,
            body,
            redirect_target,
            error,
        }
    }
}

fn map_reqwest_error(error: &reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        if format!("{error:?}").contains("dns error") {
            TransportErrorKind::HostNotFound
        } else {
            TransportErrorKind::ConnectionRefused
        }
    } else {
        TransportErrorKind::Network
    };
    TransportError::new(kind, error.to_string())
}

fn build_client(
    cookies: Option<Arc<SessionCookieJar>>,
    connect_timeout: Duration,
) -> Result<Client, ClientBuildError> {
    match try_build_client(cookies.clone(), connect_timeout, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            warn!(
                "HTTP client builder panicked while loading system proxy settings; retrying with env-proxy fallback"
            );
            match try_build_client(cookies, connect_timeout, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Build(error)) => Err(ClientBuildError::Build(error)),
                Err(BuildClientFailure::Panic) => Err(ClientBuildError::Panicked),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(ClientBuildError::Build(error)),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

// `catch_unwind` does not suppress panic-hook stderr output, so the hook is
// swapped out while the guarded build runs.
static CLIENT_BUILD_PANIC_HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn try_build_client(
    cookies: Option<Arc<SessionCookieJar>>,
    connect_timeout: Duration,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind_silent(AssertUnwindSafe(move || {
        let mut builder = base_client_builder(cookies, connect_timeout);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _panic_hook_guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn base_client_builder(
    cookies: Option<Arc<SessionCookieJar>>,
    connect_timeout: Duration,
) -> ClientBuilder {
    let mut builder = Client::builder()
        .connect_timeout(connect_timeout)
        .redirect(Policy::none())
        .gzip(true);
    if let Some(jar) = cookies {
        builder = builder.cookie_provider(jar);
    }
    builder
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
