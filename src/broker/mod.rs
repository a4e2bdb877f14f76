//! Request broker.
//!
//! Accepts typed requests, queues them, keeps at most `max_concurrent` in
//! flight, and delivers exactly one [`Outcome`] per request (redirects are
//! followed internally and never surface).
//!
//! # Architecture
//!
//! - [`Broker`] - Cloneable handle: submission, stats, observers, admin operations
//! - `dispatcher` - Single task owning the pending queue and the active set
//! - `classifier` - Turns a finished exchange into a reroute or a terminal outcome
//! - [`events`] - [`Outcome`], [`Payload`], [`Failure`] and observer channels
//! - [`stats`] - Rate-limit header parsing and the [`ApiStats`] snapshot
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use modrepo_broker::broker::Broker;
//! use modrepo_broker::credentials::{AccountTier, Credentials, StaticCredentials};
//! use modrepo_broker::registry::{GameDescriptor, StaticGameRegistry};
//! use modrepo_broker::request::RequestOptions;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Broker::builder()
//!     .registry(Arc::new(
//!         StaticGameRegistry::new()
//!             .with_game(GameDescriptor::new("skyrimse", "skyrimspecialedition")),
//!     ))
//!     .credentials(Arc::new(StaticCredentials::new(Credentials::new(
//!         "api-key",
//!         1,
//!         AccountTier::Regular,
//!     ))))
//!     .build()?;
//!
//! let ticket = broker.request_files("skyrimse", 100, RequestOptions::new())?;
//! let outcome = ticket.outcome().await?;
//! println!("{:?}", outcome.result);
//! # Ok(())
//! # }
//! ```

mod active;
mod classifier;
mod dispatcher;
mod error;
pub mod events;
mod queue;
pub mod stats;

pub use classifier::DIAGNOSTIC_HEADER;
pub use error::{BrokerError, SubmitError};
pub use events::{Failure, FailureKind, FileList, FileRecord, FileUpdate, Outcome, Payload};
pub use stats::{ApiStats, RateLimits};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument};

use self::dispatcher::{Command, Dispatcher};
use self::events::Observers;
use self::stats::StatsTracker;
use crate::auth::{CookieStore, SessionCookieJar};
use crate::cache::ResponseCache;
use crate::config::BrokerConfig;
use crate::credentials::CredentialProvider;
use crate::registry::GameRegistry;
use crate::request::{
    ApiRequest, Descriptor, DownloadGrant, RequestId, RequestKind, RequestOptions,
    UpdatePeriod,
};
use crate::transport::{HttpTransport, Transport, TransportErrorKind};

/// Handle to one submitted request.
#[derive(Debug)]
pub struct Ticket {
    id: RequestId,
    reply: oneshot::Receiver<Outcome>,
}

impl Ticket {
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for this request's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::RequestDropped`] when the request was refused at
    /// dispatch and therefore never produces an outcome.
    pub async fn outcome(self) -> Result<Outcome, BrokerError> {
        self.reply
            .await
            .map_err(|_| BrokerError::RequestDropped { id: self.id })
    }
}

/// Builder for [`Broker`]. Must be built inside a Tokio runtime.
#[derive(Default)]
pub struct BrokerBuilder {
    config: BrokerConfig,
    registry: Option<Arc<dyn GameRegistry>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    transport: Option<Arc<dyn Transport>>,
    cookie_jar: Option<Arc<SessionCookieJar>>,
    cookie_store: Option<Arc<dyn CookieStore>>,
    cache_dir: Option<PathBuf>,
}

impl BrokerBuilder {
    #[must_use]
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn GameRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replaces the HTTP transport (tests, custom stacks).
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Jar used by the default HTTP transport and cleared by [`Broker::clear_cache`].
    #[must_use]
    pub fn cookie_jar(mut self, jar: Arc<SessionCookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    /// Cookie store cleared by [`Broker::clear_cache`], when it is not the jar.
    #[must_use]
    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = Some(store);
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Validates the configuration and starts the dispatcher task.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] for invalid configuration, a missing registry or
    /// credential provider, an HTTP client that cannot be built, or a cache
    /// directory that cannot be created.
    #[instrument(level = "debug", skip(self))]
    pub fn build(self) -> Result<Broker, BrokerError> {
        self.config.validate()?;
        let registry = self.registry.ok_or_else(|| BrokerError::missing("game registry"))?;
        let credentials = self
            .credentials
            .ok_or_else(|| BrokerError::missing("credential provider"))?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                self.config.connect_timeout,
                self.cookie_jar.clone(),
            )?),
        };
        let cookies = self
            .cookie_store
            .or_else(|| self.cookie_jar.map(|jar| jar as Arc<dyn CookieStore>));

        let cache = Arc::new(ResponseCache::default());
        if let Some(dir) = &self.cache_dir {
            cache.set_directory(dir)?;
        }

        let observers = Arc::new(Observers::new());
        let (tracker, stats) = StatsTracker::new();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher::new(
            self.config,
            transport,
            credentials,
            Arc::clone(&observers),
            tracker,
            command_rx,
        );
        tokio::spawn(dispatcher.run());

        Ok(Broker {
            commands,
            registry,
            observers,
            stats,
            cache,
            cookies,
        })
    }
}

/// Cloneable handle to a running broker.
///
/// The dispatcher stops once every handle is dropped and the requests it had
/// accepted have finished.
#[derive(Clone)]
pub struct Broker {
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<dyn GameRegistry>,
    observers: Arc<Observers>,
    stats: watch::Receiver<ApiStats>,
    cache: Arc<ResponseCache>,
    cookies: Option<Arc<dyn CookieStore>>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("stats", &*self.stats.borrow())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Broker {
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    /// Queues a request and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::UnknownGame`] if the registry cannot resolve the
    /// request's game, or [`SubmitError::Closed`] if the dispatcher is gone.
    #[instrument(skip(self, request, options), fields(kind = %request.kind()))]
    pub fn submit(&self, request: ApiRequest, options: RequestOptions) -> Result<Ticket, SubmitError> {
        let game = match request.game() {
            Some(name) => Some(
                self.registry
                    .resolve_game(name)
                    .ok_or_else(|| SubmitError::unknown_game(name))?,
            ),
            None => None,
        };

        let descriptor = Descriptor::new(request, game, options);
        let id = descriptor.id;
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Submit { descriptor, reply })
            .map_err(|_| SubmitError::Closed)?;

        debug!(%id, "request submitted");
        Ok(Ticket {
            id,
            reply: reply_rx,
        })
    }

    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_description(
        &self,
        game: &str,
        mod_id: u64,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::Description {
                game: game.to_string(),
                mod_id,
            },
            options,
        )
    }

    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_mod_info(
        &self,
        game: &str,
        mod_id: u64,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::ModInfo {
                game: game.to_string(),
                mod_id,
            },
            options,
        )
    }

    /// Mods of `game` updated within `period`.
    ///
    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_update_info(
        &self,
        game: &str,
        period: UpdatePeriod,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::CheckUpdates {
                game: game.to_string(),
                period,
            },
            options,
        )
    }

    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_files(
        &self,
        game: &str,
        mod_id: u64,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::Files {
                game: game.to_string(),
                mod_id,
            },
            options,
        )
    }

    /// File list of a mod, consumed as update information.
    ///
    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_updates(
        &self,
        game: &str,
        mod_id: u64,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::GetUpdates {
                game: game.to_string(),
                mod_id,
            },
            options,
        )
    }

    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_file_info(
        &self,
        game: &str,
        mod_id: u64,
        file_id: u64,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::FileInfo {
                game: game.to_string(),
                mod_id,
                file_id,
            },
            options,
        )
    }

    /// Download links for a file. Non-premium accounts need `grant`.
    ///
    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_download_url(
        &self,
        game: &str,
        mod_id: u64,
        file_id: u64,
        grant: Option<DownloadGrant>,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::DownloadUrl {
                game: game.to_string(),
                mod_id,
                file_id,
                grant,
            },
            options,
        )
    }

    /// Looks up files by md5 digest.
    ///
    /// A 404 (no match) is always tolerated and generic error logging is off,
    /// on top of whatever `options` declares.
    ///
    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_info_from_md5(
        &self,
        game: &str,
        hash: &[u8],
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        let allowed = options
            .allowed_errors
            .clone()
            .allow(TransportErrorKind::ContentNotFound, 404);
        let options = options
            .with_allowed_errors(allowed)
            .suppress_generic_error_logging();
        self.submit(
            ApiRequest::FileInfoByHash {
                game: game.to_string(),
                hash: hash.to_vec(),
            },
            options,
        )
    }

    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_endorsement_info(&self, options: RequestOptions) -> Result<Ticket, SubmitError> {
        self.submit(ApiRequest::Endorsements, options)
    }

    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_toggle_endorsement(
        &self,
        game: &str,
        mod_id: u64,
        version: &str,
        endorse: bool,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::ToggleEndorsement {
                game: game.to_string(),
                mod_id,
                version: version.to_string(),
                endorse,
            },
            options,
        )
    }

    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_tracking_info(&self, options: RequestOptions) -> Result<Ticket, SubmitError> {
        self.submit(ApiRequest::TrackedMods, options)
    }

    /// # Errors
    ///
    /// See [`Broker::submit`].
    pub fn request_toggle_tracking(
        &self,
        game: &str,
        mod_id: u64,
        track: bool,
        options: RequestOptions,
    ) -> Result<Ticket, SubmitError> {
        self.submit(
            ApiRequest::ToggleTracking {
                game: game.to_string(),
                mod_id,
                track,
            },
            options,
        )
    }

    /// Outcomes (success and failure) of every request of `kind` completed
    /// after this call. The receiver buffers without bound until read.
    #[must_use]
    pub fn subscribe(&self, kind: RequestKind) -> mpsc::UnboundedReceiver<Outcome> {
        self.observers.subscribe(kind)
    }

    /// Failed outcomes of every kind.
    #[must_use]
    pub fn subscribe_failures(&self) -> mpsc::UnboundedReceiver<Outcome> {
        self.observers.subscribe_failures()
    }

    /// Current queue depth and last known quota.
    #[must_use]
    pub fn stats(&self) -> ApiStats {
        self.stats.borrow().clone()
    }

    /// Receiver woken whenever the stats snapshot changes.
    #[must_use]
    pub fn watch_stats(&self) -> watch::Receiver<ApiStats> {
        self.stats.clone()
    }

    /// Empties the response cache directory and clears cookies.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Cache`] or [`BrokerError::Cookies`] on I/O failure.
    #[instrument(skip(self))]
    pub fn clear_cache(&self) -> Result<(), BrokerError> {
        self.cache.clear()?;
        if let Some(cookies) = &self.cookies {
            cookies.clear()?;
        }
        info!("cache and cookies cleared");
        Ok(())
    }

    /// Points the response cache at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Cache`] if the directory cannot be created.
    pub fn set_cache_directory(&self, path: &Path) -> Result<(), BrokerError> {
        self.cache.set_directory(path)?;
        Ok(())
    }

    #[must_use]
    pub fn cache_directory(&self) -> Option<PathBuf> {
        self.cache.directory()
    }
}

