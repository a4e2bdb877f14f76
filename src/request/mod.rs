//! Request descriptors.
//!
//! An [`ApiRequest`] is the closed set of calls the broker knows how to make;
//! each variant carries only the identifiers its endpoint needs. A
//! [`Descriptor`] wraps one with everything the broker tracks about it while
//! it is queued or in flight.

pub mod endpoint;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::registry::GameDescriptor;
use crate::transport::TransportErrorKind;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique request identifier.
///
/// Ids are taken from a single atomic counter: they are never reused and are
/// strictly increasing in submission order within one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocates the next id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag identifying the kind of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Description,
    ModInfo,
    CheckUpdates,
    Files,
    GetUpdates,
    FileInfo,
    DownloadUrl,
    FileInfoByHash,
    Endorsements,
    ToggleEndorsement,
    TrackedMods,
    ToggleTracking,
}

impl RequestKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::Description,
        Self::ModInfo,
        Self::CheckUpdates,
        Self::Files,
        Self::GetUpdates,
        Self::FileInfo,
        Self::DownloadUrl,
        Self::FileInfoByHash,
        Self::Endorsements,
        Self::ToggleEndorsement,
        Self::TrackedMods,
        Self::ToggleTracking,
    ];

    /// Position of this kind in [`Self::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the stable label used in logs and CLI output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::ModInfo => "mod_info",
            Self::CheckUpdates => "check_updates",
            Self::Files => "files",
            Self::GetUpdates => "get_updates",
            Self::FileInfo => "file_info",
            Self::DownloadUrl => "download_url",
            Self::FileInfoByHash => "file_info_by_hash",
            Self::Endorsements => "endorsements",
            Self::ToggleEndorsement => "toggle_endorsement",
            Self::TrackedMods => "tracked_mods",
            Self::ToggleTracking => "toggle_tracking",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window for the "recently updated mods" query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdatePeriod {
    Day,
    Week,
    Month,
}

impl UpdatePeriod {
    /// Query-string value expected by the API.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "1d",
            Self::Week => "1w",
            Self::Month => "1m",
        }
    }
}

impl FromStr for UpdatePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1d" | "day" => Ok(Self::Day),
            "1w" | "week" => Ok(Self::Week),
            "1m" | "month" => Ok(Self::Month),
            other => Err(format!("unknown update period '{other}' (expected 1d, 1w or 1m)")),
        }
    }
}

/// Download authorization handed out by the website to non-premium accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadGrant {
    /// One-time download key.
    pub key: String,
    /// Expiry as a Unix timestamp (seconds).
    pub expires: i64,
    /// Account the grant was issued to.
    pub user_id: u64,
}

/// One logical API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Description {
        game: String,
        mod_id: u64,
    },
    ModInfo {
        game: String,
        mod_id: u64,
    },
    CheckUpdates {
        game: String,
        period: UpdatePeriod,
    },
    Files {
        game: String,
        mod_id: u64,
    },
    GetUpdates {
        game: String,
        mod_id: u64,
    },
    FileInfo {
        game: String,
        mod_id: u64,
        file_id: u64,
    },
    DownloadUrl {
        game: String,
        mod_id: u64,
        file_id: u64,
        grant: Option<DownloadGrant>,
    },
    FileInfoByHash {
        game: String,
        hash: Vec<u8>,
    },
    Endorsements,
    ToggleEndorsement {
        game: String,
        mod_id: u64,
        version: String,
        endorse: bool,
    },
    TrackedMods,
    ToggleTracking {
        game: String,
        mod_id: u64,
        track: bool,
    },
}

impl ApiRequest {
    /// Returns the kind tag.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Description { .. } => RequestKind::Description,
            Self::ModInfo { .. } => RequestKind::ModInfo,
            Self::CheckUpdates { .. } => RequestKind::CheckUpdates,
            Self::Files { .. } => RequestKind::Files,
            Self::GetUpdates { .. } => RequestKind::GetUpdates,
            Self::FileInfo { .. } => RequestKind::FileInfo,
            Self::DownloadUrl { .. } => RequestKind::DownloadUrl,
            Self::FileInfoByHash { .. } => RequestKind::FileInfoByHash,
            Self::Endorsements => RequestKind::Endorsements,
            Self::ToggleEndorsement { .. } => RequestKind::ToggleEndorsement,
            Self::TrackedMods => RequestKind::TrackedMods,
            Self::ToggleTracking { .. } => RequestKind::ToggleTracking,
        }
    }

    /// Game name to resolve through the registry, for kinds scoped to a game.
    #[must_use]
    pub fn game(&self) -> Option<&str> {
        match self {
            Self::Description { game, .. }
            | Self::ModInfo { game, .. }
            | Self::CheckUpdates { game, .. }
            | Self::Files { game, .. }
            | Self::GetUpdates { game, .. }
            | Self::FileInfo { game, .. }
            | Self::DownloadUrl { game, .. }
            | Self::FileInfoByHash { game, .. }
            | Self::ToggleEndorsement { game, .. }
            | Self::ToggleTracking { game, .. } => Some(game),
            Self::Endorsements | Self::TrackedMods => None,
        }
    }

    #[must_use]
    pub fn mod_id(&self) -> Option<u64> {
        match self {
            Self::Description { mod_id, .. }
            | Self::ModInfo { mod_id, .. }
            | Self::Files { mod_id, .. }
            | Self::GetUpdates { mod_id, .. }
            | Self::FileInfo { mod_id, .. }
            | Self::DownloadUrl { mod_id, .. }
            | Self::ToggleEndorsement { mod_id, .. }
            | Self::ToggleTracking { mod_id, .. } => Some(*mod_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn file_id(&self) -> Option<u64> {
        match self {
            Self::FileInfo { file_id, .. } | Self::DownloadUrl { file_id, .. } => Some(*file_id),
            _ => None,
        }
    }
}

/// Pairs of (error class, HTTP status) the caller expects and wants reported
/// without escalated logging.
///
/// Transport failures that carry no HTTP status are matched with status `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedErrors {
    entries: HashMap<TransportErrorKind, BTreeSet<u16>>,
}

impl AllowedErrors {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `(kind, status)` as tolerated.
    #[must_use]
    pub fn allow(mut self, kind: TransportErrorKind, status: u16) -> Self {
        self.entries.entry(kind).or_default().insert(status);
        self
    }

    /// Returns true if `(kind, status)` was declared.
    #[must_use]
    pub fn permits(&self, kind: TransportErrorKind, status: u16) -> bool {
        self.entries
            .get(&kind)
            .is_some_and(|statuses| statuses.contains(&status))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Caller-side options attached to a submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Opaque payload returned untouched in the outcome.
    pub user_data: serde_json::Value,
    /// Tag added to the user agent for diagnostics.
    pub submodule: Option<String>,
    /// Errors reported as tolerated.
    pub allowed_errors: AllowedErrors,
    /// Skip the `error!` log on generic transport failures.
    pub suppress_generic_error_logging: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_data(mut self, user_data: serde_json::Value) -> Self {
        self.user_data = user_data;
        self
    }

    #[must_use]
    pub fn with_submodule(mut self, submodule: impl Into<String>) -> Self {
        self.submodule = Some(submodule.into());
        self
    }

    #[must_use]
    pub fn with_allowed_errors(mut self, allowed_errors: AllowedErrors) -> Self {
        self.allowed_errors = allowed_errors;
        self
    }

    #[must_use]
    pub fn suppress_generic_error_logging(mut self) -> Self {
        self.suppress_generic_error_logging = true;
        self
    }
}

/// Where a descriptor's call goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Built from the kind's URL template.
    Template,
    /// A 301 was followed; `target` is used verbatim.
    Rerouted { target: String, hops: u32 },
}

/// A request as tracked by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub id: RequestId,
    pub request: ApiRequest,
    /// Resolved game, `None` for kinds not scoped to a game.
    pub game: Option<GameDescriptor>,
    pub options: RequestOptions,
    pub route: Route,
}

impl Descriptor {
    /// Creates a descriptor with a freshly allocated id.
    #[must_use]
    pub fn new(request: ApiRequest, game: Option<GameDescriptor>, options: RequestOptions) -> Self {
        Self {
            id: RequestId::next(),
            request,
            game,
            options,
            route: Route::Template,
        }
    }

    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.request.kind()
    }

    /// Number of redirects followed so far.
    #[must_use]
    pub fn hops(&self) -> u32 {
        match self.route {
            Route::Template => 0,
            Route::Rerouted { hops, .. } => hops,
        }
    }

    #[must_use]
    pub fn is_rerouted(&self) -> bool {
        matches!(self.route, Route::Rerouted { .. })
    }

    /// Returns the descriptor redirected to `target`, keeping its id.
    #[must_use]
    pub fn reroute(mut self, target: impl Into<String>) -> Self {
        self.route = Route::Rerouted {
            target: target.into(),
            hops: self.hops() + 1,
        };
        self
    }
}
