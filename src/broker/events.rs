//! Outcome events and the observer channels that deliver them.
//!
//! Every terminal outcome reaches, in order:
//! 1. the submitter's [`Ticket`](super::Ticket), if it is still held;
//! 2. subscribers of the request's [`RequestKind`];
//! 3. for failures, subscribers of the shared failure stream.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::request::{RequestId, RequestKind};

/// Why a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The caller pre-declared this (error class, status) pair.
    Tolerated,
    /// HTTP 429.
    RateLimited,
    /// Connection, DNS, TLS, abort or HTTP error status.
    Transport,
    /// Empty body, unparsable JSON, unexpected payload or redirect loop.
    Protocol,
}

/// Failure delivered as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message} (status {status})")]
pub struct Failure {
    /// HTTP status, `0` when no response was received.
    pub status: u16,
    pub message: String,
    pub kind: FailureKind,
}

impl Failure {
    pub(crate) fn new(kind: FailureKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind,
        }
    }
}

/// One file of a mod, as listed by the files endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub file_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub description: Option<String>,
    pub license: Option<String>,
    #[serde(alias = "changelog_html")]
    pub changelog: Option<String>,
    pub instructions: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub category_id: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub file_id: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub size: u64,
}

/// A file superseded by a newer upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileUpdate {
    pub old_file_id: u64,
    pub new_file_id: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub old_file_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub new_file_name: String,
    pub uploaded_timestamp: Option<i64>,
}

/// Body of the files endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileList {
    pub files: Vec<FileRecord>,
    pub file_updates: Vec<FileUpdate>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Kind-specific success payload.
///
/// Kinds whose bodies the broker does not interpret carry the parsed JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Description(Value),
    ModInfo(Value),
    UpdatedMods(Value),
    Files(FileList),
    Updates(FileList),
    FileInfo(Value),
    DownloadLinks(Value),
    FileInfoByHash(Value),
    Endorsements(Value),
    EndorsementToggled(Value),
    TrackedMods(Value),
    /// Whether the mod is tracked after the toggle.
    TrackingToggled(bool),
}

/// Terminal outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub id: RequestId,
    pub kind: RequestKind,
    /// Game name as submitted.
    pub game: Option<String>,
    pub mod_id: Option<u64>,
    pub file_id: Option<u64>,
    pub user_data: Value,
    pub result: Result<Payload, Failure>,
}

impl Outcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        self.result.as_ref().err()
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.result.as_ref().ok()
    }
}

/// Subscriber list for one stream.
type Subscribers = Mutex<Vec<mpsc::UnboundedSender<Outcome>>>;

/// Fan-out channels, one per kind plus the shared failure stream.
///
/// Every subscriber has its own unbounded queue, so a reader that falls
/// behind still receives every outcome. Subscribers whose receiver is gone
/// are pruned on the next publish.
#[derive(Debug, Default)]
pub(crate) struct Observers {
    by_kind: [Subscribers; RequestKind::ALL.len()],
    failures: Subscribers,
}

impl Observers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self, kind: RequestKind) -> mpsc::UnboundedReceiver<Outcome> {
        add_subscriber(&self.by_kind[kind.index()])
    }

    pub(crate) fn subscribe_failures(&self) -> mpsc::UnboundedReceiver<Outcome> {
        add_subscriber(&self.failures)
    }

    /// Sends to current subscribers. Having none is not an error.
    pub(crate) fn publish(&self, outcome: &Outcome) {
        deliver(&self.by_kind[outcome.kind.index()], outcome);
        if outcome.result.is_err() {
            deliver(&self.failures, outcome);
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, kind: RequestKind) -> usize {
        lock(&self.by_kind[kind.index()]).len()
    }
}

fn lock(subscribers: &Subscribers) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Outcome>>> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn add_subscriber(subscribers: &Subscribers) -> mpsc::UnboundedReceiver<Outcome> {
    let (tx, rx) = mpsc::unbounded_channel();
    lock(subscribers).push(tx);
    rx
}

fn deliver(subscribers: &Subscribers, outcome: &Outcome) {
    lock(subscribers).retain(|tx| tx.send(outcome.clone()).is_ok());
}
