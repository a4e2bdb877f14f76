//! Credential provider collaborator.
//!
//! The broker attaches the API key to every call and consults the account
//! tier when building download-link requests. It never negotiates sessions.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Account tier as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    #[default]
    Regular,
    Supporter,
    Premium,
}

/// The caller's credentials.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub api_key: String,
    pub user_id: u64,
    pub tier: AccountTier,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, user_id: u64, tier: AccountTier) -> Self {
        Self {
            api_key: api_key.into(),
            user_id,
            tier,
        }
    }

    #[must_use]
    pub fn is_premium(&self) -> bool {
        self.tier == AccountTier::Premium
    }
}

// The key must not end up in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[redacted]")
            .field("user_id", &self.user_id)
            .field("tier", &self.tier)
            .finish()
    }
}

/// Supplies the credentials to attach to each call.
///
/// Called once per dispatch, so a provider may swap credentials between calls.
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    fn credentials(&self) -> Credentials;
}

/// Provider holding credentials in memory.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    inner: RwLock<Credentials>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(credentials),
        }
    }

    /// Replaces the stored credentials (e.g. after the user validates a new key).
    pub fn replace(&self, credentials: Credentials) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = credentials;
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Credentials {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
