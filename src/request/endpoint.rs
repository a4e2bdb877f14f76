//! Call construction.
//!
//! Maps a [`Descriptor`] to the verb, URL and JSON body of its API call. This
//! is a pure function of the descriptor, the base URL, the current
//! credentials and the clock; headers are added by the dispatcher.
//!
//! | kind | verb | path |
//! |---|---|---|
//! | Description, ModInfo | GET | `/games/{game}/mods/{mod}` |
//! | CheckUpdates | GET | `/games/{game}/mods/updated?period=..` |
//! | Files, GetUpdates | GET | `/games/{game}/mods/{mod}/files` |
//! | FileInfo | GET | `/games/{game}/mods/{mod}/files/{file}` |
//! | DownloadUrl | GET | `/games/{game}/mods/{mod}/files/{file}/download_link[?key=..&expires=..]` |
//! | Endorsements | GET | `/user/endorsements` |
//! | ToggleEndorsement | POST | `/games/{game}/mods/{mod}/{endorse,abstain}` |
//! | TrackedMods | GET | `/user/tracked_mods` |
//! | ToggleTracking | POST / DELETE | `/user/tracked_mods?domain_name={game}` |
//! | FileInfoByHash | GET | `/games/{game}/mods/md5_search/{hex}` |

use reqwest::Method;
use serde_json::json;
use url::form_urlencoded;

use super::{ApiRequest, Descriptor, DownloadGrant, RequestKind, Route};
use crate::credentials::Credentials;

/// Verb, URL and body of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// Reasons a call is refused locally without touching the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Refusal {
    /// Non-premium account without a usable download grant.
    #[error(
        "Aborting download: either the link is premium-only and the account is not premium, \
         or the download link was generated by a different account ({reason})"
    )]
    DownloadNotPermitted { reason: &'static str },

    /// A game-scoped request reached dispatch without a resolved game.
    #[error("no game resolved for {kind} request")]
    MissingGame { kind: RequestKind },
}

/// Builds the call for `descriptor`.
///
/// Rerouted descriptors keep their verb and body but go to the stored
/// redirect target verbatim.
///
/// # Errors
///
/// Returns a [`Refusal`] when the call must not be issued.
pub fn endpoint(
    descriptor: &Descriptor,
    base_url: &str,
    credentials: &Credentials,
    now_unix: i64,
) -> Result<Endpoint, Refusal> {
    let base = base_url.trim_end_matches('/');
    let domain = descriptor.game.as_ref().map(|g| g.domain_name.as_str());
    let kind = descriptor.kind();
    let game = || domain.ok_or(Refusal::MissingGame { kind });

    let (method, url, body) = match &descriptor.request {
        ApiRequest::Description { mod_id, .. } | ApiRequest::ModInfo { mod_id, .. } => (
            Method::GET,
            format!("{base}/games/{}/mods/{mod_id}", game()?),
            None,
        ),
        ApiRequest::CheckUpdates { period, .. } => (
            Method::GET,
            format!(
                "{base}/games/{}/mods/updated?{}",
                game()?,
                query(&[("period", period.as_str())])
            ),
            None,
        ),
        ApiRequest::Files { mod_id, .. } | ApiRequest::GetUpdates { mod_id, .. } => (
            Method::GET,
            format!("{base}/games/{}/mods/{mod_id}/files", game()?),
            None,
        ),
        ApiRequest::FileInfo {
            mod_id, file_id, ..
        } => (
            Method::GET,
            format!("{base}/games/{}/mods/{mod_id}/files/{file_id}", game()?),
            None,
        ),
        ApiRequest::DownloadUrl {
            mod_id,
            file_id,
            grant,
            ..
        } => {
            let link = format!(
                "{base}/games/{}/mods/{mod_id}/files/{file_id}/download_link",
                game()?
            );
            let url = if credentials.is_premium() {
                link
            } else {
                let grant = usable_grant(grant.as_ref(), credentials, now_unix)?;
                let expires = grant.expires.to_string();
                format!(
                    "{link}?{}",
                    query(&[("key", grant.key.as_str()), ("expires", expires.as_str())])
                )
            };
            (Method::GET, url, None)
        }
        ApiRequest::FileInfoByHash { hash, .. } => (
            Method::GET,
            format!(
                "{base}/games/{}/mods/md5_search/{}",
                game()?,
                hex::encode(hash)
            ),
            None,
        ),
        ApiRequest::Endorsements => (Method::GET, format!("{base}/user/endorsements"), None),
        ApiRequest::ToggleEndorsement {
            mod_id,
            version,
            endorse,
            ..
        } => {
            let action = if *endorse { "endorse" } else { "abstain" };
            (
                Method::POST,
                format!("{base}/games/{}/mods/{mod_id}/{action}", game()?),
                Some(json!({ "Version": version })),
            )
        }
        ApiRequest::TrackedMods => (Method::GET, format!("{base}/user/tracked_mods"), None),
        ApiRequest::ToggleTracking { mod_id, track, .. } => {
            let method = if *track { Method::POST } else { Method::DELETE };
            (
                method,
                format!(
                    "{base}/user/tracked_mods?{}",
                    query(&[("domain_name", game()?)])
                ),
                Some(json!({ "mod_id": mod_id })),
            )
        }
    };

    let url = match &descriptor.route {
        Route::Template => url,
        Route::Rerouted { target, .. } => target.clone(),
    };

    Ok(Endpoint { method, url, body })
}

fn usable_grant<'a>(
    grant: Option<&'a DownloadGrant>,
    credentials: &Credentials,
    now_unix: i64,
) -> Result<&'a DownloadGrant, Refusal> {
    let grant = grant.ok_or(Refusal::DownloadNotPermitted {
        reason: "no download grant",
    })?;
    if grant.key.is_empty() {
        return Err(Refusal::DownloadNotPermitted {
            reason: "empty download key",
        });
    }
    if grant.expires <= now_unix {
        return Err(Refusal::DownloadNotPermitted {
            reason: "download grant expired",
        });
    }
    if grant.user_id != credentials.user_id {
        return Err(Refusal::DownloadNotPermitted {
            reason: "grant issued to another account",
        });
    }
    Ok(grant)
}

fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}
