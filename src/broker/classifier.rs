//! Response classification.
//!
//! Decision order for a finished (or aborted) exchange:
//! 1. transport error: tolerated, rate limited (429), or generic;
//! 2. 301: reroute while under the hop limit, otherwise a redirect-loop failure;
//! 3. empty or `null` body: failure with the server's diagnostic header;
//! 4. JSON body: typed payload, or an "invalid response" failure.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::events::{Failure, FailureKind, FileList, Payload};
use super::stats::RateLimits;
use crate::request::{Descriptor, RequestKind};
use crate::transport::Exchange;

/// Header the API uses to explain an empty body.
pub const DIAGNOSTIC_HEADER: &str = "NexusErrorInfo";

const EMPTY_RESPONSE: &str = "empty response";
const INVALID_RESPONSE: &str = "invalid response";

#[allow(clippy::expect_used)]
static NOW_TRACKING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"User [0-9]+ is (?:already|now) Tracking Mod: [0-9]+")
        .expect("tracking regex is valid")
});

#[allow(clippy::expect_used)]
static NOT_TRACKING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"User [0-9]+ is no longer tracking [0-9]+|Users is not tracking mod\. Unable to untrack\.")
        .expect("untracking regex is valid")
});

/// What the dispatcher should do with a classified exchange.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Verdict {
    /// Re-enqueue the descriptor against `target`. No event is emitted.
    Reroute { target: String },
    /// Terminal outcome; `limits` is set when the response reported quota.
    Complete {
        result: Result<Payload, Failure>,
        limits: Option<RateLimits>,
    },
}

impl Verdict {
    fn fail(failure: Failure) -> Self {
        Self::Complete {
            result: Err(failure),
            limits: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Classifier {
    max_redirect_hops: u32,
}

impl Classifier {
    pub(crate) fn new(max_redirect_hops: u32) -> Self {
        Self { max_redirect_hops }
    }

    pub(crate) fn classify(&self, descriptor: &Descriptor, exchange: &Exchange) -> Verdict {
        let status = exchange.status.unwrap_or(0);

        if let Some(transport_error) = &exchange.error {
            let options = &descriptor.options;

            if options
                .allowed_errors
                .permits(transport_error.kind, status)
            {
                debug!(
                    id = %descriptor.id,
                    kind = %transport_error.kind,
                    status,
                    "tolerated error"
                );
                return Verdict::fail(Failure::new(
                    FailureKind::Tolerated,
                    status,
                    transport_error.message.clone(),
                ));
            }

            if status == 429 {
                let limits = RateLimits::from_headers(&exchange.headers);
                if limits.as_ref().is_none_or(RateLimits::is_exhausted) {
                    warn!("All API requests have been consumed and are now being denied.");
                } else {
                    warn!(
                        "Requests to the API are being made too quickly and are being throttled."
                    );
                }
                warn!("Error: {}", transport_error.message);
                return Verdict::Complete {
                    result: Err(Failure::new(
                        FailureKind::RateLimited,
                        status,
                        transport_error.message.clone(),
                    )),
                    limits,
                };
            }

            let message = error_field(&exchange.body)
                .unwrap_or_else(|| transport_error.message.clone());
            if !options.suppress_generic_error_logging {
                error!(
                    id = %descriptor.id,
                    url = %exchange.url,
                    kind = %transport_error.kind,
                    status,
                    "request error: {message}"
                );
            }
            return Verdict::fail(Failure::new(FailureKind::Transport, status, message));
        }

        if status == 301 {
            return self.redirect(descriptor, exchange);
        }

        if is_empty_body(&exchange.body) {
            let message = exchange
                .header(DIAGNOSTIC_HEADER)
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(EMPTY_RESPONSE)
                .to_string();
            debug!(id = %descriptor.id, status, message = %message, "empty response body");
            return Verdict::fail(Failure::new(FailureKind::Protocol, status, message));
        }

        let Ok(body) = serde_json::from_slice::<Value>(&exchange.body) else {
            debug!(id = %descriptor.id, status, "response body is not JSON");
            return Verdict::fail(Failure::new(FailureKind::Protocol, status, INVALID_RESPONSE));
        };

        Verdict::Complete {
            result: payload(descriptor.kind(), body)
                .map_err(|message| Failure::new(FailureKind::Protocol, status, message)),
            limits: RateLimits::from_headers(&exchange.headers),
        }
    }

    fn redirect(&self, descriptor: &Descriptor, exchange: &Exchange) -> Verdict {
        if descriptor.hops() >= self.max_redirect_hops {
            warn!(
                id = %descriptor.id,
                hops = descriptor.hops(),
                url = %exchange.url,
                "redirect loop; giving up"
            );
            return Verdict::fail(Failure::new(FailureKind::Protocol, 301, "redirect loop"));
        }
        match &exchange.redirect_target {
            Some(target) => {
                debug!(id = %descriptor.id, from = %exchange.url, to = %target, "rerouting");
                Verdict::Reroute {
                    target: target.clone(),
                }
            }
            None => Verdict::fail(Failure::new(
                FailureKind::Protocol,
                301,
                "redirect without a target",
            )),
        }
    }
}

fn is_empty_body(body: &[u8]) -> bool {
    let trimmed = body.trim_ascii();
    trimmed.is_empty() || trimmed == b"null"
}

/// `error` field of a JSON error body, if any.
fn error_field(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn payload(kind: RequestKind, body: Value) -> Result<Payload, String> {
    let file_list = |body: Value| {
        serde_json::from_value::<FileList>(body)
            .map_err(|e| format!("{INVALID_RESPONSE}: {e}"))
    };

    Ok(match kind {
        RequestKind::Description => Payload::Description(body),
        RequestKind::ModInfo => Payload::ModInfo(body),
        RequestKind::CheckUpdates => Payload::UpdatedMods(body),
        RequestKind::Files => Payload::Files(file_list(body)?),
        RequestKind::GetUpdates => Payload::Updates(file_list(body)?),
        RequestKind::FileInfo => Payload::FileInfo(body),
        RequestKind::DownloadUrl => Payload::DownloadLinks(body),
        RequestKind::FileInfoByHash => Payload::FileInfoByHash(body),
        RequestKind::Endorsements => Payload::Endorsements(body),
        RequestKind::ToggleEndorsement => Payload::EndorsementToggled(body),
        RequestKind::TrackedMods => Payload::TrackedMods(body),
        RequestKind::ToggleTracking => Payload::TrackingToggled(tracking_state(&body)?),
    })
}

fn tracking_state(body: &Value) -> Result<bool, String> {
    let message = body.get("message").and_then(Value::as_str).unwrap_or("");
    if NOW_TRACKING.is_match(message) {
        Ok(true)
    } else if NOT_TRACKING.is_match(message) {
        Ok(false)
    } else {
        Err(format!("unrecognized tracking response: '{message}'"))
    }
}
