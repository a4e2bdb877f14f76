//! Netscape cookie-file parsing.
//!
//! A cookie export has one cookie per line, 7 TAB-separated fields:
//! `domain`, `include-subdomains`, `path`, `secure`, `expires`, `name`, `value`.
//! Lines starting with `#` and blank lines are ignored.

use std::fmt;
use std::io::BufRead;
use std::time::{Duration, UNIX_EPOCH};

use tracing::{debug, instrument, warn};

/// One cookie read from an export.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieLine {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Unix timestamp; `0` for session cookies.
    pub expires: u64,
    pub name: String,
    value: String,
}

impl CookieLine {
    /// Returns the cookie value. Do not log it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Renders the cookie as a `Set-Cookie` header value.
    #[must_use]
    pub fn to_set_cookie(&self) -> String {
        let mut header = format!(
            "{}={}; Domain={}; Path={}",
            self.name, self.value, self.domain, self.path
        );
        if self.secure {
            header.push_str("; Secure");
        }
        if self.expires > 0 {
            match UNIX_EPOCH.checked_add(Duration::from_secs(self.expires)) {
                Some(at) => {
                    header.push_str("; Expires=");
                    header.push_str(&httpdate::fmt_http_date(at));
                }
                None => warn!(
                    domain = %self.domain,
                    name = %self.name,
                    "cookie expiry out of range; keeping it as a session cookie"
                ),
            }
        }
        header
    }

    /// URL the cookie is attributed to when added to a jar.
    #[must_use]
    pub fn origin(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let host = self.domain.trim_start_matches('.');
        format!("{scheme}://{host}{}", self.path)
    }

    fn parse(line: &str, line_number: usize) -> Result<Self, CookieError> {
        let invalid = |reason: String| CookieError::InvalidLine {
            line_number,
            content: redact(line),
            reason,
        };

        let fields: Vec<&str> = line.split('\t').collect();
        let [domain, include_subdomains, path, secure, expires, name, value] = fields[..] else {
            return Err(invalid(format!(
                "expected 7 TAB-separated fields, found {}",
                fields.len()
            )));
        };

        let flag = |field: &str, raw: &str| match raw {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => Err(invalid(format!("{field} must be TRUE or FALSE, got '{raw}'"))),
        };
        let include_subdomains = flag("include-subdomains", include_subdomains)?;
        let secure = flag("secure", secure)?;
        let expires = expires
            .parse::<u64>()
            .map_err(|_| invalid(format!("expires must be a non-negative integer, got '{expires}'")))?;

        if domain.is_empty() {
            return Err(invalid("domain is empty".to_string()));
        }
        if name.is_empty() {
            return Err(invalid("cookie name is empty".to_string()));
        }

        Ok(Self {
            domain: domain.to_string(),
            include_subdomains,
            path: path.to_string(),
            secure,
            expires,
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("include_subdomains", &self.include_subdomains)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors from reading or clearing the cookie store.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    #[error("line {line_number}: {reason} (got: {content})")]
    InvalidLine {
        line_number: usize,
        /// Offending line with the value redacted.
        content: String,
        reason: String,
    },

    #[error("cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no valid cookies found ({malformed_count} lines failed to parse)")]
    NoCookiesFound { malformed_count: usize },
}

/// Parsed cookies plus the lines that were skipped.
#[derive(Debug, Default)]
pub struct ParsedCookies {
    pub cookies: Vec<CookieLine>,
    /// `(line number, reason)` for each skipped line.
    pub skipped: Vec<(usize, String)>,
}

/// Parses a Netscape cookie export.
///
/// Malformed lines are skipped and reported in [`ParsedCookies::skipped`].
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure and
/// [`CookieError::NoCookiesFound`] when the file has data lines but none parse.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<ParsedCookies, CookieError> {
    let mut parsed = ParsedCookies::default();
    let mut data_lines = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        data_lines += 1;

        match CookieLine::parse(line, idx + 1) {
            Ok(cookie) => {
                debug!(line = idx + 1, domain = %cookie.domain, name = %cookie.name, "parsed cookie");
                parsed.cookies.push(cookie);
            }
            Err(error) => {
                warn!(line = idx + 1, reason = %error, "skipping malformed cookie line");
                parsed.skipped.push((idx + 1, error.to_string()));
            }
        }
    }

    if parsed.cookies.is_empty() && data_lines > 0 {
        return Err(CookieError::NoCookiesFound {
            malformed_count: parsed.skipped.len(),
        });
    }
    Ok(parsed)
}

fn redact(line: &str) -> String {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() >= 7 {
        format!("{}\t[REDACTED]", fields[..6].join("\t"))
    } else {
        line.to_string()
    }
}
