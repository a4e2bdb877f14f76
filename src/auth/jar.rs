//! Session cookie jar shared with the HTTP client.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::cookie::{CookieStore as ReqwestCookieStore, Jar};
use reqwest::header::HeaderValue;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::cookies::{CookieError, CookieLine, parse_netscape_cookies};

/// Cookie store collaborator: anything the broker can ask to forget its cookies.
pub trait CookieStore: Send + Sync + std::fmt::Debug {
    /// Drops every cookie, in memory and on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Io`] when the backing file cannot be removed.
    fn clear(&self) -> Result<(), CookieError>;
}

/// In-memory jar, optionally seeded from a Netscape cookie export.
///
/// Implements reqwest's cookie provider interface so the HTTP client reads and
/// records cookies through it; [`CookieStore::clear`] swaps in an empty jar.
#[derive(Debug, Default)]
pub struct SessionCookieJar {
    jar: RwLock<Arc<Jar>>,
    path: Option<PathBuf>,
}

impl SessionCookieJar {
    /// Creates an empty jar with no backing file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the jar from a cookie export at `path`.
    ///
    /// A missing file yields an empty jar that still owns `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError`] when the file exists but cannot be read or parsed.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CookieError> {
        let path = path.as_ref().to_path_buf();
        let jar = Jar::default();

        match File::open(&path) {
            Ok(file) => {
                let parsed = parse_netscape_cookies(BufReader::new(file))?;
                let loaded = seed(&jar, &parsed.cookies);
                info!(
                    cookies = loaded,
                    skipped = parsed.skipped.len(),
                    path = %path.display(),
                    "Loaded cookies"
                );
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "cookie file not found; starting empty");
            }
            Err(error) => return Err(CookieError::Io(error)),
        }

        Ok(Self {
            jar: RwLock::new(Arc::new(jar)),
            path: Some(path),
        })
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn current(&self) -> Arc<Jar> {
        Arc::clone(&self.jar.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl CookieStore for SessionCookieJar {
    fn clear(&self) -> Result<(), CookieError> {
        *self.jar.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Jar::default());

        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "Removed cookie file"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(CookieError::Io(error)),
            }
        }
        Ok(())
    }
}

impl ReqwestCookieStore for SessionCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.current().set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.current().cookies(url)
    }
}

fn seed(jar: &Jar, cookies: &[CookieLine]) -> usize {
    let mut loaded = 0;
    for cookie in cookies {
        match cookie.origin().parse::<Url>() {
            Ok(url) => {
                jar.add_cookie_str(&cookie.to_set_cookie(), &url);
                loaded += 1;
            }
            Err(_) => warn!(
                domain = %cookie.domain,
                name = %cookie.name,
                "skipping cookie with unparseable domain"
            ),
        }
    }
    loaded
}
