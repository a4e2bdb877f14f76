//! Cookie store.
//!
//! Cookies can be seeded from a Netscape-format export (as produced by
//! browser extensions) and are shared with the HTTP client through
//! [`SessionCookieJar`]. The broker only ever clears them.

mod cookies;
mod jar;

pub use cookies::{CookieError, CookieLine, ParsedCookies, parse_netscape_cookies};
pub use jar::{CookieStore, SessionCookieJar};
