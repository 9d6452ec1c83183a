//! Cookie store persisted as a Netscape/curl cookie-jar file.
//!
//! The jar is handed to the HTTP client as its cookie provider, so cookies
//! set on redirect hops are replayed on the following hops. Matching,
//! expiry and replacement are handled by [`cookie_store`]. Between runs the
//! jar lives in a plain text file, one cookie per line:
//!
//! ```text
//! domain  include_subdomains  path  secure  expires  name  value
//! ```
//!
//! HttpOnly cookies carry a `#HttpOnly_` prefix on the domain, session
//! cookies an expiry of `0`.

use cookie_store::{CookieDomain, CookieExpiration, RawCookie};
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use url::Url;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";
const JAR_HEADER: &str = "# Netscape HTTP Cookie File\n# This file was generated by trailers. Edit at your own risk.\n\n";

/// A single cookie as written to the jar file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    /// Lowercase domain without a leading dot.
    pub domain: String,
    /// `false` for host-only cookies (no `Domain` attribute).
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Unix timestamp, `None` for session cookies.
    pub expires: Option<i64>,
    pub name: String,
    pub value: String,
}

impl StoredCookie {
    /// Parses one jar line. Comments, blank and malformed lines yield `None`.
    fn from_jar_line(line: &str) -> Option<Self> {
        let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None => (line, false),
        };
        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            return None;
        }

        let domain = fields[0].trim_start_matches('.').to_ascii_lowercase();
        if domain.is_empty() || fields[5].is_empty() {
            return None;
        }
        let expires = match fields[4].parse::<i64>().ok()? {
            0 => None,
            t => Some(t),
        };

        Some(Self {
            domain,
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            http_only,
            expires,
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        })
    }

    fn to_jar_line(&self) -> String {
        let flag = |b: bool| if b { "TRUE" } else { "FALSE" };
        let domain = if self.include_subdomains {
            format!(".{}", self.domain)
        } else {
            self.domain.clone()
        };
        format!(
            "{}{}\t{}\t{}\t{}\t{}\t{}\t{}",
            if self.http_only { HTTP_ONLY_PREFIX } else { "" },
            domain,
            flag(self.include_subdomains),
            self.path,
            flag(self.secure),
            self.expires.unwrap_or(0),
            self.name,
            self.value
        )
    }

    /// Converts a cookie held by the store. Cookies without a usable
    /// domain cannot be written to a jar and yield `None`.
    fn from_store(cookie: &cookie_store::Cookie<'_>) -> Option<Self> {
        let (domain, include_subdomains) = match &cookie.domain {
            CookieDomain::HostOnly(d) => (d.clone(), false),
            CookieDomain::Suffix(d) => (d.clone(), true),
            _ => return None,
        };
        let path: &str = cookie.path.as_ref();
        let expires = match &cookie.expires {
            CookieExpiration::AtUtc(at) => Some(at.unix_timestamp()),
            _ => None,
        };

        Some(Self {
            domain,
            include_subdomains,
            path: path.to_string(),
            secure: cookie.secure().unwrap_or(false),
            http_only: cookie.http_only().unwrap_or(false),
            expires,
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
        })
    }

    /// The `Set-Cookie` equivalent of this jar line.
    fn to_raw(&self) -> RawCookie<'static> {
        let mut builder = RawCookie::build((self.name.clone(), self.value.clone()))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);
        if self.include_subdomains {
            builder = builder.domain(self.domain.clone());
        }
        if let Some(at) = self
            .expires
            .and_then(|t| cookie::time::OffsetDateTime::from_unix_timestamp(t).ok())
        {
            builder = builder.expires(at);
        }
        builder.build()
    }

    /// A URL the cookie could have been set from.
    fn origin(&self) -> Option<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        Url::parse(&format!("{}://{}{}", scheme, self.domain, self.path)).ok()
    }
}

/// Thread-safe cookie store backed by a Netscape-format file.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: RwLock<cookie_store::CookieStore>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a jar from Netscape-format text, skipping malformed lines.
    pub fn from_netscape(content: &str) -> Self {
        let jar = Self::new();
        jar.replace_from_netscape(content);
        jar
    }

    /// Number of cookies currently held.
    pub fn len(&self) -> usize {
        self.read().iter_any().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored cookies, ordered by domain, path and name.
    pub fn cookies_snapshot(&self) -> Vec<StoredCookie> {
        let mut cookies: Vec<StoredCookie> = self
            .read()
            .iter_any()
            .filter_map(StoredCookie::from_store)
            .collect();
        cookies.sort_by(|a, b| {
            (&a.domain, &a.path, &a.name).cmp(&(&b.domain, &b.path, &b.name))
        });
        cookies
    }

    /// Replaces the jar contents with the file at `path`.
    ///
    /// A missing file empties the jar; other I/O errors leave it untouched
    /// and are returned.
    pub fn load(&self, path: &Path) -> std::io::Result<usize> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(self.replace_from_netscape(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No cookie jar yet, starting empty");
                self.write().clear();
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Writes the unexpired cookies to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        use std::io::Write;
        use std::time::{SystemTime, UNIX_EPOCH};

        let content = self.to_netscape();

        // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
        let random_suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;

        let written = file
            .write_all(content.as_bytes())
            .and_then(|_| file.sync_all());
        drop(file);
        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        // On Windows, rename fails if destination exists, so remove it first
        #[cfg(windows)]
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        std::fs::rename(&temp_path, path).inspect_err(|_| {
            let _ = std::fs::remove_file(&temp_path);
        })
    }

    /// Serializes the unexpired cookies in Netscape format.
    pub fn to_netscape(&self) -> String {
        let mut out = String::from(JAR_HEADER);
        for cookie in self
            .read()
            .iter_unexpired()
            .filter_map(StoredCookie::from_store)
        {
            out.push_str(&cookie.to_jar_line());
            out.push('\n');
        }
        out
    }

    /// Returns the number of cookies held afterwards. Expired lines are dropped.
    fn replace_from_netscape(&self, content: &str) -> usize {
        let mut store = cookie_store::CookieStore::default();
        for stored in content.lines().filter_map(StoredCookie::from_jar_line) {
            let Some(origin) = stored.origin() else {
                continue;
            };
            if let Err(e) = store.insert_raw(&stored.to_raw(), &origin) {
                tracing::debug!(name = %stored.name, error = %e, "Skipping jar cookie");
            }
        }
        let count = store.iter_any().count();
        *self.write() = store;
        count
    }

    fn read(&self) -> RwLockReadGuard<'_, cookie_store::CookieStore> {
        // A panic while holding the lock cannot leave the store half-updated
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, cookie_store::CookieStore> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let parsed = cookie_headers.filter_map(|header| {
            let value = header.to_str().ok()?;
            match RawCookie::parse(value.to_owned()) {
                Ok(cookie) => Some(cookie),
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring unparsable Set-Cookie header");
                    None
                }
            }
        });
        self.write().store_response_cookies(parsed, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let store = self.read();
        let mut matching = store.matches(url);
        if matching.is_empty() {
            return None;
        }
        // Longer paths first
        matching.sort_by_key(|c| {
            let path: &str = c.path.as_ref();
            std::cmp::Reverse(path.len())
        });

        let header = matching
            .iter()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }
}
