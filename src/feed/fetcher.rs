use crate::feed::cookies::CookieJar;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_MAX_REDIRECTS: usize = 20;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/87.0.4280.67 Safari/537.36 Edg/87.0.664.52";
const ACCEPT_LANGUAGE: &str = "ru,en;q=0.9,en-GB;q=0.8,en-US;q=0.7";

/// Errors that can occur while downloading the feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS, timeout or redirect failure
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Server answered without a body
    #[error("Empty response body")]
    EmptyResponse,
    /// Response body exceeded the configured size limit
    #[error("Response too large (limit {0} bytes)")]
    ResponseTooLarge(usize),
}

/// How the HTTP client is built.
#[derive(Debug, Clone)]
pub struct FetcherOptions {
    /// Netscape-format file holding cookies between runs.
    pub cookie_jar: PathBuf,
    /// Whole-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub max_redirects: usize,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
    pub max_feed_bytes: usize,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            cookie_jar: PathBuf::from("cookie.txt"),
            timeout: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            accept_invalid_certs: true,
            max_feed_bytes: DEFAULT_MAX_FEED_SIZE,
        }
    }
}

/// Downloads feed documents, replaying cookies from a jar file.
pub struct Fetcher {
    client: reqwest::Client,
    jar: Arc<CookieJar>,
    cookie_path: PathBuf,
    max_feed_bytes: usize,
}

impl Fetcher {
    pub fn new(options: &FetcherOptions) -> Result<Self, FetchError> {
        let jar = Arc::new(CookieJar::new());

        if options.accept_invalid_certs {
            tracing::warn!("TLS certificate verification is disabled for feed requests");
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(browser_headers())
            .cookie_provider(Arc::clone(&jar))
            .redirect(create_redirect_policy(options.max_redirects))
            .danger_accept_invalid_certs(options.accept_invalid_certs);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            jar,
            cookie_path: options.cookie_jar.clone(),
            max_feed_bytes: options.max_feed_bytes,
        })
    }

    /// Cookies currently held by the client.
    pub fn cookie_jar(&self) -> &CookieJar {
        &self.jar
    }

    /// GET `url` and return the response body.
    ///
    /// The cookie jar file is loaded before the request and rewritten once a
    /// response arrives. Any HTTP status is accepted; only transport failures,
    /// an empty body or an oversized body are errors.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        match self.jar.load(&self.cookie_path) {
            Ok(count) => tracing::debug!(cookies = count, "Loaded cookie jar"),
            Err(e) => tracing::warn!(
                path = %self.cookie_path.display(),
                error = %e,
                "Failed to read cookie jar, continuing without cookies"
            ),
        }

        let body = match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    tracing::debug!(url = %response.url(), status = %status, "Feed response received");
                } else {
                    tracing::warn!(url = %response.url(), status = %status, "Feed returned non-success status");
                }
                read_limited_bytes(response, self.max_feed_bytes).await
            }
            Err(e) => Err(FetchError::Transport(e)),
        };

        // Cookies from redirect hops are kept even when the request failed
        if let Err(e) = self.jar.save(&self.cookie_path) {
            tracing::warn!(
                path = %self.cookie_path.display(),
                error = %e,
                "Failed to write cookie jar"
            );
        }

        let body = body?;
        if body.is_empty() {
            return Err(FetchError::EmptyResponse);
        }
        Ok(body)
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGE),
    );
    headers
}

/// Follow up to `max` redirects, logging each hop.
///
/// No loop detection: cookie challenges legitimately redirect back to the
/// URL that was just requested.
fn create_redirect_policy(max: usize) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= max {
            return attempt.error(format!("Too many redirects (max {})", max));
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %attempt.url(),
            hop = attempt.previous().len(),
            "Following redirect"
        );

        attempt.follow()
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
