//! Feed retrieval and item extraction.
//!
//! - [`fetcher`] - HTTP download with cookie replay, redirects and a size cap
//! - [`cookies`] - Netscape cookie-jar file backing the HTTP client's cookie store
//! - [`parser`] - Streaming `<item>` extraction with per-item failure tolerance

mod cookies;
mod fetcher;
mod parser;

pub use cookies::{CookieJar, StoredCookie};
pub use fetcher::{FetchError, Fetcher, FetcherOptions};
pub use parser::{extract_image, parse_feed, FeedItem, FeedNode, ItemError, ParseResult};
