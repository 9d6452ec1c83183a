//! The import run: prepare the table, fetch, parse, select, save.
//!
//! A run is destructive. The table is emptied before the feed is even
//! downloaded, and rows saved before a failure stay committed. Nothing is
//! rolled back or restored.

use chrono::{DateTime, FixedOffset};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::feed::{parse_feed, FeedItem, FetchError, Fetcher, ParseResult};
use crate::storage::{Database, DatabaseError, NewTrailer};

/// Number of trailing feed items kept per run.
pub const DEFAULT_WINDOW: usize = 10;

/// Reasons an import run stops.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Cannot prepare table: {0}")]
    PrepareFailed(#[source] DatabaseError),

    #[error("Cannot load feed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Feed item is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Invalid publication date {value:?}: {source}")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Cannot save trailer: {0}")]
    SaveFailed(#[source] DatabaseError),

    #[error("Import cancelled after saving {saved} trailers")]
    Cancelled { saved: usize },
}

/// Counts reported by a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Rows removed by the prepare step.
    pub removed: u64,
    /// Well-formed items found in the feed.
    pub parsed: usize,
    /// Malformed items dropped by the parser.
    pub skipped: usize,
    /// Rows inserted.
    pub saved: usize,
}

/// Trailing window of `items`, last item first.
///
/// Yields indices `n - 1` down to `n - limit` (or `0` when the feed is
/// shorter than the window). The result is ordered by feed position, not by
/// publication date.
pub fn select_window<T>(items: Vec<T>, limit: usize) -> Vec<T> {
    let start = items.len().saturating_sub(limit);
    items.into_iter().skip(start).rev().collect()
}

/// Parses an RSS `pubDate` (RFC 2822), also accepting RFC 3339.
pub fn parse_pub_date(value: &str) -> Result<DateTime<FixedOffset>, ImportError> {
    let trimmed = value.trim();
    DateTime::parse_from_rfc2822(trimmed)
        .or_else(|rfc2822_err| DateTime::parse_from_rfc3339(trimmed).map_err(|_| rfc2822_err))
        .map_err(|source| ImportError::InvalidDate {
            value: value.to_string(),
            source,
        })
}

/// Validates a feed item into an insertable trailer.
///
/// `title`, `link`, `description`, `pubDate` and a `content:encoded` child
/// are required. Encoded content without an image source yields a trailer
/// without an image.
pub fn build_trailer(item: &FeedItem) -> Result<NewTrailer, ImportError> {
    let required = |name: &'static str| {
        item.field(name)
            .map(str::to_string)
            .ok_or(ImportError::MissingField(name))
    };

    let title = required("title")?;
    let link = required("link")?;
    let description = required("description")?;
    let pub_date = parse_pub_date(&required("pubDate")?)?;
    if !item.has_encoded_content {
        return Err(ImportError::MissingField("image"));
    }

    Ok(NewTrailer {
        title,
        link,
        description,
        pub_date,
        image: item.image.clone(),
    })
}

/// Runs the import pipeline against one table.
pub struct Importer {
    db: Database,
    fetcher: Fetcher,
    window: usize,
    cancelled: Arc<AtomicBool>,
}

impl Importer {
    pub fn new(db: Database, fetcher: Fetcher, window: usize) -> Self {
        Self {
            db,
            fetcher,
            window,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked before every save. Setting it stops the run at the next
    /// save boundary, keeping rows already committed.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Replace the table contents with the newest items of the feed at `url`.
    ///
    /// Order: empty the table, download, parse, select, then insert one row
    /// per selected item. The first failing step ends the run.
    pub async fn run(&self, url: &str) -> Result<ImportSummary, ImportError> {
        let removed = self
            .db
            .truncate()
            .await
            .map_err(ImportError::PrepareFailed)?;
        tracing::info!(table = %self.db.table(), removed = removed, "Table emptied");

        let bytes = self.fetcher.fetch(url).await?;
        tracing::info!(url = %url, bytes = bytes.len(), "Feed downloaded");

        let ParseResult { items, skipped } = parse_feed(&bytes);
        if skipped > 0 {
            tracing::warn!(url = %url, skipped = skipped, "Malformed feed items skipped");
        }
        let parsed = items.len();

        let mut saved = 0;
        for item in select_window(items, self.window) {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(ImportError::Cancelled { saved });
            }

            let trailer = build_trailer(&item)?;
            let id = self
                .db
                .insert_trailer(&trailer)
                .await
                .map_err(ImportError::SaveFailed)?;
            tracing::debug!(id = id, title = %trailer.title, "Trailer saved");
            saved += 1;
        }

        let summary = ImportSummary {
            removed,
            parsed,
            skipped,
            saved,
        };
        tracing::info!(
            parsed = summary.parsed,
            skipped = summary.skipped,
            saved = summary.saved,
            "Import finished"
        );
        Ok(summary)
    }
}
