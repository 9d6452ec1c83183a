//! Imports the newest movie trailers from an RSS feed into a SQLite table.
//!
//! Each run empties the table, downloads the feed, and stores the last
//! [`import::DEFAULT_WINDOW`] items, newest feed position first.

pub mod config;
pub mod feed;
pub mod import;
pub mod storage;
