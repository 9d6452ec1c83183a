use chrono::{DateTime, FixedOffset};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Table name is empty or not a plain SQL identifier
    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    /// Another import run holds the database lock
    #[error("Database is locked. Another import appears to be running.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5): database is locked
/// SQLITE_LOCKED (6): database table is locked
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
}

// ============================================================================
// Table Name
// ============================================================================

/// A validated SQL identifier naming the trailer table.
///
/// The name is interpolated into statements, so only ASCII letters, digits
/// and underscores are accepted, starting with a letter or underscore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    const MAX_LEN: usize = 64;

    pub fn parse(name: &str) -> Result<Self, DatabaseError> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_start || !valid_rest || name.len() > Self::MAX_LEN {
            return Err(DatabaseError::InvalidTableName(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A trailer ready to be inserted.
///
/// Built from a feed item once its required fields and publication date
/// have been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrailer {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: DateTime<FixedOffset>,
    pub image: Option<String>,
}

/// A persisted trailer row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TrailerRecord {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: DateTime<FixedOffset>,
    pub image: Option<String>,
}
