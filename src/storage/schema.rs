use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError, TableName};

// ============================================================================
// Database
// ============================================================================

/// Handle to the SQLite database holding one trailer table.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) table: TableName,
}

impl Database {
    /// Open a database connection and create the trailer table if needed.
    ///
    /// `path` may be `:memory:` for a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Locked` if another run holds the database
    /// lock (SQLITE_BUSY, SQLITE_LOCKED).
    /// Returns `DatabaseError::Migration` if the table cannot be created.
    pub async fn open(path: &str, table: TableName) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);
        let in_memory = path == ":memory:";

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release before returning SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // The import pipeline is strictly sequential, one connection is enough.
        // It also keeps an in-memory database alive for the whole pool lifetime.
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10));
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool, table };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::Locked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, table = %db.table, "Opened trailer database");
        Ok(db)
    }

    /// Name of the table this handle reads and writes.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Create the trailer table. Idempotent (`IF NOT EXISTS`).
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let statement = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{}" (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                description TEXT NOT NULL,
                pub_date TEXT NOT NULL,
                image TEXT
            )
        "#,
            self.table
        );
        sqlx::query(&statement).execute(&self.pool).await?;

        Ok(())
    }
}
