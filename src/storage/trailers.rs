use super::schema::Database;
use super::types::{DatabaseError, NewTrailer, TrailerRecord};

impl Database {
    // ========================================================================
    // Replace Operations
    // ========================================================================

    /// Remove every row from the trailer table, returns the number removed.
    ///
    /// Unconditional: runs even when the table is already empty. A missing
    /// table, a lock or a permission problem is reported with the underlying
    /// sqlx error.
    pub async fn truncate(&self) -> Result<u64, DatabaseError> {
        let statement = format!(r#"DELETE FROM "{}""#, self.table);
        let result = sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    /// Insert one trailer and return its generated id.
    ///
    /// Each call is its own autocommit statement, so the row is durable as
    /// soon as this returns.
    pub async fn insert_trailer(&self, trailer: &NewTrailer) -> Result<i64, DatabaseError> {
        let statement = format!(
            r#"INSERT INTO "{}" (title, link, description, pub_date, image) VALUES (?, ?, ?, ?, ?)"#,
            self.table
        );
        let result = sqlx::query(&statement)
            .bind(&trailer.title)
            .bind(&trailer.link)
            .bind(&trailer.description)
            .bind(trailer.pub_date)
            .bind(&trailer.image)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.last_insert_rowid())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All persisted trailers in insertion order.
    pub async fn list_trailers(&self) -> Result<Vec<TrailerRecord>, DatabaseError> {
        let statement = format!(
            r#"SELECT id, title, link, description, pub_date, image FROM "{}" ORDER BY id"#,
            self.table
        );
        let rows = sqlx::query_as::<_, TrailerRecord>(&statement)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(rows)
    }

    /// Get a single trailer by its id, `None` when it does not exist.
    pub async fn get_trailer(&self, id: i64) -> Result<Option<TrailerRecord>, DatabaseError> {
        let statement = format!(
            r#"SELECT id, title, link, description, pub_date, image FROM "{}" WHERE id = ?"#,
            self.table
        );
        let row = sqlx::query_as::<_, TrailerRecord>(&statement)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(row)
    }
}
