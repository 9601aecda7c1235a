//! Recent-sync cursor persistence.

use crate::error::DatabaseError;
use crate::types::{ProviderId, SyncCursor};
use crate::{Error, Result};

use super::{CursorRow, Database};

impl Database {
    /// Get the cursor for a provider
    pub async fn get_sync_cursor(&self, provider: &ProviderId) -> Result<Option<SyncCursor>> {
        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT provider_id, publish_date, download_url, identity, title, updated_at
            FROM sync_cursors
            WHERE provider_id = ?
            "#,
        )
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get sync cursor: {}",
                e
            )))
        })?;

        row.map(CursorRow::into_cursor).transpose()
    }

    /// Insert or replace the cursor for a provider
    pub async fn upsert_sync_cursor(&self, provider: &ProviderId, cursor: &SyncCursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (provider_id, publish_date, download_url, identity, title, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider_id) DO UPDATE SET
                publish_date = excluded.publish_date,
                download_url = excluded.download_url,
                identity = excluded.identity,
                title = excluded.title,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(provider.as_str())
        .bind(cursor.publish_date.timestamp_millis())
        .bind(&cursor.download_url)
        .bind(&cursor.identity)
        .bind(&cursor.title)
        .bind(cursor.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to store sync cursor: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Forget a provider's cursor so the next recent sync starts from scratch
    ///
    /// Returns whether a cursor existed.
    pub async fn delete_sync_cursor(&self, provider: &ProviderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_cursors WHERE provider_id = ?")
            .bind(provider.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete sync cursor: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
