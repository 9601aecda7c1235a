//! SQLite persistence for sync cursors and provider status
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`cursors`] - Recent-sync cursors
//! - [`status`] - Provider health ledger
//!
//! Timestamps are stored as Unix milliseconds.

use crate::error::{DatabaseError, FailureKind};
use crate::store::StateStore;
use crate::types::{ProviderId, ProviderStatus, SyncCursor};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod cursors;
mod migrations;
mod status;

/// Sync cursor row
#[derive(Debug, Clone, FromRow)]
pub(crate) struct CursorRow {
    pub provider_id: String,
    pub publish_date: i64,
    pub download_url: String,
    pub identity: String,
    pub title: String,
    pub updated_at: i64,
}

impl CursorRow {
    fn into_cursor(self) -> Result<SyncCursor> {
        Ok(SyncCursor {
            publish_date: from_millis(self.publish_date, "publish_date")?,
            download_url: self.download_url,
            identity: self.identity,
            title: self.title,
            updated_at: from_millis(self.updated_at, "updated_at")?,
        })
    }
}

/// Provider status row
#[derive(Debug, Clone, FromRow)]
pub(crate) struct StatusRow {
    pub provider_id: String,
    pub consecutive_failures: i64,
    pub escalation_level: i64,
    pub initial_failure: Option<i64>,
    pub most_recent_failure: Option<i64>,
    pub disabled_until: Option<i64>,
    pub last_success: Option<i64>,
    pub last_failure_kind: Option<String>,
}

impl StatusRow {
    fn into_status(self) -> Result<(ProviderId, ProviderStatus)> {
        let status = ProviderStatus {
            consecutive_failures: u32::try_from(self.consecutive_failures).map_err(|_| {
                corrupt(format!(
                    "consecutive_failures out of range: {}",
                    self.consecutive_failures
                ))
            })?,
            escalation_level: usize::try_from(self.escalation_level).map_err(|_| {
                corrupt(format!(
                    "escalation_level out of range: {}",
                    self.escalation_level
                ))
            })?,
            initial_failure: opt_from_millis(self.initial_failure, "initial_failure")?,
            most_recent_failure: opt_from_millis(self.most_recent_failure, "most_recent_failure")?,
            disabled_until: opt_from_millis(self.disabled_until, "disabled_until")?,
            last_success: opt_from_millis(self.last_success, "last_success")?,
            last_failure_kind: self
                .last_failure_kind
                .as_deref()
                .map(FailureKind::from_str_lossy),
        };
        Ok((ProviderId::new(self.provider_id), status))
    }
}

fn corrupt(message: String) -> Error {
    Error::Database(DatabaseError::CorruptRecord(message))
}

fn from_millis(value: i64, column: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| corrupt(format!("{} out of range: {}", column, value)))
}

fn opt_from_millis(value: Option<i64>, column: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| from_millis(v, column)).transpose()
}

/// Database handle for indexer-sync
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl StateStore for Database {
    async fn get_cursor(&self, provider: &ProviderId) -> Result<Option<SyncCursor>> {
        self.get_sync_cursor(provider).await
    }

    async fn set_cursor(&self, provider: &ProviderId, cursor: &SyncCursor) -> Result<()> {
        self.upsert_sync_cursor(provider, cursor).await
    }

    async fn get_status(&self, provider: &ProviderId) -> Result<Option<ProviderStatus>> {
        self.get_provider_status(provider).await
    }

    async fn set_status(&self, provider: &ProviderId, status: &ProviderStatus) -> Result<()> {
        self.upsert_provider_status(provider, status).await
    }

    async fn all_statuses(&self) -> Result<Vec<(ProviderId, ProviderStatus)>> {
        self.list_provider_statuses().await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
