//! Provider status ledger persistence.

use crate::error::DatabaseError;
use crate::types::{ProviderId, ProviderStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::{Database, StatusRow};

fn millis(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|dt| dt.timestamp_millis())
}

impl Database {
    /// Get the status entry for a provider
    pub async fn get_provider_status(
        &self,
        provider: &ProviderId,
    ) -> Result<Option<ProviderStatus>> {
        let row = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT provider_id, consecutive_failures, escalation_level, initial_failure,
                   most_recent_failure, disabled_until, last_success, last_failure_kind
            FROM provider_status
            WHERE provider_id = ?
            "#,
        )
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get provider status: {}",
                e
            )))
        })?;

        row.map(|r| r.into_status().map(|(_, status)| status))
            .transpose()
    }

    /// Insert or replace the status entry for a provider
    pub async fn upsert_provider_status(
        &self,
        provider: &ProviderId,
        status: &ProviderStatus,
    ) -> Result<()> {
        let escalation_level = i64::try_from(status.escalation_level).map_err(|_| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "escalation level out of range: {}",
                status.escalation_level
            )))
        })?;

        sqlx::query(
            r#"
            INSERT INTO provider_status (provider_id, consecutive_failures, escalation_level,
                                         initial_failure, most_recent_failure, disabled_until,
                                         last_success, last_failure_kind)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider_id) DO UPDATE SET
                consecutive_failures = excluded.consecutive_failures,
                escalation_level = excluded.escalation_level,
                initial_failure = excluded.initial_failure,
                most_recent_failure = excluded.most_recent_failure,
                disabled_until = excluded.disabled_until,
                last_success = excluded.last_success,
                last_failure_kind = excluded.last_failure_kind
            "#,
        )
        .bind(provider.as_str())
        .bind(i64::from(status.consecutive_failures))
        .bind(escalation_level)
        .bind(millis(status.initial_failure))
        .bind(millis(status.most_recent_failure))
        .bind(millis(status.disabled_until))
        .bind(millis(status.last_success))
        .bind(status.last_failure_kind.map(|k| k.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to store provider status: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// All status entries, ordered by provider id
    pub async fn list_provider_statuses(&self) -> Result<Vec<(ProviderId, ProviderStatus)>> {
        let rows = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT provider_id, consecutive_failures, escalation_level, initial_failure,
                   most_recent_failure, disabled_until, last_success, last_failure_kind
            FROM provider_status
            ORDER BY provider_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list provider statuses: {}",
                e
            )))
        })?;

        rows.into_iter().map(StatusRow::into_status).collect()
    }

    /// Providers whose `disabled_until` lies after `now`
    pub async fn get_disabled_providers(&self, now: DateTime<Utc>) -> Result<Vec<ProviderId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT provider_id FROM provider_status
            WHERE disabled_until IS NOT NULL AND disabled_until > ?
            ORDER BY disabled_until ASC
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get disabled providers: {}",
                e
            )))
        })?;

        Ok(ids.into_iter().map(ProviderId::new).collect())
    }
}
