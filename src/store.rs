//! Persistence for sync cursors and provider status
//!
//! Both values are keyed by [`ProviderId`] with last-write-wins semantics.
//! [`MemoryStore`] keeps them in process memory; the SQLite-backed
//! [`Database`](crate::db::Database) survives restarts.

use crate::error::Result;
use crate::types::{ProviderId, ProviderStatus, SyncCursor};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Get/set storage for per-provider state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Cursor written by the last recent sync, if any
    async fn get_cursor(&self, provider: &ProviderId) -> Result<Option<SyncCursor>>;

    /// Replace the provider's cursor
    async fn set_cursor(&self, provider: &ProviderId, cursor: &SyncCursor) -> Result<()>;

    /// Ledger entry, if the provider has one
    async fn get_status(&self, provider: &ProviderId) -> Result<Option<ProviderStatus>>;

    /// Replace the provider's ledger entry
    async fn set_status(&self, provider: &ProviderId, status: &ProviderStatus) -> Result<()>;

    /// Every stored ledger entry
    async fn all_statuses(&self) -> Result<Vec<(ProviderId, ProviderStatus)>>;
}

/// In-memory [`StateStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    cursors: RwLock<HashMap<ProviderId, SyncCursor>>,
    statuses: RwLock<HashMap<ProviderId, ProviderStatus>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_cursor(&self, provider: &ProviderId) -> Result<Option<SyncCursor>> {
        Ok(self.cursors.read().await.get(provider).cloned())
    }

    async fn set_cursor(&self, provider: &ProviderId, cursor: &SyncCursor) -> Result<()> {
        self.cursors
            .write()
            .await
            .insert(provider.clone(), cursor.clone());
        Ok(())
    }

    async fn get_status(&self, provider: &ProviderId) -> Result<Option<ProviderStatus>> {
        Ok(self.statuses.read().await.get(provider).cloned())
    }

    async fn set_status(&self, provider: &ProviderId, status: &ProviderStatus) -> Result<()> {
        self.statuses
            .write()
            .await
            .insert(provider.clone(), status.clone());
        Ok(())
    }

    async fn all_statuses(&self) -> Result<Vec<(ProviderId, ProviderStatus)>> {
        let mut all: Vec<_> = self
            .statuses
            .read()
            .await
            .iter()
            .map(|(id, status)| (id.clone(), status.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }
}
