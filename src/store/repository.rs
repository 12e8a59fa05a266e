//! Repository seam for persisted download records.
//!
//! The engine only depends on this trait, so tests can run against the
//! in-memory database or a failing stub without touching the writer task.

use async_trait::async_trait;

use super::{DownloadStore, StoreError, StoredDownload};

/// Data-access contract for persisted downloads.
#[async_trait]
pub trait DownloadRepository: Send + Sync {
    /// Inserts or replaces the row for `record.url`.
    async fn upsert(&self, record: &StoredDownload) -> Result<(), StoreError>;

    /// Deletes the row for `url`; missing rows are not an error.
    async fn remove(&self, url: &str) -> Result<(), StoreError>;

    /// Returns every row in insertion order.
    async fn load_all(&self) -> Result<Vec<StoredDownload>, StoreError>;
}

#[async_trait]
impl DownloadRepository for DownloadStore {
    async fn upsert(&self, record: &StoredDownload) -> Result<(), StoreError> {
        DownloadStore::upsert(self, record).await
    }

    async fn remove(&self, url: &str) -> Result<(), StoreError> {
        DownloadStore::remove(self, url).await
    }

    async fn load_all(&self) -> Result<Vec<StoredDownload>, StoreError> {
        DownloadStore::load_all(self).await
    }
}
