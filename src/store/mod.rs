//! Persisted download state.
//!
//! Every tracked download has one row in the `downloads` table. Rows are
//! written on structural changes only (add, probe result, pause, retry,
//! completion, save, delete); progress ticks never touch the database.
//!
//! # Overview
//!
//! - [`DownloadStore`] - `SQLite`-backed row access
//! - [`DownloadRepository`] - trait seam the engine depends on
//! - [`spawn_writer`] / [`PersistHandle`] - single ordered writer task
//!
//! # Example
//!
//! ```no_run
//! use dlmanager_core::Database;
//! use dlmanager_core::store::DownloadStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DownloadStore::new(Database::new_in_memory().await?);
//! for row in store.load_all().await? {
//!     println!("{} ({})", row.url, row.state);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod record;
mod repository;
mod writer;

pub use error::{StoreDbErrorKind, StoreError};
pub use record::StoredDownload;
pub use repository::DownloadRepository;
pub use writer::{PersistHandle, PersistOp, spawn_writer};

use tracing::instrument;

use crate::db::Database;

/// `SQLite`-backed store of download rows.
#[derive(Debug, Clone)]
pub struct DownloadStore {
    db: Database,
}

impl DownloadStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or replaces the row for `record.url`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the statement fails.
    #[instrument(level = "debug", skip(self, record), fields(url = %record.url, state = %record.state))]
    pub async fn upsert(&self, record: &StoredDownload) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO downloads (
                url, seq, temp_path, filename_guess_from_url, filename_guess_from_head,
                bytes_total, resumable, state, last_error, attempt_counter, saved_path
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                seq = excluded.seq,
                temp_path = excluded.temp_path,
                filename_guess_from_url = excluded.filename_guess_from_url,
                filename_guess_from_head = excluded.filename_guess_from_head,
                bytes_total = excluded.bytes_total,
                resumable = excluded.resumable,
                state = excluded.state,
                last_error = excluded.last_error,
                attempt_counter = excluded.attempt_counter,
                saved_path = excluded.saved_path,
                updated_at = datetime('now')",
        )
        .bind(&record.url)
        .bind(record.seq)
        .bind(&record.temp_path)
        .bind(&record.filename_guess_from_url)
        .bind(&record.filename_guess_from_head)
        .bind(record.bytes_total)
        .bind(record.resumable)
        .bind(&record.state)
        .bind(&record.last_error)
        .bind(record.attempt_counter)
        .bind(&record.saved_path)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Deletes the row for `url`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the statement fails.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, url: &str) -> Result<(), StoreError> {
        sqlx::query(r"DELETE FROM downloads WHERE url = ?")
            .bind(url)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Returns every row ordered by insertion sequence.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the query fails.
    #[instrument(level = "debug", skip(self))]
    pub async fn load_all(&self) -> Result<Vec<StoredDownload>, StoreError> {
        let rows = sqlx::query_as::<_, StoredDownload>(
            r"SELECT url, seq, temp_path, filename_guess_from_url, filename_guess_from_head,
                     bytes_total, resumable, state, last_error, attempt_counter, saved_path
              FROM downloads
              ORDER BY seq ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}
