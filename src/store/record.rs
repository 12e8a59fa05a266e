//! Row type for the `downloads` table.

use std::path::PathBuf;

use sqlx::FromRow;

use super::StoreError;
use crate::download::{Download, DownloadState};

/// A download as persisted in the state database.
///
/// `bytes_downloaded` is deliberately absent: the partial artifact's length
/// on disk is the only source of truth for it.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredDownload {
    /// Canonical URL (primary key).
    pub url: String,
    /// Insertion order.
    pub seq: i64,
    /// Partial artifact path.
    pub temp_path: String,
    /// Save name derived from the URL.
    pub filename_guess_from_url: String,
    /// Save name from the probe.
    pub filename_guess_from_head: String,
    /// Total size, 0 while unknown.
    pub bytes_total: i64,
    /// Range support seen on the latest probe.
    pub resumable: bool,
    /// Lifecycle state as text.
    pub state: String,
    /// Latest failure reason.
    pub last_error: Option<String>,
    /// Failed attempts so far.
    pub attempt_counter: i64,
    /// Last save destination.
    pub saved_path: Option<String>,
}

impl StoredDownload {
    /// Builds a row from a live record.
    #[must_use]
    pub fn from_download(seq: u64, temp_path: &std::path::Path, download: &Download) -> Self {
        Self {
            url: download.url.clone(),
            seq: i64::try_from(seq).unwrap_or(i64::MAX),
            temp_path: temp_path.display().to_string(),
            filename_guess_from_url: download.filename_guess_from_url.clone(),
            filename_guess_from_head: download.filename_guess_from_head.clone(),
            bytes_total: i64::try_from(download.bytes_total).unwrap_or(i64::MAX),
            resumable: download.resumable,
            state: download.state.as_str().to_string(),
            last_error: download.last_error.clone(),
            attempt_counter: i64::from(download.attempt_counter),
            saved_path: download
                .saved_path
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }

    /// Turns the row back into a record with `bytes_downloaded = 0`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::CorruptRow` when the state text or a numeric
    /// column is out of range.
    pub fn to_download(&self) -> Result<Download, StoreError> {
        let state: DownloadState = self
            .state
            .parse()
            .map_err(|reason: String| StoreError::corrupt_row(&self.url, reason))?;
        let bytes_total = u64::try_from(self.bytes_total)
            .map_err(|_| StoreError::corrupt_row(&self.url, "negative bytes_total"))?;
        let attempt_counter = u32::try_from(self.attempt_counter)
            .map_err(|_| StoreError::corrupt_row(&self.url, "attempt_counter out of range"))?;

        Ok(Download {
            url: self.url.clone(),
            filename_guess_from_url: self.filename_guess_from_url.clone(),
            filename_guess_from_head: self.filename_guess_from_head.clone(),
            bytes_total,
            bytes_downloaded: 0,
            bytes_per_second: 0,
            resumable: self.resumable,
            attempt_counter,
            state,
            saved_path: self.saved_path.as_ref().map(PathBuf::from),
            last_error: self.last_error.clone(),
        })
    }
}
