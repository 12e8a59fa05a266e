//! Download records and the snapshot shape pushed to the presentation layer.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::filename::display_filename;

/// Lifecycle state of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Registered, waiting for a transfer unit to pick it up.
    Queued,
    /// HEAD probe (or ranged GET fallback) in flight.
    Probing,
    /// Body is streaming to the partial artifact.
    Downloading,
    /// Last attempt failed; waiting out the backoff delay.
    Retrying,
    /// Stopped by the user; resumes on `set_paused(false)`.
    Paused,
    /// All bytes are on disk.
    Complete,
    /// Terminal error that retrying cannot fix.
    Failed,
}

impl DownloadState {
    /// Returns the persisted/string form of this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Probing => "probing",
            Self::Downloading => "downloading",
            Self::Retrying => "retrying",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Whether no transfer work will happen without user action.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether a transfer unit currently owns this download.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Probing | Self::Downloading | Self::Retrying
        )
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "probing" => Ok(Self::Probing),
            "downloading" => Ok(Self::Downloading),
            "retrying" => Ok(Self::Retrying),
            "paused" => Ok(Self::Paused),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown download state '{other}'")),
        }
    }
}

/// One tracked download, keyed by its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Canonical URL as supplied by the caller.
    pub url: String,
    /// Save name derived from the URL path (may be empty).
    pub filename_guess_from_url: String,
    /// Save name from `Content-Disposition` (may be empty).
    pub filename_guess_from_head: String,
    /// Total size, 0 while unknown.
    pub bytes_total: u64,
    /// Bytes present in the partial artifact.
    pub bytes_downloaded: u64,
    /// Trailing-window throughput; 0 unless `Downloading`.
    pub bytes_per_second: u64,
    /// Server advertised byte ranges on the latest probe.
    pub resumable: bool,
    /// Number of failed attempts so far.
    pub attempt_counter: u32,
    /// Current lifecycle state.
    pub state: DownloadState,
    /// Where the last successful save put the file.
    pub saved_path: Option<PathBuf>,
    /// Human-readable reason for the latest failure.
    pub last_error: Option<String>,
}

impl Download {
    /// Creates a fresh queued record.
    #[must_use]
    pub fn new(url: impl Into<String>, filename_guess_from_url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename_guess_from_url: filename_guess_from_url.into(),
            filename_guess_from_head: String::new(),
            bytes_total: 0,
            bytes_downloaded: 0,
            bytes_per_second: 0,
            resumable: false,
            attempt_counter: 0,
            state: DownloadState::Queued,
            saved_path: None,
            last_error: None,
        }
    }

    /// Percentage complete in `[0, 100]`; 0 while the total is unknown.
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        let pct = self.bytes_downloaded as f64 / self.bytes_total as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }

    /// Name shown to the user and used as the default save name.
    #[must_use]
    pub fn display_name(&self) -> String {
        display_filename(&self.filename_guess_from_head, &self.filename_guess_from_url)
    }

    /// Wire form of this record.
    #[must_use]
    pub fn to_snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot {
            url: self.url.clone(),
            filename_guess_from_url: self.filename_guess_from_url.clone(),
            filename_guess_from_head: self.filename_guess_from_head.clone(),
            bytes: self.bytes_total,
            downloaded_bytes: self.bytes_downloaded,
            resumable: self.resumable,
            paused: self.state == DownloadState::Paused,
            complete: self.state == DownloadState::Complete,
            pct: self.percent_complete(),
            bytes_per_second: self.bytes_per_second,
            attempt_counter: self.attempt_counter,
            state: self.state,
            error: self.last_error.clone(),
            saved_path: self
                .saved_path
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }
}

/// Immutable copy of a download as handed to the presentation layer.
///
/// Field names match what existing front ends already consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSnapshot {
    /// Canonical URL.
    #[serde(rename = "URL")]
    pub url: String,
    /// Save name derived from the URL path.
    #[serde(rename = "FilenameGuessFromURL")]
    pub filename_guess_from_url: String,
    /// Save name from the probe.
    #[serde(rename = "FilenameGuessFromHEAD")]
    pub filename_guess_from_head: String,
    /// Total size (0 while unknown).
    #[serde(rename = "Bytes")]
    pub bytes: u64,
    /// Bytes on disk.
    #[serde(rename = "DownloadedBytes")]
    pub downloaded_bytes: u64,
    /// Range support.
    #[serde(rename = "Resumable")]
    pub resumable: bool,
    /// Whether the download is paused.
    #[serde(rename = "Paused")]
    pub paused: bool,
    /// Whether the download finished.
    #[serde(rename = "Complete")]
    pub complete: bool,
    /// Percent complete in `[0, 100]`.
    #[serde(rename = "Pct")]
    pub pct: f64,
    /// Current throughput.
    #[serde(rename = "BytesPerSecond")]
    pub bytes_per_second: u64,
    /// Failed attempts so far.
    #[serde(rename = "AttemptCounter")]
    pub attempt_counter: u32,
    /// Lifecycle state.
    #[serde(rename = "State")]
    pub state: DownloadState,
    /// Latest failure reason.
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last save destination.
    #[serde(rename = "SavedPath", default, skip_serializing_if = "Option::is_none")]
    pub saved_path: Option<String>,
}

impl DownloadSnapshot {
    /// Name shown to the user.
    #[must_use]
    pub fn display_name(&self) -> String {
        display_filename(&self.filename_guess_from_head, &self.filename_guess_from_url)
    }
}
