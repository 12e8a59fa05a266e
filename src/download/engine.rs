//! Download engine: the command surface over registry, scheduler, and publisher.
//!
//! This module provides the `DownloadEngine` which accepts the front end's
//! commands (add, delete, pause/resume, save, front-end-ready), owns the
//! background tasks that carry them out, and rehydrates persisted downloads
//! on start.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dlmanager_core::Database;
//! use dlmanager_core::download::{ChannelSink, DownloadEngine, EngineSettings};
//! use dlmanager_core::store::DownloadStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DownloadStore::new(Database::new_in_memory().await?);
//! let (sink, mut snapshots) = ChannelSink::channel();
//! let engine = DownloadEngine::start(
//!     EngineSettings::new("/tmp/dlmanager-parts"),
//!     Arc::new(store),
//!     Arc::new(sink),
//! )
//! .await?;
//!
//! engine.add("https://example.com/file.iso");
//! engine.front_end_ready();
//! engine.wait_until_settled().await;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, parse_download_url};
use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_PUBLISH_INTERVAL, PROBE_TIMEOUT_SECS, READ_TIMEOUT_SECS,
};
use super::error::EngineError;
use super::filename::filename_guess_from_url;
use super::model::{Download, DownloadSnapshot, DownloadState};
use super::publisher::{Publisher, SnapshotSink};
use super::registry::{Inserted, Registry};
use super::retry::RetryPolicy;
use super::scheduler::Scheduler;
use crate::store::{DownloadRepository, PersistHandle, spawn_writer};

/// Tunables for a [`DownloadEngine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Directory holding partial artifacts.
    pub temp_dir: PathBuf,
    /// Snapshot coalescing interval.
    pub publish_interval: Duration,
    /// Backoff between failed attempts.
    pub retry_policy: RetryPolicy,
    /// Upper bound on simultaneously running transfers; `None` is unbounded.
    pub max_active: Option<usize>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Idle timeout between body reads.
    pub read_timeout: Duration,
    /// Whole-request timeout for the probe.
    pub probe_timeout: Duration,
}

impl EngineSettings {
    /// Default settings storing partial artifacts under `temp_dir`.
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            retry_policy: RetryPolicy::default(),
            max_active: None,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
        }
    }
}

/// Result of [`DownloadEngine::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new download was queued.
    Added,
    /// The URL was already tracked; nothing changed.
    AlreadyPresent,
    /// The URL is malformed; a `Failed` record carries the reason.
    Rejected {
        /// Why the URL was rejected.
        reason: String,
    },
}

/// Handle to a running download engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    registry: Arc<Registry>,
    scheduler: Scheduler,
    publisher: StdMutex<Option<Publisher>>,
    persist: PersistHandle,
}

impl DownloadEngine {
    /// Starts an engine: rehydrates persisted downloads, resumes the active
    /// ones, and spawns the snapshot publisher.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Io` if the temp directory cannot be created,
    /// `EngineError::Http` if the HTTP client cannot be built, and
    /// `EngineError::Store` if persisted state cannot be read.
    #[instrument(skip(repo, sink), fields(temp_dir = %settings.temp_dir.display()))]
    pub async fn start(
        settings: EngineSettings,
        repo: Arc<dyn DownloadRepository>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Result<Self, EngineError> {
        fs::create_dir_all(&settings.temp_dir)
            .await
            .map_err(|e| EngineError::io(&settings.temp_dir, e))?;

        let client = HttpClient::with_timeouts(
            settings.connect_timeout,
            settings.read_timeout,
            settings.probe_timeout,
        )
        .map_err(|source| EngineError::Http { source })?;

        let rows = repo.load_all().await?;
        let (persist, _writer) = spawn_writer(repo);
        let registry = Arc::new(Registry::new(
            settings.temp_dir.clone(),
            Some(persist.clone()),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&registry),
            client,
            settings.retry_policy.clone(),
            settings.max_active,
        );

        let mut restored = 0usize;
        for row in rows {
            let mut record = match row.to_download() {
                Ok(record) => record,
                Err(error) => {
                    warn!(error = %error, "skipping unreadable persisted download");
                    continue;
                }
            };
            let temp_path = PathBuf::from(&row.temp_path);
            let on_disk = artifact_len(&temp_path).await;
            rehydrate(&mut record, on_disk);

            let active = record.state.is_active();
            let seq = u64::try_from(row.seq).unwrap_or(0);
            if let Inserted::New(lease) = registry.restore(seq, temp_path, record)
                && active
            {
                scheduler.start(lease);
            }
            restored += 1;
        }
        if restored > 0 {
            info!(restored, "rehydrated persisted downloads");
        }

        let publisher = Publisher::spawn(Arc::clone(&registry), sink, settings.publish_interval);

        Ok(Self {
            inner: Arc::new(EngineInner {
                registry,
                scheduler,
                publisher: StdMutex::new(Some(publisher)),
                persist,
            }),
        })
    }

    /// Starts tracking `url`.
    ///
    /// Adding a URL that is already tracked is a no-op. A malformed URL is
    /// still recorded, as a `Failed` entry whose error explains why, so the
    /// front end always has something to show. Adding a URL whose delete is
    /// still in flight queues the new record until the delete finishes.
    #[instrument(skip(self))]
    pub fn add(&self, url: &str) -> AddOutcome {
        let url = url.trim();
        match parse_download_url(url) {
            Ok(parsed) => {
                let record = Download::new(url, filename_guess_from_url(&parsed));
                match self.inner.registry.insert(record) {
                    Inserted::New(lease) => {
                        info!(url = %url, "download added");
                        self.inner.scheduler.start(lease);
                        AddOutcome::Added
                    }
                    Inserted::Deferred => {
                        info!(url = %url, "download added after pending delete");
                        AddOutcome::Added
                    }
                    Inserted::AlreadyPresent => AddOutcome::AlreadyPresent,
                }
            }
            Err(error) => {
                let reason = error.to_string();
                let mut record = Download::new(url, "");
                record.state = DownloadState::Failed;
                record.last_error = Some(reason.clone());
                match self.inner.registry.insert(record) {
                    Inserted::New(_) | Inserted::Deferred => {
                        warn!(url = %url, %reason, "rejected malformed URL");
                        AddOutcome::Rejected { reason }
                    }
                    Inserted::AlreadyPresent => AddOutcome::AlreadyPresent,
                }
            }
        }
    }

    /// Stops and forgets a download, deleting its partial artifact.
    ///
    /// Waits until the transfer task has released the artifact. A re-add
    /// queued while the delete was in flight starts once it finishes.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for unknown URLs.
    #[instrument(skip(self))]
    pub async fn delete(&self, url: &str) -> Result<(), EngineError> {
        let (artifact_lock, temp_path) = self.inner.registry.begin_remove(url)?;
        {
            let _artifact = artifact_lock.lock().await;
            match fs::remove_file(&temp_path).await {
                Ok(()) => debug!(path = %temp_path.display(), "removed partial artifact"),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(path = %temp_path.display(), error = %error, "failed to remove partial artifact");
                }
            }
        }
        if let Some(lease) = self.inner.registry.finish_remove(url) {
            self.inner.scheduler.start(lease);
        }
        Ok(())
    }

    /// Pauses (`true`) or resumes (`false`) a download.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for unknown URLs.
    #[instrument(skip(self))]
    pub fn set_paused(&self, url: &str, paused: bool) -> Result<(), EngineError> {
        if paused {
            self.inner.registry.pause(url)
        } else {
            if let Some(lease) = self.inner.registry.resume(url)? {
                self.inner.scheduler.start(lease);
            }
            Ok(())
        }
    }

    /// Copies a completed download to `destination`.
    ///
    /// The copy is written next to the destination and renamed over it, so
    /// the destination is either untouched or fully replaced. The partial
    /// artifact is kept, so the same download can be saved again.
    ///
    /// # Errors
    ///
    /// - `EngineError::NotFound` for unknown URLs
    /// - `EngineError::NotComplete` unless the download is `Complete`
    /// - `EngineError::DestinationExists` when the destination exists and
    ///   `overwrite` is false
    /// - `EngineError::Io` when copying or renaming fails
    #[instrument(skip(self, destination), fields(destination = %destination.display()))]
    pub async fn save(
        &self,
        url: &str,
        destination: &Path,
        overwrite: bool,
    ) -> Result<PathBuf, EngineError> {
        let record = self
            .inner
            .registry
            .get(url)
            .ok_or_else(|| EngineError::not_found(url))?;
        if record.state != DownloadState::Complete {
            return Err(EngineError::NotComplete {
                url: url.to_string(),
            });
        }
        let (artifact_lock, artifact) = self
            .inner
            .registry
            .artifact(url)
            .ok_or_else(|| EngineError::not_found(url))?;
        let _artifact = artifact_lock.lock().await;

        let exists = fs::try_exists(destination)
            .await
            .map_err(|e| EngineError::io(destination, e))?;
        if exists && !overwrite {
            return Err(EngineError::DestinationExists {
                path: destination.to_path_buf(),
            });
        }

        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| EngineError::io(&parent, e))?;

        let staging = staging_path(&parent, destination);
        if let Err(error) = fs::copy(&artifact, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(EngineError::io(&artifact, error));
        }
        if let Err(error) = fs::rename(&staging, destination).await {
            let _ = fs::remove_file(&staging).await;
            return Err(EngineError::io(destination, error));
        }

        self.inner.registry.set_saved_path(url, destination);
        info!(url = %url, path = %destination.display(), overwrite, "download saved");
        Ok(destination.to_path_buf())
    }

    /// Default save destination for `url` inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for unknown URLs.
    pub fn default_save_path(&self, url: &str, dir: &Path) -> Result<PathBuf, EngineError> {
        let record = self
            .inner
            .registry
            .get(url)
            .ok_or_else(|| EngineError::not_found(url))?;
        Ok(dir.join(record.display_name()))
    }

    /// Signals that the front end is ready for snapshot pushes.
    pub fn front_end_ready(&self) {
        let guard = self
            .inner
            .publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(publisher) = guard.as_ref() {
            publisher.front_end_ready();
        }
    }

    /// Ordered snapshot of every download.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DownloadSnapshot> {
        self.inner.registry.snapshot()
    }

    /// Copy of one record.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<Download> {
        self.inner.registry.get(url)
    }

    /// Receiver that wakes on every registry change.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<u64> {
        self.inner.registry.subscribe()
    }

    /// Waits until `predicate` holds for the ordered record list.
    pub async fn wait_until(&self, mut predicate: impl FnMut(&[Download]) -> bool) {
        let mut changes = self.inner.registry.subscribe();
        loop {
            if predicate(&self.inner.registry.records()) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits until every download is `Complete` or `Failed`.
    pub async fn wait_until_settled(&self) {
        self.wait_until(|records| records.iter().all(|r| r.state.is_settled()))
            .await;
    }

    /// Stops every transfer, publishes the final state, and flushes persistence.
    ///
    /// Records keep their state, so a later start picks up where this left off.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown().await;
        let publisher = self
            .inner
            .publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(publisher) = publisher {
            publisher.shutdown().await;
        }
        self.inner.persist.flush().await;
        info!("engine stopped");
    }
}

/// Adjusts a persisted record to what is actually on disk.
///
/// `Paused`, `Complete`, and `Failed` keep their state; a `Complete` record
/// whose artifact is missing or short goes back to `Queued`. Everything else
/// is queued again.
fn rehydrate(record: &mut Download, on_disk: u64) {
    record.bytes_per_second = 0;
    record.bytes_downloaded = if record.bytes_total > 0 {
        on_disk.min(record.bytes_total)
    } else {
        on_disk
    };
    match record.state {
        DownloadState::Paused | DownloadState::Failed => {}
        DownloadState::Complete => {
            if on_disk == 0 || (record.bytes_total > 0 && on_disk < record.bytes_total) {
                record.state = DownloadState::Queued;
            }
        }
        DownloadState::Queued
        | DownloadState::Probing
        | DownloadState::Downloading
        | DownloadState::Retrying => record.state = DownloadState::Queued,
    }
}

async fn artifact_len(path: &Path) -> u64 {
    fs::metadata(path).await.map(|meta| meta.len()).unwrap_or(0)
}

fn staging_path(parent: &Path, destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map_or_else(|| "download".into(), |n| n.to_string_lossy().into_owned());
    let nonce: u32 = rand::random();
    parent.join(format!(".{name}.{nonce:08x}.saving"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(state: DownloadState, total: u64) -> Download {
        let mut record = Download::new("http://x/a", "a");
        record.state = state;
        record.bytes_total = total;
        record
    }

    #[test]
    fn test_rehydrate_requeues_active_states() {
        for state in [
            DownloadState::Queued,
            DownloadState::Probing,
            DownloadState::Downloading,
            DownloadState::Retrying,
        ] {
            let mut r = record(state, 1000);
            rehydrate(&mut r, 400);
            assert_eq!(r.state, DownloadState::Queued);
            assert_eq!(r.bytes_downloaded, 400);
        }
    }

    #[test]
    fn test_rehydrate_keeps_paused_and_failed() {
        let mut paused = record(DownloadState::Paused, 1000);
        rehydrate(&mut paused, 400);
        assert_eq!(paused.state, DownloadState::Paused);
        assert_eq!(paused.bytes_downloaded, 400);

        let mut failed = record(DownloadState::Failed, 0);
        rehydrate(&mut failed, 0);
        assert_eq!(failed.state, DownloadState::Failed);
    }

    #[test]
    fn test_rehydrate_complete_with_missing_artifact_is_requeued() {
        let mut missing = record(DownloadState::Complete, 1000);
        rehydrate(&mut missing, 0);
        assert_eq!(missing.state, DownloadState::Queued);

        let mut short = record(DownloadState::Complete, 1000);
        rehydrate(&mut short, 10);
        assert_eq!(short.state, DownloadState::Queued);

        let mut intact = record(DownloadState::Complete, 1000);
        rehydrate(&mut intact, 1000);
        assert_eq!(intact.state, DownloadState::Complete);
        assert_eq!(intact.bytes_downloaded, 1000);
    }

    #[test]
    fn test_rehydrate_clamps_to_known_total() {
        let mut r = record(DownloadState::Downloading, 100);
        rehydrate(&mut r, 150);
        assert_eq!(r.bytes_downloaded, 100);
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let staging = staging_path(Path::new("/out"), Path::new("/out/file.bin"));
        assert_eq!(staging.parent(), Some(Path::new("/out")));
        let name = staging.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".file.bin."));
        assert!(name.ends_with(".saving"));
    }
}
