//! Authoritative set of downloads, keyed by URL.
//!
//! The registry is the only owner of [`Download`] records. Everything else
//! reads copies ([`Registry::snapshot`], [`Registry::get`]) or mutates through
//! the transition methods here.
//!
//! # Single writer per entry
//!
//! A transfer task holds a [`Lease`] stamped with the entry's generation.
//! Pause, resume, and delete bump the generation, so any update a stale task
//! sends afterwards is rejected and the task stops at its next check. The
//! partial artifact itself is guarded by a per-entry async mutex that the
//! supervising task holds for its whole lifetime.
//!
//! No `DashMap` guard is ever held across an `.await`. Persistence operations
//! are queued while the entry's guard is held, so the writer sees them in the
//! same order the entry changed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::client::ProbeInfo;
use super::error::EngineError;
use super::filename::partial_artifact_name;
use super::model::{Download, DownloadSnapshot, DownloadState};
use crate::store::{PersistHandle, StoredDownload};

/// Permission for one supervising task to drive one entry.
#[derive(Debug, Clone)]
pub struct Lease {
    url: String,
    generation: u64,
    token: CancellationToken,
    temp_path: PathBuf,
    artifact_lock: Arc<Mutex<()>>,
    restart: bool,
}

impl Lease {
    /// URL of the leased entry.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cancellation signal for pause and delete.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Path of the partial artifact.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Mutex serialising access to the partial artifact.
    #[must_use]
    pub fn artifact_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.artifact_lock)
    }

    /// Whether the artifact must be discarded before the first write.
    #[must_use]
    pub fn restart(&self) -> bool {
        self.restart
    }
}

/// Outcome of inserting a new record.
#[derive(Debug)]
pub enum Inserted {
    /// The URL was new; the lease drives it if its state is active.
    New(Lease),
    /// The URL is already tracked; nothing changed.
    AlreadyPresent,
    /// The URL is being deleted; the record is registered once the delete finishes.
    Deferred,
}

struct Entry {
    seq: u64,
    record: Download,
    temp_path: PathBuf,
    generation: u64,
    token: CancellationToken,
    artifact_lock: Arc<Mutex<()>>,
    removing: bool,
    pending_readd: Option<Download>,
}

impl Entry {
    fn lease(&self, restart: bool) -> Lease {
        Lease {
            url: self.record.url.clone(),
            generation: self.generation,
            token: self.token.clone(),
            temp_path: self.temp_path.clone(),
            artifact_lock: Arc::clone(&self.artifact_lock),
            restart,
        }
    }

    fn row(&self) -> StoredDownload {
        StoredDownload::from_download(self.seq, &self.temp_path, &self.record)
    }

    /// Invalidates the current lease and cancels its task.
    fn revoke(&mut self) {
        self.token.cancel();
        self.generation += 1;
    }
}

/// Concurrent map of downloads with change notification.
pub struct Registry {
    entries: DashMap<String, Entry>,
    next_seq: AtomicU64,
    changes: watch::Sender<u64>,
    persist: Option<PersistHandle>,
    temp_dir: PathBuf,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries.len())
            .field("temp_dir", &self.temp_dir)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Creates an empty registry storing partial artifacts under `temp_dir`.
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>, persist: Option<PersistHandle>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
            changes,
            persist,
            temp_dir: temp_dir.into(),
        }
    }

    /// Partial artifact path for `url`.
    #[must_use]
    pub fn temp_path_for(&self, url: &str) -> PathBuf {
        self.temp_dir.join(partial_artifact_name(url))
    }

    /// Subscribes to the change counter; it increments on every visible change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Current value of the change counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Registers a new record at the end of the order.
    pub fn insert(&self, record: Download) -> Inserted {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let temp_path = self.temp_path_for(&record.url);
        self.insert_at(seq, temp_path, record)
    }

    /// Re-registers a persisted record at its original position.
    pub fn restore(&self, seq: u64, temp_path: PathBuf, record: Download) -> Inserted {
        self.next_seq.fetch_max(seq.saturating_add(1), Ordering::SeqCst);
        self.insert_at(seq, temp_path, record)
    }

    fn insert_at(&self, seq: u64, temp_path: PathBuf, record: Download) -> Inserted {
        let lease = match self.entries.entry(record.url.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if !entry.removing {
                    return Inserted::AlreadyPresent;
                }
                if entry.pending_readd.is_none() {
                    debug!(url = %record.url, "re-add queued behind delete");
                    entry.pending_readd = Some(record);
                }
                return Inserted::Deferred;
            }
            MapEntry::Vacant(vacant) => {
                let entry = Entry {
                    seq,
                    record,
                    temp_path,
                    generation: 0,
                    token: CancellationToken::new(),
                    artifact_lock: Arc::new(Mutex::new(())),
                    removing: false,
                    pending_readd: None,
                };
                self.persist_row(entry.row());
                let lease = entry.lease(false);
                vacant.insert(entry);
                lease
            }
        };
        debug!(url = %lease.url, seq, "download registered");
        self.bump();
        Inserted::New(lease)
    }

    /// Returns a copy of one record.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<Download> {
        self.entries
            .get(url)
            .filter(|entry| !entry.removing)
            .map(|entry| entry.record.clone())
    }

    /// Returns the artifact lock and partial artifact path of a tracked record.
    #[must_use]
    pub fn artifact(&self, url: &str) -> Option<(Arc<Mutex<()>>, PathBuf)> {
        self.entries
            .get(url)
            .filter(|entry| !entry.removing)
            .map(|entry| (Arc::clone(&entry.artifact_lock), entry.temp_path.clone()))
    }

    /// Copies every visible record, in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<Download> {
        let mut rows: Vec<(u64, Download)> = self
            .entries
            .iter()
            .filter(|entry| !entry.removing)
            .map(|entry| (entry.seq, entry.record.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, record)| record).collect()
    }

    /// Wire snapshot of every visible record, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DownloadSnapshot> {
        self.records().iter().map(Download::to_snapshot).collect()
    }

    /// Number of visible records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.removing).count()
    }

    /// Whether no records are visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every visible record is complete or failed.
    #[must_use]
    pub fn all_settled(&self) -> bool {
        self.entries
            .iter()
            .filter(|entry| !entry.removing)
            .all(|entry| entry.record.state.is_settled())
    }

    // ----- transitions driven by the leaseholder -----

    /// Whether `lease` still owns its entry.
    #[must_use]
    pub fn is_current(&self, lease: &Lease) -> bool {
        self.entries
            .get(&lease.url)
            .is_some_and(|entry| !entry.removing && entry.generation == lease.generation)
    }

    /// Enters `Probing`.
    pub fn mark_probing(&self, lease: &Lease) -> bool {
        self.apply(lease, false, |record| {
            record.state = DownloadState::Probing;
            record.bytes_per_second = 0;
        })
        .is_some()
    }

    /// Records what the probe learned.
    pub fn apply_probe(&self, lease: &Lease, info: &ProbeInfo) -> bool {
        self.apply(lease, true, |record| {
            if let Some(total) = info.content_length {
                record.bytes_total = total;
            }
            record.resumable = info.accept_ranges;
            if let Some(name) = info.filename.as_ref().filter(|n| !n.is_empty()) {
                record.filename_guess_from_head.clone_from(name);
            }
        })
        .is_some()
    }

    /// Enters `Downloading` at `offset`, folding in what the GET response said.
    pub fn mark_downloading(
        &self,
        lease: &Lease,
        offset: u64,
        total: Option<u64>,
        filename: Option<&str>,
    ) -> bool {
        self.apply(lease, true, |record| {
            record.state = DownloadState::Downloading;
            record.bytes_downloaded = offset;
            if let Some(total) = total {
                record.bytes_total = total;
            }
            if record.filename_guess_from_head.is_empty()
                && let Some(name) = filename.filter(|n| !n.is_empty())
            {
                record.filename_guess_from_head = name.to_string();
            }
        })
        .is_some()
    }

    /// Marks the artifact as discarded; `bytes_downloaded` drops to zero.
    pub fn reset_progress(&self, lease: &Lease, resumable: bool) -> bool {
        self.apply(lease, true, |record| {
            record.bytes_downloaded = 0;
            record.resumable = resumable;
        })
        .is_some()
    }

    /// Records streamed progress. Returns `false` once the lease is stale.
    pub fn record_progress(&self, lease: &Lease, bytes_downloaded: u64, bytes_per_second: u64) -> bool {
        self.apply(lease, false, |record| {
            record.bytes_downloaded = bytes_downloaded;
            record.bytes_per_second = bytes_per_second;
        })
        .is_some()
    }

    /// Enters `Complete` with `bytes` on disk.
    pub fn mark_complete(&self, lease: &Lease, bytes: u64) -> bool {
        let done = self
            .apply(lease, true, |record| {
                record.state = DownloadState::Complete;
                record.bytes_downloaded = bytes;
                record.bytes_total = bytes;
                record.bytes_per_second = 0;
                record.last_error = None;
            })
            .is_some();
        if done {
            info!(url = %lease.url, bytes, "download complete");
        }
        done
    }

    /// Counts a failed attempt and enters `Retrying`.
    ///
    /// Returns the new attempt counter, or `None` once the lease is stale.
    pub fn record_retry(&self, lease: &Lease, reason: &str) -> Option<u32> {
        self.apply(lease, true, |record| {
            record.attempt_counter = record.attempt_counter.saturating_add(1);
            record.state = DownloadState::Retrying;
            record.bytes_per_second = 0;
            record.last_error = Some(reason.to_string());
            record.attempt_counter
        })
    }

    /// Enters the terminal `Failed` state.
    pub fn fail(&self, lease: &Lease, reason: &str) -> bool {
        self.apply(lease, true, |record| {
            record.state = DownloadState::Failed;
            record.bytes_per_second = 0;
            record.last_error = Some(reason.to_string());
        })
        .is_some()
    }

    fn apply<R>(
        &self,
        lease: &Lease,
        persist: bool,
        update: impl FnOnce(&mut Download) -> R,
    ) -> Option<R> {
        let result = {
            let mut entry = self.entries.get_mut(&lease.url)?;
            if entry.removing || entry.generation != lease.generation {
                return None;
            }
            let result = update(&mut entry.record);
            normalize(&mut entry.record);
            if persist {
                self.persist_row(entry.row());
            }
            result
        };
        self.bump();
        Some(result)
    }

    // ----- user commands -----

    /// Pauses an active entry, cancelling its task.
    ///
    /// Already paused, complete, or failed entries are left alone.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for unknown URLs.
    pub fn pause(&self, url: &str) -> Result<(), EngineError> {
        {
            let mut entry = self
                .entries
                .get_mut(url)
                .filter(|entry| !entry.removing)
                .ok_or_else(|| EngineError::not_found(url))?;
            if !entry.record.state.is_active() {
                return Ok(());
            }
            entry.revoke();
            entry.record.state = DownloadState::Paused;
            entry.record.bytes_per_second = 0;
            self.persist_row(entry.row());
        }
        info!(url = %url, "download paused");
        self.bump();
        Ok(())
    }

    /// Re-queues a paused entry and returns a lease for its new task.
    ///
    /// A non-resumable entry restarts from byte 0. Entries that are not
    /// paused yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for unknown URLs.
    pub fn resume(&self, url: &str) -> Result<Option<Lease>, EngineError> {
        let lease = {
            let mut entry = self
                .entries
                .get_mut(url)
                .filter(|entry| !entry.removing)
                .ok_or_else(|| EngineError::not_found(url))?;
            if entry.record.state != DownloadState::Paused {
                return Ok(None);
            }
            entry.generation += 1;
            entry.token = CancellationToken::new();
            let restart = !entry.record.resumable;
            if restart {
                entry.record.bytes_downloaded = 0;
            }
            entry.record.state = DownloadState::Queued;
            entry.record.bytes_per_second = 0;
            self.persist_row(entry.row());
            entry.lease(restart)
        };
        info!(url = %url, restart = lease.restart, "download resumed");
        self.bump();
        Ok(Some(lease))
    }

    /// Hides an entry and cancels its task; the caller finishes with [`Registry::finish_remove`].
    ///
    /// Returns the artifact lock and path so the caller can wait for the task
    /// to let go of the file before deleting it. Deleting an entry that is
    /// already being deleted drops any re-add queued behind it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` for unknown URLs.
    pub fn begin_remove(&self, url: &str) -> Result<(Arc<Mutex<()>>, PathBuf), EngineError> {
        let handles = {
            let mut entry = self
                .entries
                .get_mut(url)
                .ok_or_else(|| EngineError::not_found(url))?;
            if entry.removing {
                if entry.pending_readd.take().is_none() {
                    return Err(EngineError::not_found(url));
                }
            } else {
                entry.removing = true;
                entry.revoke();
            }
            (Arc::clone(&entry.artifact_lock), entry.temp_path.clone())
        };
        self.bump();
        Ok(handles)
    }

    /// Drops a hidden entry for good, or registers the re-add queued behind it.
    ///
    /// A re-added record goes to the end of the order and starts from an
    /// empty artifact. Returns its lease when the record is active.
    pub fn finish_remove(&self, url: &str) -> Option<Lease> {
        let MapEntry::Occupied(mut occupied) = self.entries.entry(url.to_string()) else {
            return None;
        };
        if !occupied.get().removing {
            return None;
        }
        if let Some(persist) = &self.persist {
            persist.remove(url);
        }
        let lease = match occupied.get_mut().pending_readd.take() {
            None => {
                occupied.remove();
                info!(url = %url, "download deleted");
                None
            }
            Some(record) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                let entry = occupied.get_mut();
                let active = record.state.is_active();
                entry.seq = seq;
                entry.record = record;
                entry.removing = false;
                entry.generation += 1;
                entry.token = CancellationToken::new();
                self.persist_row(entry.row());
                info!(url = %url, seq, "download deleted and re-added");
                let lease = active.then(|| entry.lease(true));
                drop(occupied);
                lease
            }
        };
        self.bump();
        lease
    }

    /// Records where a completed download was saved.
    pub fn set_saved_path(&self, url: &str, path: &Path) {
        {
            let Some(mut entry) = self.entries.get_mut(url).filter(|entry| !entry.removing)
            else {
                return;
            };
            entry.record.saved_path = Some(path.to_path_buf());
            self.persist_row(entry.row());
        }
        self.bump();
    }

    /// Cancels every task without changing any record.
    pub fn cancel_all(&self) {
        for entry in self.entries.iter() {
            entry.token.cancel();
        }
    }

    fn persist_row(&self, row: StoredDownload) {
        if let Some(persist) = &self.persist {
            persist.upsert(row);
        }
    }

    fn bump(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }
}

/// Keeps `bytes_downloaded <= bytes_total` whenever the total is known.
fn normalize(record: &mut Download) {
    if record.bytes_total > 0 && record.bytes_downloaded > record.bytes_total {
        record.bytes_total = record.bytes_downloaded;
    }
}
