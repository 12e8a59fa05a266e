//! Single ordered writer for persisted state.
//!
//! Registry transitions enqueue operations synchronously; one background task
//! applies them in order, so a transfer never waits on SQLite and an upsert
//! can never overtake the remove that followed it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{DownloadRepository, StoredDownload};

/// One queued persistence operation.
#[derive(Debug)]
pub enum PersistOp {
    /// Insert or replace a row.
    Upsert(StoredDownload),
    /// Delete a row by URL.
    Remove(String),
    /// Acknowledge once every earlier operation has been applied.
    Flush(oneshot::Sender<()>),
}

/// Cloneable sender side of the writer task.
#[derive(Debug, Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl PersistHandle {
    /// Queues an upsert.
    pub fn upsert(&self, row: StoredDownload) {
        self.send(PersistOp::Upsert(row));
    }

    /// Queues a removal.
    pub fn remove(&self, url: impl Into<String>) {
        self.send(PersistOp::Remove(url.into()));
    }

    /// Waits until every operation queued before this call has been applied.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(PersistOp::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    fn send(&self, op: PersistOp) {
        if self.tx.send(op).is_err() {
            debug!("state writer stopped; dropping persistence op");
        }
    }
}

/// Spawns the writer task over `repo`.
///
/// The task exits when every [`PersistHandle`] has been dropped.
#[must_use]
pub fn spawn_writer(repo: Arc<dyn DownloadRepository>) -> (PersistHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            match op {
                PersistOp::Upsert(row) => {
                    if let Err(error) = repo.upsert(&row).await {
                        warn!(url = %row.url, error = %error, "failed to persist download");
                    }
                }
                PersistOp::Remove(url) => {
                    if let Err(error) = repo.remove(&url).await {
                        warn!(url = %url, error = %error, "failed to remove persisted download");
                    }
                }
                PersistOp::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("state writer finished");
    });
    (PersistHandle { tx }, task)
}
