//! Coalescing snapshot publisher.
//!
//! A background task watches the registry's change counter and hands the full
//! ordered snapshot to a [`SnapshotSink`] at most once per tick. Nothing is
//! published until the front end signals readiness; the first push after that
//! signal (and after every repeated signal) is immediate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::model::DownloadSnapshot;
use super::registry::Registry;

/// Receiver of published snapshots.
///
/// Implementations must not block; the publisher calls them from its own task.
pub trait SnapshotSink: Send + Sync + 'static {
    /// Delivers one ordered snapshot of every download.
    fn publish(&self, snapshot: &[DownloadSnapshot]);
}

impl<F> SnapshotSink for F
where
    F: Fn(&[DownloadSnapshot]) + Send + Sync + 'static,
{
    fn publish(&self, snapshot: &[DownloadSnapshot]) {
        self(snapshot);
    }
}

/// Sink that forwards snapshots into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<DownloadSnapshot>>,
}

impl ChannelSink {
    /// Creates a sink and the receiver it feeds.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<DownloadSnapshot>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SnapshotSink for ChannelSink {
    fn publish(&self, snapshot: &[DownloadSnapshot]) {
        let _ = self.tx.send(snapshot.to_vec());
    }
}

/// Handle to the running publisher task.
#[derive(Debug)]
pub struct Publisher {
    ready: watch::Sender<u64>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Publisher {
    /// Spawns the publisher over `registry`, publishing to `sink` every `interval`.
    #[must_use]
    pub fn spawn(registry: Arc<Registry>, sink: Arc<dyn SnapshotSink>, interval: Duration) -> Self {
        let (ready, ready_rx) = watch::channel(0);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(registry, sink, interval, ready_rx, shutdown.clone()));
        Self {
            ready,
            shutdown,
            task,
        }
    }

    /// Signals that the front end can receive pushes; triggers an immediate push.
    pub fn front_end_ready(&self) {
        self.ready.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// Stops the task after a final push of any pending change.
    ///
    /// Nothing is pushed if the front end never signalled readiness.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(error) = self.task.await {
            debug!(error = %error, "publisher task ended abnormally");
        }
    }
}

async fn run(
    registry: Arc<Registry>,
    sink: Arc<dyn SnapshotSink>,
    interval: Duration,
    mut ready: watch::Receiver<u64>,
    shutdown: CancellationToken,
) {
    let mut last = None;
    if wait_until_ready(&mut ready, &shutdown).await {
        last = Some(publish(&registry, sink.as_ref()));
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.reset();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                changed = ready.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let _ = ready.borrow_and_update();
                    last = Some(publish(&registry, sink.as_ref()));
                }
                _ = ticker.tick() => {
                    if last != Some(registry.version()) {
                        last = Some(publish(&registry, sink.as_ref()));
                    }
                }
            }
        }
    }

    // A front end that signalled readiness always sees the final state.
    if *ready.borrow() > 0 && last != Some(registry.version()) {
        publish(&registry, sink.as_ref());
    }
    debug!("publisher stopped");
}

/// Waits for the first readiness signal; `false` if shut down first.
async fn wait_until_ready(ready: &mut watch::Receiver<u64>, shutdown: &CancellationToken) -> bool {
    loop {
        if *ready.borrow_and_update() > 0 {
            return true;
        }
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return false,
            changed = ready.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Publishes the current snapshot and returns the version it reflects.
fn publish(registry: &Registry, sink: &dyn SnapshotSink) -> u64 {
    let version = registry.version();
    let snapshot = registry.snapshot();
    trace!(version, downloads = snapshot.len(), "publishing snapshot");
    sink.publish(&snapshot);
    version
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::Download;

    fn registry_with(urls: &[&str]) -> Arc<Registry> {
        let registry = Arc::new(Registry::new("/tmp/dlmanager-publisher", None));
        for url in urls {
            let _ = registry.insert(Download::new(*url, ""));
        }
        registry
    }

    #[tokio::test]
    async fn test_nothing_published_before_ready() {
        let registry = registry_with(&["http://x/a"]);
        let (sink, mut rx) = ChannelSink::channel();
        let publisher = Publisher::spawn(registry, Arc::new(sink), Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        publisher.shutdown().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_first_push_after_ready_is_immediate() {
        let registry = registry_with(&["http://x/a", "http://x/b"]);
        let (sink, mut rx) = ChannelSink::channel();
        let publisher = Publisher::spawn(registry, Arc::new(sink), Duration::from_secs(3600));

        publisher.front_end_ready();
        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let urls: Vec<_> = snapshot.into_iter().map(|s| s.url).collect();
        assert_eq!(urls, vec!["http://x/a", "http://x/b"]);
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_unchanged_registry_is_not_republished() {
        let registry = registry_with(&["http://x/a"]);
        let (sink, mut rx) = ChannelSink::channel();
        let publisher = Publisher::spawn(registry, Arc::new(sink), Duration::from_millis(5));

        publisher.front_end_ready();
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "no change, no push");
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_changes_are_coalesced_into_next_tick() {
        let registry = registry_with(&[]);
        let (sink, mut rx) = ChannelSink::channel();
        let publisher = Publisher::spawn(
            Arc::clone(&registry),
            Arc::new(sink),
            Duration::from_millis(20),
        );
        publisher.front_end_ready();
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(first.is_empty());

        for i in 0..10 {
            let _ = registry.insert(Download::new(format!("http://x/{i}"), ""));
        }

        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.len(), 10);
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_closure_sink_receives_snapshots() {
        let registry = registry_with(&["http://x/a"]);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_by_sink = Arc::clone(&seen);
        let sink = move |snapshot: &[DownloadSnapshot]| {
            seen_by_sink.lock().unwrap().push(snapshot.len());
        };
        let publisher = Publisher::spawn(registry, Arc::new(sink), Duration::from_millis(5));

        publisher.front_end_ready();
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.shutdown().await;

        assert_eq!(seen.lock().unwrap().first(), Some(&1));
    }
}
