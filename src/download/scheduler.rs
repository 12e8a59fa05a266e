//! Supervised retry loop per download.
//!
//! The scheduler spawns one supervising task per leased entry. The task owns
//! the partial artifact for its whole life, runs transfer attempts back to
//! back, and sleeps out a cancellable backoff between failures. There is no
//! attempt limit: only a permanent error or a revoked lease ends the loop.
//!
//! An optional semaphore bounds how many attempts run at once. Waiting
//! entries stay `Queued`/`Retrying` until a permit frees up.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::registry::{Lease, Registry};
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use super::transfer::{AttemptOutcome, discard_artifact, run_attempt};

/// Spawns and tracks supervising tasks.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Debug)]
struct SchedulerInner {
    registry: Arc<Registry>,
    client: HttpClient,
    policy: RetryPolicy,
    permits: Option<Arc<Semaphore>>,
    tasks: TaskTracker,
}

impl Scheduler {
    /// Creates a scheduler; `max_active = None` runs every download at once.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        client: HttpClient,
        policy: RetryPolicy,
        max_active: Option<usize>,
    ) -> Self {
        let permits = max_active.map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        debug!(
            max_active = ?max_active,
            base_delay_ms = policy.base_delay().as_millis(),
            max_delay_ms = policy.max_delay().as_millis(),
            "creating scheduler"
        );
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                client,
                policy,
                permits,
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Starts the supervising task for `lease`.
    pub fn start(&self, lease: Lease) {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(async move {
            supervise(&inner, lease).await;
        });
    }

    /// Cancels every task and waits for them to let go of their artifacts.
    ///
    /// Records keep their current state so they can be rehydrated later.
    pub async fn shutdown(&self) {
        self.inner.registry.cancel_all();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        debug!("scheduler stopped");
    }
}

#[instrument(skip(inner, lease), fields(url = %lease.url()))]
async fn supervise(inner: &SchedulerInner, lease: Lease) {
    let token = lease.token();
    let artifact_lock = lease.artifact_lock();
    let _artifact = tokio::select! {
        biased;
        () = token.cancelled() => return,
        guard = artifact_lock.lock() => guard,
    };

    if lease.restart() {
        if let Err(error) = discard_artifact(lease.temp_path()).await {
            warn!(error = %error, "failed to discard partial artifact before restart");
        }
    }

    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() || !inner.registry.is_current(&lease) {
            break;
        }

        let permit = match &inner.permits {
            Some(semaphore) => tokio::select! {
                biased;
                () = token.cancelled() => break,
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        attempt = attempt.saturating_add(1);
        let result = run_attempt(&inner.client, &inner.registry, &lease).await;
        drop(permit);

        let failure = match result {
            Ok(AttemptOutcome::Complete) => {
                debug!(attempt, "supervisor finished");
                break;
            }
            Ok(AttemptOutcome::Cancelled) => {
                debug!(attempt, "supervisor cancelled");
                break;
            }
            Err(failure) => failure,
        };

        match inner
            .policy
            .should_retry(classify_error(&failure.error), attempt)
        {
            RetryDecision::Retry { delay, .. } => {
                let Some(counter) = inner.registry.record_retry(&lease, &failure.to_string())
                else {
                    break;
                };
                warn!(
                    phase = %failure.phase,
                    attempt_counter = counter,
                    delay_ms = delay.as_millis(),
                    error = %failure.error,
                    "transfer attempt failed; retrying"
                );
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                info!(%reason, error = %failure.error, "giving up on download");
                inner.registry.fail(&lease, &failure.to_string());
                break;
            }
        }
    }
}
