//! Retry logic with capped exponential backoff for failed transfers.
//!
//! Downloads keep retrying until they finish, so the policy has no attempt
//! limit. The only failure that stops the loop is one that can never succeed
//! (a malformed URL); everything the network or the disk throws at a transfer
//! is retried after a backoff delay.
//!
//! # Example
//!
//! ```
//! use dlmanager_core::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/file.bin", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {reason}");
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (30 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default maximum jitter added to delays.
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Classification of transfer failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Covers every network, HTTP status, and IO failure.
    Transient,

    /// Failure that won't succeed regardless of retries (malformed URL).
    Permanent,
}

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the transfer after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (the first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the transfer.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately: 1s, 2s, 4s, 8s, 16s, 30s, 30s, ...
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f64,

    /// Upper bound of the random jitter added to each delay.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom base and cap, default multiplier and jitter.
    ///
    /// A `max_delay` below `base_delay` is raised to `base_delay`.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            ..Self::default()
        }
    }

    /// Returns a copy of this policy without random jitter.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Determines whether to retry a failed transfer.
    ///
    /// `attempt` is the 1-indexed number of the attempt that just failed.
    #[instrument(level = "debug", skip(self))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        let delay = self.delay_for(attempt);
        debug!(
            attempt,
            next_attempt = attempt.saturating_add(1),
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt.saturating_add(1),
        }
    }

    /// Calculates the backoff delay after the given failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.max(1) - 1);
        let delay_ms = base_ms * self.backoff_multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | `InvalidUrl` | Permanent |
/// | `HttpStatus` (any code) | Transient |
/// | `Network`, `Timeout` | Transient |
/// | `Io` | Transient |
/// | `RangeMismatch`, `Incomplete` | Transient |
///
/// Every HTTP status is transient, 4xx included.
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::InvalidUrl { .. } => FailureType::Permanent,
        DownloadError::Network { .. }
        | DownloadError::Timeout { .. }
        | DownloadError::HttpStatus { .. }
        | DownloadError::Io { .. }
        | DownloadError::RangeMismatch { .. }
        | DownloadError::Incomplete { .. } => FailureType::Transient,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn policy_ms(base: u64, max: u64) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(base), Duration::from_millis(max)).without_jitter()
    }

    #[test]
    fn test_delay_doubles_each_attempt() {
        let policy = policy_ms(100, 10_000);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy_ms(100, 500);
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_attempt_zero_treated_as_first() {
        let policy = policy_ms(100, 500);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(100));
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(100) + DEFAULT_MAX_JITTER);
        }
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let policy = policy_ms(300, 100);
        assert_eq!(policy.max_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_should_retry_transient_has_no_attempt_limit() {
        let policy = policy_ms(1, 1);
        let decision = policy.should_retry(FailureType::Transient, 10_000);
        assert!(matches!(
            decision,
            RetryDecision::Retry { attempt: 10_001, .. }
        ));
    }

    #[test]
    fn test_should_retry_permanent_stops() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_classify_invalid_url_is_permanent() {
        let error = DownloadError::invalid_url("ftp:/x", "unsupported scheme");
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }

    #[test]
    fn test_classify_http_statuses_are_transient() {
        for status in [400, 403, 404, 410, 429, 500, 503] {
            let error = DownloadError::http_status("https://example.com/a", status);
            assert_eq!(
                classify_error(&error),
                FailureType::Transient,
                "status {status} should be retried"
            );
        }
    }

    #[test]
    fn test_classify_io_and_incomplete_are_transient() {
        let io = DownloadError::io(
            "/tmp/x.part",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(classify_error(&io), FailureType::Transient);

        let short = DownloadError::incomplete("https://example.com/a", 10, 4);
        assert_eq!(classify_error(&short), FailureType::Transient);
    }
}
