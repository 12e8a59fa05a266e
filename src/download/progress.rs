//! Throughput estimation for an active transfer.
//!
//! The sampler closes one sample per [`SPEED_SAMPLE_INTERVAL`] regardless of
//! how large the network chunks are, and reports the mean of the last
//! [`SPEED_WINDOW_SAMPLES`] samples.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::constants::{SPEED_MIN_PROVISIONAL, SPEED_SAMPLE_INTERVAL, SPEED_WINDOW_SAMPLES};

/// Trailing-window bytes-per-second estimator.
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    interval: Duration,
    window: usize,
    sample_started: Instant,
    sample_bytes: u64,
    samples: VecDeque<u64>,
    current: u64,
}

impl SpeedSampler {
    /// Starts sampling at `now` with `bytes` already on disk.
    #[must_use]
    pub fn new(now: Instant, bytes: u64) -> Self {
        Self::with_interval(now, bytes, SPEED_SAMPLE_INTERVAL, SPEED_WINDOW_SAMPLES)
    }

    /// Starts sampling with a custom sample interval and window length.
    #[must_use]
    pub fn with_interval(now: Instant, bytes: u64, interval: Duration, window: usize) -> Self {
        Self {
            interval,
            window: window.max(1),
            sample_started: now,
            sample_bytes: bytes,
            samples: VecDeque::with_capacity(window.max(1)),
            current: 0,
        }
    }

    /// Records the running byte total at `now` and returns the current estimate.
    pub fn record(&mut self, now: Instant, total_bytes: u64) -> u64 {
        let elapsed = now.saturating_duration_since(self.sample_started);
        let delta = total_bytes.saturating_sub(self.sample_bytes);

        if elapsed >= self.interval {
            if self.samples.len() == self.window {
                self.samples.pop_front();
            }
            self.samples.push_back(rate(delta, elapsed));
            self.sample_started = now;
            self.sample_bytes = total_bytes;
            self.current = mean(&self.samples);
        } else if self.samples.is_empty() && elapsed >= SPEED_MIN_PROVISIONAL {
            self.current = rate(delta, elapsed);
        }

        self.current
    }

    /// Returns the last computed estimate.
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        self.current
    }
}

fn rate(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (bytes as f64 / secs).round() as u64
}

fn mean(samples: &VecDeque<u64>) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u128 = samples.iter().map(|&s| u128::from(s)).sum();
    u64::try_from(sum / samples.len() as u128).unwrap_or(u64::MAX)
}
