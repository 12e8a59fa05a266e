//! Constants for the download module (timeouts, sampling, publishing).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout between body reads (60 seconds).
///
/// This is a per-read timeout, not a whole-request timeout, so large files
/// are not cut off while bytes keep arriving.
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Default timeout for the HEAD probe (30 seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 30;

/// Default cadence at which the publisher coalesces snapshots.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(250);

/// Cadence at which the speed sampler closes a sample.
pub const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Number of closed samples averaged into `bytes_per_second`.
pub const SPEED_WINDOW_SAMPLES: usize = 10;

/// Minimum elapsed time before a provisional speed estimate is reported.
pub const SPEED_MIN_PROVISIONAL: Duration = Duration::from_millis(250);

/// Extension of partial artifacts in the temp directory.
pub const PARTIAL_EXTENSION: &str = "part";

/// Fallback save name when neither the URL nor the probe yields one.
pub const FALLBACK_FILENAME: &str = "download.bin";
