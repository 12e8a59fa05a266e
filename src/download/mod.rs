//! Resumable HTTP download engine.
//!
//! This module tracks a set of downloads keyed by URL and keeps each one
//! moving toward completion: it probes the server, resumes partial artifacts
//! with range requests, retries failures with capped exponential backoff,
//! and publishes coalesced snapshots to the front end.
//!
//! # Layout
//!
//! - [`Registry`] owns the records and hands out generation-stamped leases
//! - [`run_attempt`] performs one probe + GET + stream pass
//! - [`Scheduler`] supervises attempts and backoff per download
//! - [`Publisher`] pushes snapshots to a [`SnapshotSink`]
//! - [`DownloadEngine`] ties them together behind the command surface
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use dlmanager_core::Database;
//! use dlmanager_core::download::{DownloadEngine, EngineSettings};
//! use dlmanager_core::store::DownloadStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DownloadStore::new(Database::new(Path::new("state.db")).await?);
//! let sink = |snapshot: &[dlmanager_core::download::DownloadSnapshot]| {
//!     println!("{} downloads", snapshot.len());
//! };
//! let engine =
//!     DownloadEngine::start(EngineSettings::new("./parts"), Arc::new(store), Arc::new(sink))
//!         .await?;
//! engine.add("https://example.com/paper.pdf");
//! engine.wait_until_settled().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod filename;
mod model;
mod progress;
mod publisher;
mod registry;
mod retry;
mod scheduler;
mod transfer;

pub use client::{
    ContentRange, HttpClient, ProbeInfo, content_length, content_range, disposition_filename,
    parse_download_url,
};
pub use constants::{DEFAULT_PUBLISH_INTERVAL, FALLBACK_FILENAME};
pub use engine::{AddOutcome, DownloadEngine, EngineSettings};
pub use error::{DownloadError, EngineError, FailurePhase, TransferFailure};
pub use filename::{
    display_filename, filename_guess_from_url, parse_content_disposition, partial_artifact_name,
    sanitize_filename,
};
pub use model::{Download, DownloadSnapshot, DownloadState};
pub use progress::SpeedSampler;
pub use publisher::{ChannelSink, Publisher, SnapshotSink};
pub use registry::{Inserted, Lease, Registry};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, FailureType, RetryDecision, RetryPolicy,
    classify_error,
};
pub use scheduler::Scheduler;
pub use transfer::{AttemptOutcome, discard_artifact, run_attempt};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
