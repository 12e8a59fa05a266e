//! One transfer attempt: probe, ranged GET, stream to the partial artifact.
//!
//! The attempt never retries on its own. It reports success, cancellation,
//! or a [`TransferFailure`] and leaves backoff to the scheduler.
//!
//! The artifact's length on disk always matches the `bytes_downloaded` the
//! registry last accepted: each chunk is written and flushed before progress
//! is reported, and cancellation is only observed between chunks.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Instant;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

use super::client::{HttpClient, content_length, content_range, disposition_filename};
use super::constants::SPEED_SAMPLE_INTERVAL;
use super::error::{DownloadError, TransferFailure};
use super::progress::SpeedSampler;
use super::registry::{Lease, Registry};

/// How an attempt ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Every byte is on disk and the entry is `Complete`.
    Complete,
    /// The lease was revoked (pause or delete) before the attempt finished.
    Cancelled,
}

/// Runs one attempt for the leased entry.
///
/// # Errors
///
/// Returns a [`TransferFailure`] tagged `Probe` when the HEAD probe or the
/// opening GET fails, and `Transfer` when the body stream or the artifact
/// write fails.
#[instrument(skip(client, registry, lease), fields(url = %lease.url()))]
pub async fn run_attempt(
    client: &HttpClient,
    registry: &Registry,
    lease: &Lease,
) -> Result<AttemptOutcome, TransferFailure> {
    let url = lease.url();
    let token = lease.token();

    if !registry.mark_probing(lease) {
        return Ok(AttemptOutcome::Cancelled);
    }

    let probe = tokio::select! {
        biased;
        () = token.cancelled() => return Ok(AttemptOutcome::Cancelled),
        result = client.probe(url) => result.map_err(TransferFailure::probe)?,
    };
    if !registry.apply_probe(lease, &probe) {
        return Ok(AttemptOutcome::Cancelled);
    }

    let path = lease.temp_path();
    let mut file = open_artifact(path).await.map_err(TransferFailure::transfer)?;
    let mut offset = file
        .metadata()
        .await
        .map_err(|e| TransferFailure::transfer(DownloadError::io(path, e)))?
        .len();
    let probed_total = probe.content_length.filter(|total| *total > 0);

    if offset > 0 && !probe.accept_ranges {
        debug!(offset, "server does not accept ranges; restarting from zero");
        offset = restart_artifact(&mut file, path, registry, lease, false).await?;
    }
    if let Some(total) = probed_total {
        if offset > total {
            warn!(offset, total, "artifact longer than resource; restarting from zero");
            offset = restart_artifact(&mut file, path, registry, lease, probe.accept_ranges).await?;
        } else if offset == total {
            registry.mark_complete(lease, offset);
            return Ok(AttemptOutcome::Complete);
        }
    }

    let response = tokio::select! {
        biased;
        () = token.cancelled() => return Ok(AttemptOutcome::Cancelled),
        result = client.get_from(url, offset) => result.map_err(TransferFailure::probe)?,
    };

    let status = response.status();
    let headers = response.headers();
    let mut total = probed_total;

    match status {
        StatusCode::RANGE_NOT_SATISFIABLE => {
            let advertised = content_range(headers).and_then(|range| range.total);
            if offset > 0 && advertised.or(probed_total) == Some(offset) {
                registry.mark_complete(lease, offset);
                return Ok(AttemptOutcome::Complete);
            }
            restart_artifact(&mut file, path, registry, lease, false).await?;
            return Err(TransferFailure::transfer(DownloadError::http_status(
                url,
                status.as_u16(),
            )));
        }
        StatusCode::PARTIAL_CONTENT => {
            if let Some(range) = content_range(headers) {
                if range.start != offset {
                    restart_artifact(&mut file, path, registry, lease, probe.accept_ranges)
                        .await?;
                    return Err(TransferFailure::transfer(DownloadError::range_mismatch(
                        url,
                        offset,
                        range.start,
                    )));
                }
                total = range.total.or(total);
            }
            if total.is_none() {
                total = content_length(headers).map(|remaining| offset + remaining);
            }
            if offset > 0 {
                info!(offset, "resuming with range request");
            }
        }
        _ => {
            if offset > 0 {
                debug!(offset, "server ignored range; restarting from zero");
                offset = restart_artifact(&mut file, path, registry, lease, false).await?;
            }
            total = content_length(headers).or(total);
        }
    }

    let filename = disposition_filename(headers);
    if !registry.mark_downloading(lease, offset, total, filename.as_deref()) {
        return Ok(AttemptOutcome::Cancelled);
    }

    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| TransferFailure::transfer(DownloadError::io(path, e)))?;

    let mut written = offset;
    let mut sampler = SpeedSampler::new(Instant::now(), written);
    let mut stream = response.bytes_stream();
    let mut sample_tick = tokio::time::interval(SPEED_SAMPLE_INTERVAL);
    sample_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sample_tick.reset();

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!(bytes = written, "transfer cancelled");
                return Ok(AttemptOutcome::Cancelled);
            }
            next = stream.next() => next,
            _ = sample_tick.tick() => {
                // A stalled body still closes samples, so the rate decays.
                let bytes_per_second = sampler.record(Instant::now(), written);
                if !registry.record_progress(lease, written, bytes_per_second) {
                    return Ok(AttemptOutcome::Cancelled);
                }
                continue;
            }
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| TransferFailure::transfer(DownloadError::network(url, e)))?;

        file.write_all(&chunk)
            .await
            .map_err(|e| TransferFailure::transfer(DownloadError::io(path, e)))?;
        file.flush()
            .await
            .map_err(|e| TransferFailure::transfer(DownloadError::io(path, e)))?;
        written += chunk.len() as u64;

        let bytes_per_second = sampler.record(Instant::now(), written);
        trace!(bytes = written, bytes_per_second, "chunk written");
        if !registry.record_progress(lease, written, bytes_per_second) {
            return Ok(AttemptOutcome::Cancelled);
        }
    }

    if let Some(expected) = total
        && written < expected
    {
        return Err(TransferFailure::transfer(DownloadError::incomplete(
            url, expected, written,
        )));
    }

    if registry.mark_complete(lease, written) {
        Ok(AttemptOutcome::Complete)
    } else {
        Ok(AttemptOutcome::Cancelled)
    }
}

/// Truncates the partial artifact at `path` to zero bytes.
///
/// # Errors
///
/// Returns `DownloadError::Io` if the file cannot be opened or truncated.
pub async fn discard_artifact(path: &Path) -> Result<(), DownloadError> {
    let file = open_artifact(path).await?;
    file.set_len(0)
        .await
        .map_err(|e| DownloadError::io(path, e))
}

async fn open_artifact(path: &Path) -> Result<File, DownloadError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))
}

async fn restart_artifact(
    file: &mut File,
    path: &Path,
    registry: &Registry,
    lease: &Lease,
    resumable: bool,
) -> Result<u64, TransferFailure> {
    file.set_len(0)
        .await
        .map_err(|e| TransferFailure::transfer(DownloadError::io(path, e)))?;
    file.seek(SeekFrom::Start(0))
        .await
        .map_err(|e| TransferFailure::transfer(DownloadError::io(path, e)))?;
    registry.reset_progress(lease, resumable);
    Ok(0)
}
