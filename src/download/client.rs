//! HTTP client wrapper for probing and ranged downloads.
//!
//! This module provides the `HttpClient` struct which issues the HEAD probe
//! and the (optionally ranged) GET for a transfer attempt. Streaming the body
//! to disk is the transfer unit's job; the client only hands back responses.

use std::time::Duration;

use reqwest::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE,
};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, PROBE_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::filename::{parse_content_disposition, sanitize_filename};
use crate::user_agent;

/// What the probe learned about a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Total size in bytes, when the server reported one.
    pub content_length: Option<u64>,
    /// Whether the server advertised byte-range support.
    pub accept_ranges: bool,
    /// Sanitized filename from `Content-Disposition`, if any.
    pub filename: Option<String>,
}

/// HTTP client for probing and streaming downloads.
///
/// This client is designed to be created once and shared by every transfer,
/// taking advantage of connection pooling.
///
/// # Example
///
/// ```no_run
/// use dlmanager_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let info = client.probe("https://example.com/file.iso").await?;
/// println!("size: {:?}, resumable: {}", info.content_length, info.accept_ranges);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    probe_timeout: Duration,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 60 seconds between body reads
    /// - Probe timeout: 30 seconds for the whole HEAD request
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
            Duration::from_secs(PROBE_TIMEOUT_SECS),
        )
        .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the TLS backend cannot be initialised.
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(user_agent::default_download_user_agent())
            .build()?;
        Ok(Self {
            client,
            probe_timeout,
        })
    }

    /// Probes a URL for its size, filename, and range support.
    ///
    /// Sends HEAD first. Servers that reject HEAD (405, 501) are asked for
    /// the first byte with a ranged GET instead; a `206` answer there implies
    /// range support and its `Content-Range` carries the total.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on network failure, timeout, or a non-2xx status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        let response = self
            .client
            .head(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            debug!(status = status.as_u16(), "HEAD rejected, probing with ranged GET");
            return self.probe_with_ranged_get(url).await;
        }
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let headers = response.headers();
        let info = ProbeInfo {
            content_length: header_u64(headers, CONTENT_LENGTH.as_str()),
            accept_ranges: accepts_byte_ranges(headers),
            filename: disposition_filename(headers),
        };
        debug!(?info, "probe complete");
        Ok(info)
    }

    async fn probe_with_ranged_get(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let headers = response.headers();
        let info = if status == StatusCode::PARTIAL_CONTENT {
            ProbeInfo {
                content_length: content_range(headers).and_then(|range| range.total),
                accept_ranges: true,
                filename: disposition_filename(headers),
            }
        } else {
            ProbeInfo {
                content_length: header_u64(headers, CONTENT_LENGTH.as_str()),
                accept_ranges: accepts_byte_ranges(headers),
                filename: disposition_filename(headers),
            }
        };
        debug!(?info, "ranged probe complete");
        Ok(info)
    }

    /// Opens a GET, asking for `bytes={offset}-` when `offset > 0`.
    ///
    /// Both success statuses and `416 Range Not Satisfiable` are handed back;
    /// the caller decides what a 416 means for its artifact.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on network failure, timeout, or any other
    /// non-2xx status.
    #[instrument(skip(self), fields(url = %url, offset))]
    pub async fn get_from(&self, url: &str, offset: u64) -> Result<Response, DownloadError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::RANGE_NOT_SATISFIABLE {
            Ok(response)
        } else {
            Err(DownloadError::http_status(url, status.as_u16()))
        }
    }
}

/// Validates a URL the engine is asked to download.
///
/// Only absolute `http`/`https` URLs with a host are accepted.
///
/// # Errors
///
/// Returns `DownloadError::InvalidUrl` with the reason for rejection.
pub fn parse_download_url(raw: &str) -> Result<Url, DownloadError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::invalid_url(raw, "empty URL"));
    }
    let url = Url::parse(trimmed).map_err(|e| DownloadError::invalid_url(raw, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DownloadError::invalid_url(
                raw,
                format!("unsupported scheme '{other}'"),
            ));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(DownloadError::invalid_url(raw, "missing host"));
    }
    Ok(url)
}

/// Parsed `Content-Range: bytes start-end/total` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset in this response.
    pub start: u64,
    /// Full resource length, `None` when the server sent `*`.
    pub total: Option<u64>,
}

/// Parses the `Content-Range` header of a 206 response.
#[must_use]
pub fn content_range(headers: &HeaderMap) -> Option<ContentRange> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?.trim();
    let unit_rest = value.strip_prefix("bytes")?.trim_start();
    let (range, total) = unit_rest.split_once('/')?;
    let (start, _end) = range.trim().split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        other => Some(other.parse().ok()?),
    };
    Some(ContentRange { start, total })
}

/// Returns the `Content-Length` header value.
#[must_use]
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_u64(headers, CONTENT_LENGTH.as_str())
}

/// Returns the sanitized `Content-Disposition` filename, if any.
#[must_use]
pub fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_disposition)
        .map(|name| sanitize_filename(&name))
}

fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
        })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
