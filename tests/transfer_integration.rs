//! Integration tests for single transfer attempts.
//!
//! These tests call `run_attempt` directly with a bare registry and check
//! how the artifact on disk and the record react to each server behavior.

use std::path::Path;

use dlmanager_core::download::{
    AttemptOutcome, Download, DownloadError, DownloadState, FailurePhase, HttpClient, Inserted,
    Lease, Registry, run_attempt,
};
use tempfile::TempDir;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::payload;
use support::socket_guard::start_mock_server_or_skip;

fn lease_for(registry: &Registry, url: &str) -> Lease {
    match registry.insert(Download::new(url, "")) {
        Inserted::New(lease) => lease,
        other => panic!("{url} not registered: {other:?}"),
    }
}

async fn mount_head(server: &MockServer, len: usize, ranges: bool) {
    let mut template = ResponseTemplate::new(200).set_body_bytes(vec![0u8; len]);
    if ranges {
        template = template.insert_header("accept-ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .respond_with(template)
        .mount(server)
        .await;
}

fn artifact_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_fresh_download_streams_whole_body() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(5000);
    mount_head(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", "attachment; filename=\"report.pdf\"")
                .set_body_bytes(body.clone()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let registry = Registry::new(dir.path(), None);
    let url = format!("{}/download?id=7", server.uri());
    let lease = lease_for(&registry, &url);

    let outcome = run_attempt(&HttpClient::new(), &registry, &lease).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Complete);
    assert_eq!(std::fs::read(lease.temp_path()).unwrap(), body);

    let record = registry.get(&url).unwrap();
    assert_eq!(record.state, DownloadState::Complete);
    assert_eq!(record.bytes_total, 5000);
    assert_eq!(record.bytes_downloaded, 5000);
    assert!(record.resumable);
    assert_eq!(record.filename_guess_from_head, "report.pdf");
}

#[tokio::test]
async fn test_partial_artifact_is_resumed_with_range() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(1000);
    mount_head(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=400-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 400-999/1000")
                .set_body_bytes(body[400..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let registry = Registry::new(dir.path(), None);
    let url = format!("{}/file.bin", server.uri());
    let lease = lease_for(&registry, &url);
    std::fs::write(lease.temp_path(), &body[..400]).unwrap();

    let outcome = run_attempt(&HttpClient::new(), &registry, &lease).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Complete);
    assert_eq!(std::fs::read(lease.temp_path()).unwrap(), body);
}

#[tokio::test]
async fn test_complete_artifact_is_not_downloaded_again() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(800);
    mount_head(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=800-"))
        .respond_with(ResponseTemplate::new(416).insert_header("content-range", "bytes */800"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let registry = Registry::new(dir.path(), None);
    let url = format!("{}/done.bin", server.uri());
    let lease = lease_for(&registry, &url);
    std::fs::write(lease.temp_path(), &body).unwrap();

    let outcome = run_attempt(&HttpClient::new(), &registry, &lease).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Complete);
    assert_eq!(registry.get(&url).unwrap().bytes_downloaded, 800);
    assert_eq!(std::fs::read(lease.temp_path()).unwrap(), body);
}

#[tokio::test]
async fn test_server_ignoring_range_restarts_from_zero() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(1000);
    mount_head(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let registry = Registry::new(dir.path(), None);
    let url = format!("{}/norange.bin", server.uri());
    let lease = lease_for(&registry, &url);
    std::fs::write(lease.temp_path(), vec![0xAAu8; 400]).unwrap();

    let outcome = run_attempt(&HttpClient::new(), &registry, &lease).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Complete);
    assert_eq!(std::fs::read(lease.temp_path()).unwrap(), body);
}

#[tokio::test]
async fn test_range_start_mismatch_truncates_artifact() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(1000);
    mount_head(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=400-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-999/1000")
                .set_body_bytes(body.clone()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let registry = Registry::new(dir.path(), None);
    let url = format!("{}/mismatch.bin", server.uri());
    let lease = lease_for(&registry, &url);
    std::fs::write(lease.temp_path(), &body[..400]).unwrap();

    let failure = run_attempt(&HttpClient::new(), &registry, &lease)
        .await
        .unwrap_err();
    assert_eq!(failure.phase, FailurePhase::Transfer);
    assert!(
        matches!(
            failure.error,
            DownloadError::RangeMismatch {
                expected: 400,
                actual: 0,
                ..
            }
        ),
        "{failure:?}"
    );
    assert_eq!(artifact_len(lease.temp_path()), 0);
    assert_eq!(registry.get(&url).unwrap().bytes_downloaded, 0);
}

#[tokio::test]
async fn test_short_body_is_incomplete_and_keeps_received_bytes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = payload(1000);
    mount_head(&server, body.len(), true).await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=400-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 400-999/1000")
                .set_body_bytes(body[400..500].to_vec()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let registry = Registry::new(dir.path(), None);
    let url = format!("{}/short.bin", server.uri());
    let lease = lease_for(&registry, &url);
    std::fs::write(lease.temp_path(), &body[..400]).unwrap();

    let failure = run_attempt(&HttpClient::new(), &registry, &lease)
        .await
        .unwrap_err();
    assert!(
        matches!(
            failure.error,
            DownloadError::Incomplete {
                expected: 1000,
                actual: 500,
                ..
            }
        ),
        "{failure:?}"
    );
    assert_eq!(artifact_len(lease.temp_path()), 500);
    let record = registry.get(&url).unwrap();
    assert_eq!(record.bytes_downloaded, 500);
    assert_eq!(record.bytes_total, 1000);
}

#[tokio::test]
async fn test_probe_failure_is_tagged_probe() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let registry = Registry::new(dir.path(), None);
    let url = format!("{}/down.bin", server.uri());
    let lease = lease_for(&registry, &url);

    let failure = run_attempt(&HttpClient::new(), &registry, &lease)
        .await
        .unwrap_err();
    assert_eq!(failure.phase, FailurePhase::Probe);
    assert!(matches!(
        failure.error,
        DownloadError::HttpStatus { status: 503, .. }
    ));
    assert_eq!(registry.get(&url).unwrap().state, DownloadState::Probing);
}

#[tokio::test]
async fn test_revoked_lease_does_nothing() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(dir.path(), None);
    let url = "http://127.0.0.1:9/never.bin";
    let lease = lease_for(&registry, url);
    registry.pause(url).unwrap();

    let outcome = run_attempt(&HttpClient::new(), &registry, &lease).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Cancelled);
    assert_eq!(registry.get(url).unwrap().state, DownloadState::Paused);
    assert!(!lease.temp_path().exists());
}
