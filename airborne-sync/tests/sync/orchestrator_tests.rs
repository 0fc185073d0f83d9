// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for FetchOrchestrator::synchronize

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use airborne_sync::{
    compute_checksum, AssetMetadataStore, AssetRecord, FetchOrchestrator, KeyValueStore,
    MemoryKeyValueStore, RequestOptions, SyncError, SyncOutcome, SyncRequest, TelemetryError,
    TelemetryEvent, TelemetrySink,
};

use super::fixtures::{Harness, Reply, URL};

#[tokio::test]
async fn test_config_json_download_then_revalidate() {
    let h = Harness::new();
    h.transport.push(Reply::ok_with_etag(b"{\"v\":1}", "\"v1\""));

    let outcome = h.orchestrator.synchronize("config.json", URL).await.unwrap();
    let expected_hash = compute_checksum(b"{\"v\":1}");
    assert_eq!(
        outcome,
        SyncOutcome::Committed {
            content_hash: expected_hash.clone()
        }
    );
    assert_eq!(fs::read(h.asset_path("config.json")).unwrap(), b"{\"v\":1}");

    let first = h.store.snapshot("config.json").unwrap().unwrap();
    assert_eq!(first.content_hash_on_disk, expected_hash);
    assert_eq!(first.archive_hash_on_disk, "");
    assert!(first.last_checked > 0);

    // Server now answers "not modified"
    h.transport.push(Reply::status(304));
    let outcome = h.orchestrator.synchronize("config.json", URL).await.unwrap();
    assert_eq!(outcome, SyncOutcome::ConditionalHit);
    assert_eq!(fs::read(h.asset_path("config.json")).unwrap(), b"{\"v\":1}");

    let second = h.store.snapshot("config.json").unwrap().unwrap();
    assert!(second.last_checked > first.last_checked);
    assert_eq!(second.content_hash_on_disk, first.content_hash_on_disk);
    assert_eq!(second.etag.as_deref(), Some("\"v1\""));

    let requests = h.transport.requests();
    assert_eq!(requests[0].if_none_match, None);
    assert_eq!(requests[1].if_none_match.as_deref(), Some("\"v1\""));
    assert!(h.temp_files().is_empty());
}

#[tokio::test]
async fn test_config_json_revalidated_by_last_checked() {
    let h = Harness::new();
    h.transport.push(Reply::ok(b"{\"v\":1}"));

    let outcome = h.orchestrator.synchronize("config.json", URL).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Committed { .. }));
    let first = h.store.snapshot("config.json").unwrap().unwrap();
    assert!(!first.has_validators());

    // No ETag or Last-Modified from the server; the next request still
    // carries a validator built from last_checked
    h.transport.push(Reply::status(304));
    let outcome = h.orchestrator.synchronize("config.json", URL).await.unwrap();
    assert_eq!(outcome, SyncOutcome::ConditionalHit);
    assert_eq!(fs::read(h.asset_path("config.json")).unwrap(), b"{\"v\":1}");

    let second = h.store.snapshot("config.json").unwrap().unwrap();
    assert!(second.last_checked > first.last_checked);
    assert_eq!(second.content_hash_on_disk, first.content_hash_on_disk);

    let requests = h.transport.requests();
    assert!(!requests[0].sends_validators());
    assert_eq!(requests[1].if_none_match, None);
    let since = requests[1].if_modified_since.as_deref().unwrap();
    let since = chrono::DateTime::parse_from_rfc2822(since).unwrap();
    assert_eq!(since.timestamp(), (first.last_checked / 1000) as i64);
}

#[tokio::test]
async fn test_changed_content_replaces_file_and_hashes() {
    let h = Harness::new();
    h.transport.push(Reply::ok_with_etag(b"{\"v\":1}", "\"v1\""));
    h.transport.push(Reply::ok_with_etag(b"{\"v\":2}", "\"v2\""));

    h.orchestrator.synchronize("config.json", URL).await.unwrap();
    let before = h.store.snapshot("config.json").unwrap().unwrap();
    let outcome = h.orchestrator.synchronize("config.json", URL).await.unwrap();

    let after = h.store.snapshot("config.json").unwrap().unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Committed {
            content_hash: compute_checksum(b"{\"v\":2}")
        }
    );
    assert_eq!(fs::read(h.asset_path("config.json")).unwrap(), b"{\"v\":2}");
    assert_eq!(after.content_hash_on_disk, compute_checksum(b"{\"v\":2}"));
    assert_eq!(after.etag.as_deref(), Some("\"v2\""));
    assert!(after.last_checked > before.last_checked);
}

#[tokio::test]
async fn test_no_validators_without_local_file() {
    let h = Harness::new();
    h.transport.push(Reply::ok_with_etag(b"body", "\"e\""));
    h.orchestrator.synchronize("app.js", URL).await.unwrap();

    // File removed behind the store's back: the next request is unconditional
    fs::remove_file(h.asset_path("app.js")).unwrap();
    h.transport.push(Reply::ok(b"body"));
    h.orchestrator.synchronize("app.js", URL).await.unwrap();

    let requests = h.transport.requests();
    assert!(!requests[1].sends_validators());
    assert!(h.asset_path("app.js").exists());
}

#[tokio::test]
async fn test_not_modified_to_unconditional_request_is_transient() {
    let h = Harness::new();
    h.transport.push(Reply::status(304));

    let err = h.orchestrator.synchronize("config.json", URL).await.unwrap_err();
    assert!(matches!(err, SyncError::TransientFailure(_)));
    assert_eq!(
        h.store.snapshot("config.json").unwrap(),
        Some(AssetRecord::default())
    );
}

#[tokio::test]
async fn test_integrity_mismatch_preserves_prior_content() {
    let h = Harness::new();
    h.transport.push(Reply::ok(b"good"));
    h.orchestrator.synchronize("bundle.js", URL).await.unwrap();
    let before = h.store.snapshot("bundle.js").unwrap();

    h.transport.push(Reply::ok(b"tampered"));
    let request =
        SyncRequest::new("bundle.js", URL).with_expected_hash(compute_checksum(b"expected"));
    let err = h.orchestrator.synchronize_with(request).await.unwrap_err();

    assert!(matches!(err, SyncError::IntegrityMismatch { .. }));
    assert_eq!(fs::read(h.asset_path("bundle.js")).unwrap(), b"good");
    assert_eq!(h.store.snapshot("bundle.js").unwrap(), before);
    assert!(h.temp_files().is_empty());
}

#[tokio::test]
async fn test_expected_hash_accepted_when_matching() {
    let h = Harness::new();
    h.transport.push(Reply::ok(b"payload"));

    let request =
        SyncRequest::new("bundle.js", URL).with_expected_hash(compute_checksum(b"payload"));
    let outcome = h.orchestrator.synchronize_with(request).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Committed { .. }));
}

#[tokio::test]
async fn test_malformed_expected_hash_rejected_before_network() {
    let h = Harness::new();
    let request = SyncRequest::new("bundle.js", URL).with_expected_hash("md5:abc");

    let err = h.orchestrator.synchronize_with(request).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidAsset(_)));
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_tls_failure_leaves_state_untouched() {
    let h = Harness::new();
    h.transport.push(Reply::ok(b"v1"));
    h.orchestrator.synchronize("config.json", URL).await.unwrap();
    let before = h.store.snapshot("config.json").unwrap();

    h.transport.push(Reply::Trust);
    let err = h.orchestrator.synchronize("config.json", URL).await.unwrap_err();

    assert!(matches!(err, SyncError::TlsTrustFailure(_)));
    assert!(!err.is_retryable());
    assert_eq!(h.store.snapshot("config.json").unwrap(), before);
    assert_eq!(fs::read(h.asset_path("config.json")).unwrap(), b"v1");
}

#[tokio::test]
async fn test_dropped_connection_is_transient_and_cleans_up() {
    let h = Harness::new();
    h.transport.push(Reply::ok(b"old"));
    h.orchestrator.synchronize("config.json", URL).await.unwrap();
    let before = h.store.snapshot("config.json").unwrap();

    h.transport.push(Reply::Truncated {
        first: b"partial".to_vec(),
    });
    let err = h.orchestrator.synchronize("config.json", URL).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(fs::read(h.asset_path("config.json")).unwrap(), b"old");
    assert_eq!(h.store.snapshot("config.json").unwrap(), before);
    assert!(h.temp_files().is_empty());
}

#[tokio::test]
async fn test_network_error_is_transient() {
    let h = Harness::new();
    h.transport.push(Reply::Network);

    let err = h.orchestrator.synchronize("config.json", URL).await.unwrap_err();
    assert!(matches!(err, SyncError::TransientFailure(_)));
    assert!(!h.asset_path("config.json").exists());
}

#[tokio::test]
async fn test_missing_remote_asset_is_not_found() {
    let h = Harness::new();
    h.transport.push(Reply::status(404));

    let err = h.orchestrator.synchronize("gone.json", URL).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(id) if id == "gone.json"));
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let h = Harness::new();
    h.transport.push(Reply::ok(&[7u8; 64]));

    let request = SyncRequest::new("big.bin", URL)
        .with_options(RequestOptions::default().with_max_content_size(16));
    let err = h.orchestrator.synchronize_with(request).await.unwrap_err();

    assert!(matches!(err, SyncError::TransientFailure(_)));
    assert!(!h.asset_path("big.bin").exists());
    assert!(h.temp_files().is_empty());
}

#[tokio::test]
async fn test_transport_cache_hit_keeps_record() {
    let h = Harness::new();
    h.transport.push(Reply::ok(b"cached"));
    h.orchestrator.synchronize("index.js", URL).await.unwrap();
    let before = h.store.snapshot("index.js").unwrap();

    h.transport.push(Reply::from_local_cache(b"cached"));
    let outcome = h.orchestrator.synchronize("index.js", URL).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Hit);
    assert_eq!(h.store.snapshot("index.js").unwrap(), before);
}

#[tokio::test]
async fn test_transport_cache_hit_without_local_copy_commits() {
    let h = Harness::new();
    h.transport.push(Reply::from_local_cache(b"cached"));

    let outcome = h.orchestrator.synchronize("index.js", URL).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Committed { .. }));
    assert_eq!(fs::read(h.asset_path("index.js")).unwrap(), b"cached");
}

#[tokio::test]
async fn test_freshness_window_skips_network() {
    let h = Harness::with_config(|c| c.with_freshness_window(Duration::from_secs(600)));
    h.transport.push(Reply::ok(b"v1"));

    h.orchestrator.synchronize("config.json", URL).await.unwrap();
    let outcome = h.orchestrator.synchronize("config.json", URL).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Hit);
    assert_eq!(h.transport.requests().len(), 1);

    // A per-call override forces the round-trip
    h.transport.push(Reply::ok(b"v2"));
    let request = SyncRequest::new("config.json", URL)
        .with_options(RequestOptions::default().with_freshness_window(Duration::ZERO));
    h.orchestrator.synchronize_with(request).await.unwrap();
    assert_eq!(h.transport.requests().len(), 2);
}

#[tokio::test]
async fn test_archive_payload_records_container_hash() {
    let h = Harness::new();
    let zip = b"PK\x03\x04rest-of-archive";
    h.transport.push(Reply::ok(zip));

    h.orchestrator.synchronize("package.zip", URL).await.unwrap();

    let record = h.store.snapshot("package.zip").unwrap().unwrap();
    assert_eq!(record.archive_hash_on_disk, compute_checksum(zip));
    assert_eq!(record.content_hash_on_disk, record.archive_hash_on_disk);
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let h = Harness::new();

    for (asset, url) in [
        ("../escape", URL),
        ("/etc/passwd", URL),
        ("", URL),
        ("config.json", "not a url"),
        ("config.json", "http://assets.example.com/config.json"),
        ("config.json", "ftp://assets.example.com/config.json"),
    ] {
        let err = h.orchestrator.synchronize(asset, url).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidAsset(_)), "{asset} {url}");
    }
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_plain_http_allowed_when_configured() {
    let h = Harness::with_config(|c| c.with_plain_http());
    h.transport.push(Reply::ok(b"dev"));

    let outcome = h
        .orchestrator
        .synchronize("config.json", "http://localhost:8080/config.json")
        .await;
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn test_invalidate_is_idempotent() {
    let h = Harness::new();
    h.orchestrator.invalidate("never-seen.json").unwrap();

    h.transport.push(Reply::ok(b"{}"));
    h.orchestrator.synchronize("config.json", URL).await.unwrap();

    h.orchestrator.invalidate("config.json").unwrap();
    let once = (
        h.store.snapshot("config.json").unwrap(),
        h.asset_path("config.json").exists(),
    );
    h.orchestrator.invalidate("config.json").unwrap();
    let twice = (
        h.store.snapshot("config.json").unwrap(),
        h.asset_path("config.json").exists(),
    );

    assert_eq!(once, (None, false));
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_corrupt_store_is_surfaced() {
    let temp = tempfile::TempDir::new().unwrap();
    let backend = Arc::new(MemoryKeyValueStore::new());
    backend
        .write(airborne_sync::store::ASSET_METADATA_KEY, b"{broken")
        .unwrap();

    let transport = Arc::new(super::fixtures::MockTransport::default());
    let orchestrator = FetchOrchestrator::new(
        airborne_sync::SyncConfig::new(temp.path()),
        Arc::new(airborne_sync::DirectoryRoot::new(temp.path()).unwrap()),
        Arc::new(AssetMetadataStore::new(backend)),
        transport.clone(),
    );

    let err = orchestrator.synchronize("config.json", URL).await.unwrap_err();
    assert!(matches!(err, SyncError::CorruptStore(_)));
    assert!(transport.requests().is_empty());

    // Explicit recovery path
    orchestrator.store().clear_all().unwrap();
    transport.push(Reply::ok(b"{}"));
    assert!(orchestrator.synchronize("config.json", URL).await.is_ok());
}

struct BrokenSink;

impl TelemetrySink for BrokenSink {
    fn track(&self, _event: &TelemetryEvent) -> Result<(), TelemetryError> {
        Err(TelemetryError("collector offline".into()))
    }
}

#[tokio::test]
async fn test_telemetry_failure_never_fails_sync() {
    let temp = tempfile::TempDir::new().unwrap();
    let transport = Arc::new(super::fixtures::MockTransport::default());
    let orchestrator = FetchOrchestrator::new(
        airborne_sync::SyncConfig::new(temp.path()),
        Arc::new(airborne_sync::DirectoryRoot::new(temp.path()).unwrap()),
        Arc::new(AssetMetadataStore::new(Arc::new(MemoryKeyValueStore::new()))),
        transport.clone(),
    )
    .with_telemetry(Arc::new(BrokenSink));

    transport.push(Reply::ok(b"{}"));
    assert!(orchestrator.synchronize("config.json", URL).await.is_ok());

    transport.push(Reply::Network);
    let err = orchestrator.synchronize("config.json", URL).await.unwrap_err();
    assert!(matches!(err, SyncError::TransientFailure(_)));
}
