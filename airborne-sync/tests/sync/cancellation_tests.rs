// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for tagged cancellation and in-flight exclusion

use std::sync::{Arc, Mutex};

use airborne_sync::{
    AssetMetadataStore, CallState, CancelOutcome, DirectoryRoot, FetchOrchestrator,
    MemoryKeyValueStore, SyncConfig, SyncError, SyncOutcome, SyncRequest, TelemetryError,
    TelemetryEvent, TelemetryLevel, TelemetrySink,
};
use tempfile::TempDir;

use super::fixtures::{Harness, MockTransport, Reply, URL};

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl TelemetrySink for RecordingSink {
    fn track(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_cancel_unknown_tag_is_not_found() {
    let h = Harness::new();
    assert_eq!(h.orchestrator.cancel("nobody"), CancelOutcome::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_executing_request() {
    let h = Harness::new();
    h.transport.push(Reply::Hang);

    let task = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .synchronize_with(SyncRequest::new("config.json", URL).with_tag("boot"))
                .await
        })
    };

    h.wait_for_state("boot", CallState::Executing).await;
    assert_eq!(h.orchestrator.cancel("boot"), CancelOutcome::Cancelled);
    assert_eq!(h.orchestrator.cancel("boot"), CancelOutcome::NotFound);

    let result = task.await.unwrap();
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(!h.asset_path("config.json").exists());
    assert!(!h.store.snapshot("config.json").unwrap().unwrap().has_content());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_queued_request() {
    let h = Harness::with_config(|c| c.with_max_concurrent_requests(1));
    h.transport.push(Reply::Hang);

    let blocker = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .synchronize_with(SyncRequest::new("slow.js", URL).with_tag("slow"))
                .await
        })
    };
    h.wait_for_state("slow", CallState::Executing).await;

    let queued = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .synchronize_with(SyncRequest::new("config.json", URL).with_tag("queued"))
                .await
        })
    };
    h.wait_for_state("queued", CallState::Queued).await;

    assert_eq!(h.orchestrator.cancel("queued"), CancelOutcome::Cancelled);
    assert!(matches!(queued.await.unwrap(), Err(SyncError::Cancelled)));

    // Only the blocker ever reached the transport
    assert_eq!(h.transport.requests().len(), 1);

    assert_eq!(h.orchestrator.cancel("slow"), CancelOutcome::Cancelled);
    assert!(matches!(blocker.await.unwrap(), Err(SyncError::Cancelled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_sync_of_same_asset_is_in_progress() {
    let h = Harness::new();
    h.transport.push(Reply::Hang);

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .synchronize_with(SyncRequest::new("config.json", URL).with_tag("first"))
                .await
        })
    };
    h.wait_for_state("first", CallState::Executing).await;

    let err = h.orchestrator.synchronize("config.json", URL).await.unwrap_err();
    assert!(matches!(err, SyncError::InProgress(id) if id == "config.json"));

    h.orchestrator.cancel("first");
    assert!(first.await.unwrap().is_err());

    // Released once the first call is gone
    h.transport.push(Reply::ok(b"{}"));
    assert!(h.orchestrator.synchronize("config.json", URL).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_tag_rejected() {
    let h = Harness::new();
    h.transport.push(Reply::Hang);

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .synchronize_with(SyncRequest::new("a.json", URL).with_tag("shared"))
                .await
        })
    };
    h.wait_for_state("shared", CallState::Executing).await;

    let err = h
        .orchestrator
        .synchronize_with(SyncRequest::new("b.json", URL).with_tag("shared"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidAsset(_)));

    h.orchestrator.cancel("shared");
    assert!(first.await.unwrap().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_race_reports_exactly_one_outcome() {
    let h = Harness::new();

    for round in 0..100 {
        let asset = format!("race-{round}.json");
        let tag = format!("tag-{round}");
        h.transport.push(Reply::ok(b"{}"));

        let task = {
            let orchestrator = h.orchestrator.clone();
            let request = SyncRequest::new(asset.clone(), URL).with_tag(tag.clone());
            tokio::spawn(async move { orchestrator.synchronize_with(request).await })
        };
        if round % 2 == 0 {
            tokio::task::yield_now().await;
        }

        let outcome = h.orchestrator.cancel(&tag);
        let result = task.await.unwrap();

        match outcome {
            CancelOutcome::Cancelled => {
                assert!(matches!(result, Err(SyncError::Cancelled)), "round {round}");
                assert!(!h.asset_path(&asset).exists(), "round {round}");
            }
            CancelOutcome::NotFound => {
                assert!(
                    matches!(result, Ok(SyncOutcome::Committed { .. })),
                    "round {round}: {result:?}"
                );
            }
            CancelOutcome::CancelError => panic!("registry poisoned"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_outcomes_are_tracked() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Arc::new(
        FetchOrchestrator::new(
            SyncConfig::new(temp.path()),
            Arc::new(DirectoryRoot::new(temp.path().join("assets")).unwrap()),
            Arc::new(AssetMetadataStore::new(Arc::new(MemoryKeyValueStore::new()))),
            transport.clone(),
        )
        .with_telemetry(sink.clone()),
    );

    transport.push(Reply::Hang);
    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .synchronize_with(SyncRequest::new("config.json", URL).with_tag("boot"))
                .await
        })
    };
    for _ in 0..500 {
        if orchestrator.request_state("boot") == Some(CallState::Executing) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    assert_eq!(orchestrator.cancel("boot"), CancelOutcome::Cancelled);
    assert!(matches!(task.await.unwrap(), Err(SyncError::Cancelled)));
    assert_eq!(orchestrator.cancel("boot"), CancelOutcome::NotFound);

    let events = sink.events.lock().unwrap();
    let cancels: Vec<&TelemetryEvent> =
        events.iter().filter(|e| e.label == "cancel_api").collect();
    assert_eq!(cancels.len(), 2);
    assert!(cancels.iter().all(|e| e.level == TelemetryLevel::Info));
    assert!(cancels[0].message.contains("cancelled request boot"));
    assert!(cancels[1].message.contains("no outstanding request tagged boot"));
}
