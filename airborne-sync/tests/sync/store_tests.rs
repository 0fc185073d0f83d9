// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for AssetMetadataStore over durable backends

use std::sync::Arc;

use airborne_sync::store::ASSET_METADATA_KEY;
use airborne_sync::{AssetMetadataStore, FileKeyValueStore, KeyValueStore, StoreError};
use tempfile::TempDir;

use super::fixtures::{Harness, Reply, URL};

#[test]
fn test_file_backend_survives_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let backend = Arc::new(FileKeyValueStore::new(temp.path()).unwrap());
        let store = AssetMetadataStore::new(backend);
        store.get_or_create("config.json").unwrap();
        store.get_or_create("index.js").unwrap();
        store.reset("index.js").unwrap();
    }

    let backend = Arc::new(FileKeyValueStore::new(temp.path()).unwrap());
    let store = AssetMetadataStore::new(backend);
    assert_eq!(store.ids().unwrap(), vec!["config.json".to_string()]);
}

#[test]
fn test_file_backend_leaves_no_temp_files() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(FileKeyValueStore::new(temp.path()).unwrap());
    let store = AssetMetadataStore::new(backend);

    for i in 0..5 {
        store.get_or_create(&format!("asset-{i}")).unwrap();
    }

    let names: Vec<String> = std::fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![ASSET_METADATA_KEY.to_string()]);
}

#[test]
fn test_corrupt_file_backend_is_hard_failure() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(ASSET_METADATA_KEY), b"\x00\x01garbage").unwrap();

    let backend = Arc::new(FileKeyValueStore::new(temp.path()).unwrap());
    let store = AssetMetadataStore::new(backend.clone());

    assert!(matches!(
        store.get_or_create("config.json"),
        Err(StoreError::CorruptStore { .. })
    ));
    assert_eq!(
        backend.read(ASSET_METADATA_KEY).unwrap().unwrap(),
        b"\x00\x01garbage"
    );
}

#[tokio::test]
async fn test_committed_record_persisted_as_json() {
    let h = Harness::new();
    h.transport.push(Reply::ok_with_etag(b"{\"v\":1}", "W/\"abc\""));
    h.orchestrator.synchronize("config.json", URL).await.unwrap();

    let record = h.store.snapshot("config.json").unwrap().unwrap();
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["hashInDisk"], record.content_hash_on_disk.as_str());
    assert_eq!(json["etag"], "W/\"abc\"");
    assert!(json["lastChecked"].as_u64().unwrap() > 0);
}

#[cfg(feature = "sqlite")]
#[test]
fn test_sqlite_backend_survives_reopen() {
    use airborne_sync::SqliteKeyValueStore;

    let temp = TempDir::new().unwrap();
    let db = temp.path().join("metadata.db");

    {
        let store = AssetMetadataStore::new(Arc::new(SqliteKeyValueStore::open(&db).unwrap()));
        store.get_or_create("config.json").unwrap();
    }

    let store = AssetMetadataStore::new(Arc::new(SqliteKeyValueStore::open(&db).unwrap()));
    assert!(store.snapshot("config.json").unwrap().is_some());
}
