// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asset Metadata Store
//!
//! Durable mapping from asset identifier to its staleness record. The whole
//! collection is persisted as one JSON document under
//! [`ASSET_METADATA_KEY`] in a [`KeyValueStore`].
//!
//! Every mutation runs under a single lock and is written to the backend
//! before it becomes visible in memory, so readers only ever observe state
//! that has been durably stored.

mod error;
mod kv;

pub use error::StoreError;
#[cfg(feature = "sqlite")]
pub use kv::SqliteKeyValueStore;
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Backend key holding the serialized record collection.
pub const ASSET_METADATA_KEY: &str = "asset_metadata.json";

/// Staleness and integrity state of one tracked asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// Epoch millis of the last successful freshness check, 0 if never.
    #[serde(default)]
    pub last_checked: u64,

    /// Checksum of the committed content, empty if nothing is committed.
    #[serde(rename = "hashInDisk", default)]
    pub content_hash_on_disk: String,

    /// Checksum of the committed container, empty if the asset is not one.
    #[serde(rename = "zipHashInDisk", default)]
    pub archive_hash_on_disk: String,

    /// Entity tag of the committed representation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// `Last-Modified` of the committed representation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl AssetRecord {
    /// True when content has been committed for this asset.
    pub fn has_content(&self) -> bool {
        !self.content_hash_on_disk.is_empty()
    }

    /// True when a conditional request can be built from this record.
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

type RecordMap = BTreeMap<String, AssetRecord>;

/// Single-writer store of [`AssetRecord`]s.
pub struct AssetMetadataStore {
    backend: Arc<dyn KeyValueStore>,
    /// `None` until the backend has been parsed successfully.
    records: Mutex<Option<RecordMap>>,
}

impl AssetMetadataStore {
    /// Creates a store over `backend`. Nothing is read until first access.
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            records: Mutex::new(None),
        }
    }

    /// Returns the record for `id`, creating and persisting a defaulted one
    /// if none exists.
    pub fn get_or_create(&self, id: &str) -> Result<AssetRecord, StoreError> {
        let mut guard = self.lock()?;
        let records = self.loaded(&mut guard)?;

        if let Some(record) = records.get(id) {
            return Ok(record.clone());
        }

        let mut next = records.clone();
        next.insert(id.to_string(), AssetRecord::default());
        self.persist(&next)?;
        *records = next;

        debug!(asset = id, "created metadata record");
        Ok(AssetRecord::default())
    }

    /// Removes the record for `id`. Succeeds when there is none.
    pub fn reset(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let records = self.loaded(&mut guard)?;

        if !records.contains_key(id) {
            return Ok(());
        }

        let mut next = records.clone();
        next.remove(id);
        self.persist(&next)?;
        *records = next;

        debug!(asset = id, "removed metadata record");
        Ok(())
    }

    /// Read-only view of the record for `id`, without creating one.
    pub fn snapshot(&self, id: &str) -> Result<Option<AssetRecord>, StoreError> {
        let mut guard = self.lock()?;
        Ok(self.loaded(&mut guard)?.get(id).cloned())
    }

    /// Identifiers of all tracked assets.
    pub fn ids(&self) -> Result<Vec<String>, StoreError> {
        let mut guard = self.lock()?;
        Ok(self.loaded(&mut guard)?.keys().cloned().collect())
    }

    /// Drops every record. This is the explicit way out of a
    /// [`StoreError::CorruptStore`], equivalent to a full cache invalidation.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let empty = RecordMap::new();
        self.persist(&empty)?;
        *guard = Some(empty);
        Ok(())
    }

    /// Removes leftovers of backend writes a crash interrupted.
    pub fn purge_interrupted_writes(&self) -> Result<usize, StoreError> {
        let _guard = self.lock()?;
        self.backend.recover()
    }

    /// Replaces the record for `id`.
    pub(crate) fn put(&self, id: &str, record: AssetRecord) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let records = self.loaded(&mut guard)?;

        let mut next = records.clone();
        next.insert(id.to_string(), record);
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<RecordMap>>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    fn loaded<'a>(
        &self,
        guard: &'a mut MutexGuard<'_, Option<RecordMap>>,
    ) -> Result<&'a mut RecordMap, StoreError> {
        if guard.is_none() {
            let records = match self.backend.read(ASSET_METADATA_KEY)? {
                None => RecordMap::new(),
                Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                    error!(key = ASSET_METADATA_KEY, "asset metadata unreadable: {}", e);
                    StoreError::CorruptStore {
                        key: ASSET_METADATA_KEY.to_string(),
                        reason: e.to_string(),
                    }
                })?,
            };
            **guard = Some(records);
        }

        Ok(guard.get_or_insert_with(RecordMap::new))
    }

    fn persist(&self, records: &RecordMap) -> Result<(), StoreError> {
        let data =
            serde_json::to_vec(records).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.backend.write(ASSET_METADATA_KEY, &data)
    }
}
