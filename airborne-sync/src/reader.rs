// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asset reading
//!
//! [`AssetReader`] serves assets to the application: the committed copy in
//! internal storage when there is one, otherwise the copy bundled with the
//! application. Corrupt cached JSON is never served; it is deleted together
//! with its metadata so the next synchronization fetches it again.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::IgnoredAny;
use thiserror::Error;
use tracing::{debug, warn};

use crate::fetch::FetchOrchestrator;
use crate::store::{AssetMetadataStore, StoreError};
use crate::telemetry::{emit, TelemetryEvent, TelemetryLevel, TelemetrySink, TracingTelemetry};
use crate::workspace::{resolve_asset_path, AssetPathError, StorageRoot};

/// Errors when reading assets.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Neither internal storage nor the bundle has the asset.
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Invalid asset name: {0}")]
    InvalidName(#[from] AssetPathError),

    #[error("Asset is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Metadata error: {0}")]
    Store(#[from] StoreError),
}

/// Read-only content packaged with the application.
pub trait BundledSource: Send + Sync {
    fn open(&self, name: &str) -> Result<Vec<u8>, ReadError>;
}

/// Bundle backed by a directory.
#[derive(Debug, Clone)]
pub struct DirectoryBundle {
    dir: PathBuf,
}

impl DirectoryBundle {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BundledSource for DirectoryBundle {
    fn open(&self, name: &str) -> Result<Vec<u8>, ReadError> {
        let path = resolve_asset_path(&self.dir, name)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ReadError::NotFound(name.to_string()),
            _ => ReadError::Io(e),
        })
    }
}

/// Bundle held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBundle {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.into(), content.into());
        self
    }
}

impl BundledSource for MemoryBundle {
    fn open(&self, name: &str) -> Result<Vec<u8>, ReadError> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| ReadError::NotFound(name.to_string()))
    }
}

/// Serves assets from internal storage with a bundled fallback.
pub struct AssetReader {
    root: Arc<dyn StorageRoot>,
    store: Arc<AssetMetadataStore>,
    bundle: Arc<dyn BundledSource>,
    telemetry: Arc<dyn TelemetrySink>,
    use_bundled_assets: bool,
}

impl AssetReader {
    pub fn new(
        root: Arc<dyn StorageRoot>,
        store: Arc<AssetMetadataStore>,
        bundle: Arc<dyn BundledSource>,
    ) -> Self {
        Self {
            root,
            store,
            bundle,
            telemetry: Arc::new(TracingTelemetry),
            use_bundled_assets: false,
        }
    }

    /// Reader over the same storage and metadata as `orchestrator`.
    pub fn for_orchestrator(
        orchestrator: &FetchOrchestrator,
        bundle: Arc<dyn BundledSource>,
    ) -> Self {
        Self::new(orchestrator.root().clone(), orchestrator.store().clone(), bundle)
            .with_bundled_assets(orchestrator.config().use_bundled_assets)
    }

    /// Skip internal storage and always read the bundle.
    pub fn with_bundled_assets(mut self, enabled: bool) -> Self {
        self.use_bundled_assets = enabled;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, ReadError> {
        if !self.use_bundled_assets {
            if let Some(bytes) = self.read_internal(name)? {
                return Ok(bytes);
            }
        }
        debug!(asset = name, "reading bundled asset");
        self.bundle.open(name)
    }

    pub fn read_to_string(&self, name: &str) -> Result<String, ReadError> {
        String::from_utf8(self.read(name)?).map_err(|_| ReadError::Encoding(name.to_string()))
    }

    /// Removes the committed copy, then its metadata. Returns whether a file
    /// was removed.
    pub fn delete(&self, name: &str) -> Result<bool, ReadError> {
        let path = self.root.asset_path(name)?;
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.store.reset(name)?;
        Ok(removed)
    }

    fn read_internal(&self, name: &str) -> Result<Option<Vec<u8>>, ReadError> {
        let path = self.root.asset_path(name)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if is_json(name) {
            if let Err(e) = serde_json::from_slice::<IgnoredAny>(&bytes) {
                warn!(asset = name, "cached JSON is corrupt, deleting: {}", e);
                emit(
                    self.telemetry.as_ref(),
                    TelemetryEvent::new(
                        "ota",
                        "file_provider",
                        TelemetryLevel::Warning,
                        "corrupt_cached_json",
                        name,
                    )
                    .with_exception(&e),
                );
                self.delete(name)?;
                return Ok(None);
            }
        }

        Ok(Some(bytes))
    }
}

fn is_json(name: &str) -> bool {
    name.rsplit('.')
        .next()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        && name.contains('.')
}
