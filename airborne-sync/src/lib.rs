// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Airborne Sync
//!
//! Secure asset synchronization core for over-the-air update clients.
//! Assets are fetched over certificate-pinned TLS, verified with SHA-256
//! and committed to disk atomically. Hashing uses the audited `ring` crate.

pub mod commit;
pub mod config;
pub mod fetch;
pub mod integrity;
pub mod reader;
pub mod store;
pub mod telemetry;
pub mod trust;
pub mod workspace;

pub use commit::{AtomicFileCommitter, CommitError, PendingWrite, TEMP_SUFFIX};
pub use config::{EffectiveConfig, RequestOptions, SyncConfig};
pub use fetch::{
    CacheDecision, CallState, CancelOutcome, FetchOrchestrator, FetchRequest, FetchResponse,
    HttpTransport, RecoveryReport, ReqwestTransport, ResponseSource, SyncError, SyncOutcome,
    SyncRequest, TransportError,
};
pub use integrity::{compute_checksum, verify_checksum, IntegrityError};
pub use reader::{AssetReader, BundledSource, DirectoryBundle, MemoryBundle, ReadError};
#[cfg(feature = "sqlite")]
pub use store::SqliteKeyValueStore;
pub use store::{
    AssetMetadataStore, AssetRecord, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore,
    StoreError,
};
pub use telemetry::{
    NoopTelemetry, TelemetryError, TelemetryEvent, TelemetryLevel, TelemetrySink,
    TracingTelemetry,
};
pub use trust::{
    tls_client_config, BuildMode, PinnedCertificate, PinnedTrustEvaluator, PinningVerifier,
    PlatformTrust, TrustConfig, TrustError, TrustEvaluator, Trusted, WebPkiPlatform,
};
pub use workspace::{AssetPathError, DirectoryRoot, StorageRoot};
