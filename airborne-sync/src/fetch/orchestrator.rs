// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asset synchronization
//!
//! [`FetchOrchestrator`] ties the metadata store, the transport and the
//! atomic committer together. Mutation is always the last step: the file is
//! committed and the record updated only after the response was classified,
//! the body fully received and its checksum verified, and only if the call
//! was not cancelled in the meantime.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::decision::{classify, CacheDecision};
use super::dispatcher::{Call, CallState, CancelOutcome, DispatchError, Dispatcher};
use super::transport::{FetchRequest, FetchResponse, HttpTransport, ReqwestTransport, TransportError};
use crate::commit::{AtomicFileCommitter, CommitError, PendingWrite};
use crate::config::{EffectiveConfig, RequestOptions, SyncConfig};
use crate::integrity::{self, ChecksumHasher, IntegrityError};
use crate::store::{AssetMetadataStore, AssetRecord, FileKeyValueStore, StoreError};
use crate::telemetry::{emit, TelemetryEvent, TelemetryLevel, TelemetrySink, TracingTelemetry};
use crate::trust::TrustEvaluator;
use crate::workspace::{DirectoryRoot, StorageRoot};

/// One synchronization call with its optional extras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub asset_id: String,
    pub url: String,
    /// Cancellation tag. A random one is assigned when absent.
    pub tag: Option<String>,
    /// `sha256:<hex>` the downloaded bytes must hash to.
    pub expected_hash: Option<String>,
    pub options: RequestOptions,
}

impl SyncRequest {
    pub fn new(asset_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            url: url.into(),
            tag: None,
            expected_hash: None,
            options: RequestOptions::default(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// Successful synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The local copy was used without a round-trip.
    Hit,
    /// The server confirmed the local copy; only `last_checked` moved.
    ConditionalHit,
    /// New content was committed.
    Committed { content_hash: String },
}

/// Synchronization failures. None of them mutate the asset record.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network, I/O or timeout failure. Safe to retry.
    #[error("Transient failure: {0}")]
    TransientFailure(String),

    #[error("TLS trust failure: {0}")]
    TlsTrustFailure(String),

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// The metadata backend could not be parsed.
    #[error("Asset metadata is corrupt: {0}")]
    CorruptStore(String),

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Synchronization of '{0}' is already in progress")]
    InProgress(String),

    #[error("Invalid asset request: {0}")]
    InvalidAsset(String),
}

impl SyncError {
    /// True when retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientFailure(_) | SyncError::InProgress(_))
    }

    fn label(&self) -> &'static str {
        match self {
            SyncError::TransientFailure(_) => "transient_failure",
            SyncError::TlsTrustFailure(_) => "tls_trust_failure",
            SyncError::IntegrityMismatch { .. } => "integrity_mismatch",
            SyncError::CorruptStore(_) => "corrupt_store",
            SyncError::NotFound(_) => "not_found",
            SyncError::Cancelled => "cancelled",
            SyncError::InProgress(_) => "in_progress",
            SyncError::InvalidAsset(_) => "invalid_asset",
        }
    }

    fn telemetry_level(&self) -> TelemetryLevel {
        match self {
            SyncError::TlsTrustFailure(_)
            | SyncError::IntegrityMismatch { .. }
            | SyncError::CorruptStore(_) => TelemetryLevel::Error,
            SyncError::Cancelled | SyncError::InProgress(_) => TelemetryLevel::Info,
            _ => TelemetryLevel::Warning,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CorruptStore { .. } => SyncError::CorruptStore(err.to_string()),
            other => SyncError::TransientFailure(other.to_string()),
        }
    }
}

impl From<CommitError> for SyncError {
    fn from(err: CommitError) -> Self {
        SyncError::TransientFailure(err.to_string())
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        SyncError::TransientFailure(err.to_string())
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Trust(reason) => SyncError::TlsTrustFailure(reason),
            other => SyncError::TransientFailure(other.to_string()),
        }
    }
}

impl From<DispatchError> for SyncError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Cancelled => SyncError::Cancelled,
            DispatchError::DuplicateTag(_) => SyncError::InvalidAsset(err.to_string()),
            DispatchError::Poisoned => SyncError::TransientFailure(err.to_string()),
        }
    }
}

impl From<IntegrityError> for SyncError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::ChecksumMismatch { expected, actual } => {
                SyncError::IntegrityMismatch { expected, actual }
            }
            IntegrityError::InvalidFormat => SyncError::InvalidAsset(err.to_string()),
        }
    }
}

/// Startup recovery summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Temporary files left by interrupted commits.
    pub purged_temp_files: usize,
    /// Records dropped because the file on disk did not back them.
    pub dropped_records: usize,
    /// Committed files removed because no record vouched for them.
    pub removed_files: usize,
}

/// Synchronizes remote assets into internal storage.
pub struct FetchOrchestrator {
    config: SyncConfig,
    root: Arc<dyn StorageRoot>,
    store: Arc<AssetMetadataStore>,
    transport: Arc<dyn HttpTransport>,
    telemetry: Arc<dyn TelemetrySink>,
    committer: AtomicFileCommitter,
    dispatcher: Dispatcher,
    in_flight: Mutex<HashSet<String>>,
}

impl FetchOrchestrator {
    pub fn new(
        config: SyncConfig,
        root: Arc<dyn StorageRoot>,
        store: Arc<AssetMetadataStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.max_concurrent_requests);
        Self {
            config,
            root,
            store,
            transport,
            telemetry: Arc::new(TracingTelemetry),
            committer: AtomicFileCommitter::new(),
            dispatcher,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Production wiring below `config.storage_path`: content in `assets/`,
    /// metadata in `metadata/`, pinned TLS through `evaluator`.
    pub fn open(config: SyncConfig, evaluator: Arc<dyn TrustEvaluator>) -> Result<Self, SyncError> {
        let root = DirectoryRoot::new(config.storage_path.join("assets"))?;
        let backend = FileKeyValueStore::new(config.storage_path.join("metadata"))?;
        let transport = ReqwestTransport::new(&config, evaluator)?;

        Ok(Self::new(
            config,
            Arc::new(root),
            Arc::new(AssetMetadataStore::new(Arc::new(backend))),
            Arc::new(transport),
        ))
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AssetMetadataStore> {
        &self.store
    }

    pub fn root(&self) -> &Arc<dyn StorageRoot> {
        &self.root
    }

    /// Brings `asset_id` up to date with `url`.
    pub async fn synchronize(&self, asset_id: &str, url: &str) -> Result<SyncOutcome, SyncError> {
        self.synchronize_with(SyncRequest::new(asset_id, url)).await
    }

    pub async fn synchronize_with(&self, request: SyncRequest) -> Result<SyncOutcome, SyncError> {
        let result = self.run(&request).await;

        match &result {
            Ok(SyncOutcome::Committed { content_hash }) => {
                info!(asset = %request.asset_id, hash = %content_hash, "asset committed");
                emit(
                    self.telemetry.as_ref(),
                    TelemetryEvent::new(
                        "ota",
                        "sync",
                        TelemetryLevel::Info,
                        "asset_committed",
                        request.asset_id.as_str(),
                    ),
                );
            }
            Ok(outcome) => debug!(asset = %request.asset_id, ?outcome, "asset up to date"),
            Err(e) => {
                warn!(asset = %request.asset_id, "synchronization failed: {}", e);
                emit(
                    self.telemetry.as_ref(),
                    TelemetryEvent::new(
                        "ota",
                        "sync",
                        e.telemetry_level(),
                        e.label(),
                        request.asset_id.as_str(),
                    )
                    .with_exception(e),
                );
            }
        }

        result
    }

    /// Aborts the call tagged `tag`, queued or executing.
    ///
    /// A call that was already failing when the cancel landed reports
    /// [`SyncError::Cancelled`] to its caller as well.
    pub fn cancel(&self, tag: &str) -> CancelOutcome {
        let outcome = self.dispatcher.cancel(tag);
        let (level, message) = match outcome {
            CancelOutcome::Cancelled => (TelemetryLevel::Info, format!("cancelled request {tag}")),
            CancelOutcome::NotFound => (
                TelemetryLevel::Info,
                format!("no outstanding request tagged {tag}"),
            ),
            CancelOutcome::CancelError => {
                (TelemetryLevel::Error, format!("cannot cancel request {tag}"))
            }
        };
        emit(
            self.telemetry.as_ref(),
            TelemetryEvent::new("ota", "network", level, "cancel_api", message),
        );
        outcome
    }

    /// State of the call tagged `tag`, if it is outstanding.
    pub fn request_state(&self, tag: &str) -> Option<CallState> {
        self.dispatcher.state(tag)
    }

    /// Forgets `asset_id`: removes its committed file, then its record.
    /// Idempotent. A crash in between leaves a record without a file, which
    /// [`recover`](Self::recover) drops.
    pub fn invalidate(&self, asset_id: &str) -> Result<(), SyncError> {
        let path = self.asset_path(asset_id)?;
        remove_if_exists(&path)?;
        self.store.reset(asset_id)?;
        debug!(asset = asset_id, "asset invalidated");
        Ok(())
    }

    /// Startup recovery: purges interrupted commits in content and metadata
    /// storage, reconciles every record with the file on disk and removes
    /// files no record knows about.
    ///
    /// Run it before the first synchronization. The internal directory is
    /// assumed to hold nothing but committed assets.
    pub fn recover(&self) -> Result<RecoveryReport, SyncError> {
        let mut report = RecoveryReport {
            purged_temp_files: self.committer.purge_stale(self.root.internal_dir())?
                + self.store.purge_interrupted_writes()?,
            ..RecoveryReport::default()
        };

        for asset_id in self.store.ids()? {
            let Some(record) = self.store.snapshot(&asset_id)? else {
                continue;
            };
            let Ok(path) = self.root.asset_path(&asset_id) else {
                self.store.reset(&asset_id)?;
                report.dropped_records += 1;
                continue;
            };

            let backed = match fs::read(&path) {
                Ok(bytes) => {
                    record.has_content()
                        && integrity::verify_checksum(&bytes, &record.content_hash_on_disk).is_ok()
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => !record.has_content(),
                Err(e) => return Err(e.into()),
            };
            if backed {
                continue;
            }

            warn!(asset = %asset_id, "record does not match disk, dropping");
            self.store.reset(&asset_id)?;
            report.dropped_records += 1;
            if remove_if_exists(&path)? {
                report.removed_files += 1;
            }
        }

        let mut files = Vec::new();
        committed_files(self.root.internal_dir(), "", &mut files)?;
        for (asset_id, path) in files {
            if self.store.snapshot(&asset_id)?.is_none() {
                warn!(asset = %asset_id, "file has no record, removing");
                if remove_if_exists(&path)? {
                    report.removed_files += 1;
                }
            }
        }

        if report != RecoveryReport::default() {
            info!(
                purged = report.purged_temp_files,
                dropped = report.dropped_records,
                removed = report.removed_files,
                "storage recovered"
            );
        }
        Ok(report)
    }

    async fn run(&self, request: &SyncRequest) -> Result<SyncOutcome, SyncError> {
        let url = self.parse_url(&request.url)?;
        let target = self.asset_path(&request.asset_id)?;
        if let Some(expected) = &request.expected_hash {
            if !integrity::is_well_formed(expected) {
                return Err(SyncError::InvalidAsset(format!(
                    "expected hash must be sha256:<hex>, got '{expected}'"
                )));
            }
        }

        let _in_flight = InFlight::claim(&self.in_flight, &request.asset_id)?;
        let effective = self.config.effective(&request.options);
        let record = self.store.get_or_create(&request.asset_id)?;
        let local_copy = record.has_content() && target.is_file();

        if local_copy && is_fresh(&record, &effective) {
            debug!(asset = %request.asset_id, "within freshness window, skipping network");
            return Ok(SyncOutcome::Hit);
        }

        let mut fetch = FetchRequest::new(url);
        if local_copy {
            if record.has_validators() {
                fetch.if_none_match = record.etag.clone();
                fetch.if_modified_since = record.last_modified.clone();
            } else {
                fetch.if_modified_since = http_date(record.last_checked);
            }
        }

        let tag = request
            .tag
            .clone()
            .unwrap_or_else(|| format!("sync-{}", Uuid::new_v4().simple()));
        let mut call = self.dispatcher.register(&tag)?;

        let settle = match self
            .exchange(&mut call, request, &target, record, local_copy, fetch, &effective)
            .await
        {
            Ok(settle) => settle,
            Err(e) => return Err(call.fail(e)),
        };

        match settle {
            Settle::Hit => {
                call.complete(|| ())?;
                Ok(SyncOutcome::Hit)
            }
            Settle::Revalidated(next) => {
                call.complete(|| self.store.put(&request.asset_id, next))??;
                Ok(SyncOutcome::ConditionalHit)
            }
            Settle::Downloaded(download, next) => {
                let content_hash = next.content_hash_on_disk.clone();
                call.complete(|| self.commit(&request.asset_id, download, next))??;
                Ok(SyncOutcome::Committed { content_hash })
            }
        }
    }

    /// Network part of a call: admission, request, classification and body
    /// download. Nothing is mutated here.
    #[allow(clippy::too_many_arguments)]
    async fn exchange(
        &self,
        call: &mut Call<'_>,
        request: &SyncRequest,
        target: &Path,
        record: AssetRecord,
        local_copy: bool,
        fetch: FetchRequest,
        effective: &EffectiveConfig,
    ) -> Result<Settle, SyncError> {
        let sent_validators = fetch.sends_validators();
        call.admit().await?;

        let mut response = call.guard(self.transport.get(fetch, effective)).await??;
        let decision = match classify(response.source, response.status, sent_validators) {
            Some(CacheDecision::Hit) if !local_copy => CacheDecision::Miss,
            Some(decision) => decision,
            None if response.status == 404 => {
                return Err(SyncError::NotFound(request.asset_id.clone()))
            }
            None => {
                return Err(SyncError::TransientFailure(format!(
                    "unexpected HTTP status {}",
                    response.status
                )))
            }
        };

        match decision {
            CacheDecision::Hit => Ok(Settle::Hit),
            CacheDecision::ConditionalHit => Ok(Settle::Revalidated(AssetRecord {
                last_checked: next_checked(record.last_checked),
                etag: response.etag.take().or(record.etag.clone()),
                last_modified: response.last_modified.take().or(record.last_modified.clone()),
                ..record
            })),
            CacheDecision::Miss => {
                let download = Download::start(&self.committer, target)?;
                let mut download = call
                    .guard(download.receive(&mut response, effective.max_content_size))
                    .await??;
                let content_hash = download.verify(request.expected_hash.as_deref())?;

                let next = AssetRecord {
                    last_checked: next_checked(record.last_checked),
                    archive_hash_on_disk: if download.is_archive() {
                        content_hash.clone()
                    } else {
                        String::new()
                    },
                    content_hash_on_disk: content_hash,
                    etag: response.etag.take(),
                    last_modified: response.last_modified.take(),
                };
                Ok(Settle::Downloaded(download, next))
            }
        }
    }

    /// File first, then metadata. If the record cannot be written the new
    /// file is removed again so no file outlives its record.
    fn commit(&self, asset_id: &str, download: Download, next: AssetRecord) -> Result<(), SyncError> {
        let target = download.pending.target_path().to_path_buf();
        download.pending.commit()?;

        if let Err(e) = self.store.put(asset_id, next) {
            warn!(asset = asset_id, "metadata update failed after commit: {}", e);
            if let Err(remove_err) = remove_if_exists(&target) {
                warn!(asset = asset_id, "cannot remove unrecorded file: {}", remove_err);
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn parse_url(&self, raw: &str) -> Result<Url, SyncError> {
        let url = Url::parse(raw).map_err(|e| SyncError::InvalidAsset(format!("{raw}: {e}")))?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if self.config.allow_plain_http => Ok(url),
            scheme => Err(SyncError::InvalidAsset(format!(
                "{raw}: scheme '{scheme}' not allowed"
            ))),
        }
    }

    fn asset_path(&self, asset_id: &str) -> Result<PathBuf, SyncError> {
        self.root
            .asset_path(asset_id)
            .map_err(|e| SyncError::InvalidAsset(e.to_string()))
    }
}

/// What is left to do, under the registry lock, once the network part of a
/// call has finished.
enum Settle {
    Hit,
    Revalidated(AssetRecord),
    Downloaded(Download, AssetRecord),
}

/// An in-progress body download.
struct Download {
    pending: PendingWrite,
    hasher: ChecksumHasher,
    magic: Vec<u8>,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

impl Download {
    fn start(committer: &AtomicFileCommitter, target: &Path) -> Result<Self, SyncError> {
        Ok(Self {
            pending: committer.begin(target)?,
            hasher: ChecksumHasher::new(),
            magic: Vec::with_capacity(ZIP_MAGIC.len()),
        })
    }

    async fn receive(
        mut self,
        response: &mut FetchResponse,
        max_content_size: u64,
    ) -> Result<Self, SyncError> {
        while let Some(chunk) = response.body.next().await {
            let chunk = chunk?;
            let size = self.hasher.len() + chunk.len() as u64;
            if size > max_content_size {
                return Err(SyncError::TransientFailure(format!(
                    "content too large: more than {max_content_size} bytes"
                )));
            }

            let missing = ZIP_MAGIC.len().saturating_sub(self.magic.len());
            self.magic.extend_from_slice(&chunk[..missing.min(chunk.len())]);
            self.hasher.update(&chunk);
            self.pending.write(&chunk)?;
        }
        Ok(self)
    }

    /// Checks the expected hash, if any, and returns the content hash.
    fn verify(&mut self, expected: Option<&str>) -> Result<String, SyncError> {
        let hasher = std::mem::take(&mut self.hasher);
        match expected {
            Some(expected) => Ok(hasher.verify(expected)?),
            None => Ok(hasher.finish()),
        }
    }

    fn is_archive(&self) -> bool {
        self.magic.starts_with(ZIP_MAGIC) || self.magic.starts_with(GZIP_MAGIC)
    }
}

/// Marks an asset id as being synchronized until dropped.
struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    asset_id: String,
}

impl<'a> InFlight<'a> {
    fn claim(ids: &'a Mutex<HashSet<String>>, asset_id: &str) -> Result<Self, SyncError> {
        let mut guard = ids
            .lock()
            .map_err(|_| SyncError::TransientFailure("in-flight registry poisoned".into()))?;
        if !guard.insert(asset_id.to_string()) {
            return Err(SyncError::InProgress(asset_id.to_string()));
        }
        Ok(Self {
            ids,
            asset_id: asset_id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.ids.lock() {
            guard.remove(&self.asset_id);
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Next `last_checked` value, strictly greater than `previous`.
fn next_checked(previous: u64) -> u64 {
    now_millis().max(previous.saturating_add(1))
}

/// `If-Modified-Since` value for a local copy last confirmed at `millis`.
fn http_date(millis: u64) -> Option<String> {
    let at = DateTime::<Utc>::from_timestamp_millis(i64::try_from(millis).ok()?)?;
    Some(at.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

fn is_fresh(record: &AssetRecord, config: &EffectiveConfig) -> bool {
    if config.freshness_window.is_zero() || record.last_checked == 0 {
        return false;
    }
    let age = now_millis().saturating_sub(record.last_checked);
    u128::from(age) < config.freshness_window.as_millis()
}

/// Collects every committed file below `dir` with the asset id it maps to.
fn committed_files(dir: &Path, prefix: &str, out: &mut Vec<(String, PathBuf)>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let asset_id = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        if entry.file_type()?.is_dir() {
            committed_files(&path, &asset_id, out)?;
        } else if !crate::commit::is_temp_file(&path) {
            out.push((asset_id, path));
        }
    }
    Ok(())
}

/// Returns whether a file was removed.
fn remove_if_exists(path: &Path) -> Result<bool, SyncError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
