// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration for asset synchronization
//!
//! [`SyncConfig`] is the immutable baseline shared by every call. Per-call
//! overrides travel in [`RequestOptions`] and are folded into an
//! [`EffectiveConfig`] by [`SyncConfig::effective`], which never touches the
//! baseline.

use std::path::PathBuf;
use std::time::Duration;

/// Baseline configuration of a [`FetchOrchestrator`](crate::FetchOrchestrator).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Internal storage root for committed assets
    pub storage_path: PathBuf,

    /// TCP + TLS connect timeout
    pub connect_timeout: Duration,

    /// Maximum wait for response headers and for each body chunk
    pub read_timeout: Duration,

    /// Optional bound on sending the request
    pub write_timeout: Option<Duration>,

    /// Maximum asset size (bytes)
    pub max_content_size: u64,

    /// Requests allowed on the network at once; the rest are queued
    pub max_concurrent_requests: usize,

    /// Skip the network entirely when the last successful check is younger
    /// than this. Zero disables the shortcut.
    pub freshness_window: Duration,

    /// Accept `http://` sources (local development servers)
    pub allow_plain_http: bool,

    /// Serve bundled assets instead of internal storage
    pub use_bundled_assets: bool,

    /// User-Agent header
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("."),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            write_timeout: None,
            max_content_size: 20 * 1024 * 1024, // 20 MB
            max_concurrent_requests: 4,
            freshness_window: Duration::ZERO,
            allow_plain_http: false,
            use_bundled_assets: false,
            user_agent: format!(
                "airborne-sync/{}",
                option_env!("CARGO_PKG_VERSION").unwrap_or("0.1.0")
            ),
        }
    }
}

impl SyncConfig {
    /// Baseline rooted at `storage_path`.
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn with_write_timeout(mut self, write: Duration) -> Self {
        self.write_timeout = Some(write);
        self
    }

    pub fn with_max_content_size(mut self, bytes: u64) -> Self {
        self.max_content_size = bytes;
        self
    }

    /// At least one request is always allowed.
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit.max(1);
        self
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Allow `http://` sources. Never enable this in production builds.
    pub fn with_plain_http(mut self) -> Self {
        self.allow_plain_http = true;
        self
    }

    /// Read bundled content only, ignoring internal storage.
    pub fn with_bundled_assets(mut self) -> Self {
        self.use_bundled_assets = true;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Folds per-call overrides onto this baseline.
    pub fn effective(&self, options: &RequestOptions) -> EffectiveConfig {
        EffectiveConfig {
            connect_timeout: options.connect_timeout.unwrap_or(self.connect_timeout),
            read_timeout: options.read_timeout.unwrap_or(self.read_timeout),
            write_timeout: options.write_timeout.or(self.write_timeout),
            max_content_size: options.max_content_size.unwrap_or(self.max_content_size),
            freshness_window: options.freshness_window.unwrap_or(self.freshness_window),
        }
    }
}

/// Per-call overrides. Unset fields inherit the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub max_content_size: Option<u64>,
    pub freshness_window: Option<Duration>,
}

impl RequestOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn with_max_content_size(mut self, bytes: u64) -> Self {
        self.max_content_size = Some(bytes);
        self
    }

    /// Forces a network round-trip when set to zero.
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = Some(window);
        self
    }
}

/// Settings in force for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Option<Duration>,
    pub max_content_size: u64,
    pub freshness_window: Duration,
}

impl EffectiveConfig {
    /// Deadline for connecting, sending the request and receiving headers.
    pub fn send_deadline(&self) -> Duration {
        self.connect_timeout + self.write_timeout.unwrap_or(Duration::ZERO) + self.read_timeout
    }
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        SyncConfig::default().effective(&RequestOptions::default())
    }
}
