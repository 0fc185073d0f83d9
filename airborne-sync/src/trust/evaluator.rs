// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Trust evaluation
//!
//! Platform chain validation always runs first; pins only add a stricter
//! requirement on top of it and can never rescue a chain the platform
//! rejects.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::{DistinguishedName, RootCertStore};
use tracing::{debug, warn};

use super::pinning::{chain_matches, PinnedCertificate};
use super::TrustError;

/// Build flavour of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    #[default]
    Release,
    Debug,
    Qa,
}

impl BuildMode {
    /// Debug and QA builds relax pinning and client checks.
    pub fn is_relaxed(self) -> bool {
        matches!(self, BuildMode::Debug | BuildMode::Qa)
    }
}

/// Immutable pin configuration of one evaluator.
#[derive(Debug, Clone, Default)]
pub struct TrustConfig {
    pins: HashSet<PinnedCertificate>,
    build_mode: BuildMode,
}

impl TrustConfig {
    pub fn new(pins: impl IntoIterator<Item = PinnedCertificate>) -> Self {
        Self {
            pins: pins.into_iter().collect(),
            build_mode: BuildMode::Release,
        }
    }

    /// Parses pins in `sha256:<hex>` / `sha256/<base64>` form.
    pub fn from_pin_strings<S: AsRef<str>>(pins: &[S]) -> Result<Self, TrustError> {
        let pins = pins
            .iter()
            .map(|p| PinnedCertificate::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(pins))
    }

    /// Selects the build mode. Anything but [`BuildMode::Release`] weakens
    /// protection against interception.
    pub fn with_build_mode(mut self, build_mode: BuildMode) -> Self {
        self.build_mode = build_mode;
        self
    }

    pub fn pins(&self) -> &HashSet<PinnedCertificate> {
        &self.pins
    }

    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }
}

/// Marker returned by a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trusted;

/// Decides whether a peer's certificate chain is trusted.
///
/// Chains are ordered leaf first, followed by every certificate the peer
/// presented during the handshake.
pub trait TrustEvaluator: Send + Sync + fmt::Debug {
    /// Validates a server chain for `hostname`.
    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        hostname: &ServerName<'_>,
    ) -> Result<Trusted, TrustError>;

    /// Validates a client chain (mutual TLS). Pins are not applied.
    fn check_client_trusted(&self, chain: &[CertificateDer<'_>]) -> Result<Trusted, TrustError>;

    /// Issuers advertised to peers for client authentication.
    fn accepted_issuers(&self) -> Vec<DistinguishedName>;
}

/// The platform's standard chain validation against its trust anchors.
pub trait PlatformTrust: Send + Sync + fmt::Debug {
    fn verify_server(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), TrustError>;

    fn verify_client(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), TrustError>;

    /// Subjects of every trust anchor.
    fn issuers(&self) -> Vec<DistinguishedName>;
}

/// WebPKI validation over a root store (Mozilla roots by default).
pub struct WebPkiPlatform {
    roots: Arc<RootCertStore>,
    server: Arc<WebPkiServerVerifier>,
    client: Option<Arc<dyn ClientCertVerifier>>,
}

impl WebPkiPlatform {
    /// Platform trust over the bundled Mozilla root program.
    pub fn with_webpki_roots() -> Result<Self, TrustError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::new(roots)
    }

    /// Platform trust over caller-provided anchors.
    pub fn new(roots: RootCertStore) -> Result<Self, TrustError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let roots = Arc::new(roots);

        let server = WebPkiServerVerifier::builder_with_provider(roots.clone(), provider.clone())
            .build()
            .map_err(|e| TrustError::Config(format!("server verifier error: {e}")))?;

        let client = match WebPkiClientVerifier::builder_with_provider(roots.clone(), provider)
            .build()
        {
            Ok(verifier) => Some(verifier),
            Err(e) => {
                warn!("client certificate validation unavailable: {}", e);
                None
            }
        };

        Ok(Self {
            roots,
            server,
            client,
        })
    }
}

impl fmt::Debug for WebPkiPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPkiPlatform")
            .field("anchors", &self.roots.len())
            .field("client_auth", &self.client.is_some())
            .finish()
    }
}

impl PlatformTrust for WebPkiPlatform {
    fn verify_server(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), TrustError> {
        self.server
            .verify_server_cert(end_entity, intermediates, server_name, &[], now)
            .map(|_| ())
            .map_err(|e| TrustError::UntrustedChain(e.to_string()))
    }

    fn verify_client(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), TrustError> {
        let client = self.client.as_ref().ok_or_else(|| {
            TrustError::UntrustedChain("no anchors for client authentication".into())
        })?;
        client
            .verify_client_cert(end_entity, intermediates, now)
            .map(|_| ())
            .map_err(|e| TrustError::UntrustedChain(e.to_string()))
    }

    fn issuers(&self) -> Vec<DistinguishedName> {
        self.roots.subjects()
    }
}

/// Platform validation plus an explicit pin allowlist.
#[derive(Debug)]
pub struct PinnedTrustEvaluator {
    config: TrustConfig,
    platform: Arc<dyn PlatformTrust>,
}

impl PinnedTrustEvaluator {
    pub fn new(config: TrustConfig, platform: Arc<dyn PlatformTrust>) -> Self {
        if config.build_mode().is_relaxed() {
            warn!(
                build_mode = ?config.build_mode(),
                "CERTIFICATE PINNING DISABLED: server pins and client checks are bypassed"
            );
        }
        debug!(pins = config.pins().len(), "trust evaluator ready");
        Self { config, platform }
    }

    /// Evaluator over the bundled Mozilla roots.
    pub fn with_webpki_roots(config: TrustConfig) -> Result<Self, TrustError> {
        Ok(Self::new(config, Arc::new(WebPkiPlatform::with_webpki_roots()?)))
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }
}

impl TrustEvaluator for PinnedTrustEvaluator {
    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        hostname: &ServerName<'_>,
    ) -> Result<Trusted, TrustError> {
        let (end_entity, intermediates) = chain
            .split_first()
            .ok_or_else(|| TrustError::UntrustedChain("empty certificate chain".into()))?;

        self.platform
            .verify_server(end_entity, intermediates, hostname, UnixTime::now())
            .inspect_err(|e| warn!(host = ?hostname, "platform rejected server chain: {}", e))?;

        if self.config.build_mode().is_relaxed() {
            debug!(host = ?hostname, "pinning bypassed");
            return Ok(Trusted);
        }

        let pins = self.config.pins();
        if pins.is_empty() || chain_matches(chain, pins.iter()) {
            return Ok(Trusted);
        }

        let presented: Vec<String> = chain
            .iter()
            .map(|c| PinnedCertificate::from_der(c.as_ref()).to_hex_string())
            .collect();
        warn!(host = ?hostname, ?presented, "SSL pinning failed");
        Err(TrustError::PinningFailed)
    }

    fn check_client_trusted(&self, chain: &[CertificateDer<'_>]) -> Result<Trusted, TrustError> {
        if self.config.build_mode().is_relaxed() {
            return Ok(Trusted);
        }

        let (end_entity, intermediates) = chain
            .split_first()
            .ok_or_else(|| TrustError::UntrustedChain("empty certificate chain".into()))?;
        self.platform
            .verify_client(end_entity, intermediates, UnixTime::now())?;
        Ok(Trusted)
    }

    fn accepted_issuers(&self) -> Vec<DistinguishedName> {
        if self.config.build_mode().is_relaxed() {
            Vec::new()
        } else {
            self.platform.issuers()
        }
    }
}
