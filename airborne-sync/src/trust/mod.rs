// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Certificate-pinned TLS trust
//!
//! - [`TrustEvaluator`]: the capability the transport delegates to
//! - [`PinnedTrustEvaluator`]: platform validation plus a pin allowlist
//! - [`PinningVerifier`] / [`tls_client_config`]: rustls integration

mod evaluator;
mod pinning;
mod verifier;

pub use evaluator::{
    BuildMode, PinnedTrustEvaluator, PlatformTrust, TrustConfig, TrustEvaluator, Trusted,
    WebPkiPlatform,
};
pub use pinning::{chain_matches, PinnedCertificate};
pub use verifier::{tls_client_config, PinningVerifier};

use std::sync::Arc;
use thiserror::Error;

/// Trust evaluation failures.
#[derive(Debug, Clone, Error)]
pub enum TrustError {
    /// Platform validation rejected the chain.
    #[error("Untrusted certificate chain: {0}")]
    UntrustedChain(String),

    /// The chain is platform-trusted but no certificate matches a pin.
    #[error("SSL pinning failed")]
    PinningFailed,

    #[error("Invalid pin: {0}")]
    InvalidPin(String),

    #[error("TLS configuration error: {0}")]
    Config(String),
}

impl TrustError {
    /// Converts into the rustls error reported from the handshake.
    pub fn into_rustls(self) -> rustls::Error {
        rustls::Error::InvalidCertificate(rustls::CertificateError::Other(rustls::OtherError(
            Arc::new(self),
        )))
    }
}
