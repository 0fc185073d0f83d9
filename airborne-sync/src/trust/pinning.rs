// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Certificate Pinning
//!
//! Pins are SHA-256 fingerprints of DER-encoded certificates. They are
//! written either as `sha256:<hex>` or `sha256/<base64>`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::digest;
use rustls::pki_types::CertificateDer;

use super::TrustError;

/// A pinned certificate fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PinnedCertificate {
    /// SHA-256 fingerprint of the DER-encoded certificate.
    pub sha256_fingerprint: [u8; 32],
}

impl PinnedCertificate {
    /// Creates a new pinned certificate from a known SHA-256 fingerprint.
    pub fn new(sha256_fingerprint: [u8; 32]) -> Self {
        PinnedCertificate { sha256_fingerprint }
    }

    /// Computes SHA-256 hash of DER-encoded certificate bytes and creates
    /// a pinned certificate from the result.
    pub fn from_der(cert_der: &[u8]) -> Self {
        let hash = digest::digest(&digest::SHA256, cert_der);
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(hash.as_ref());
        PinnedCertificate {
            sha256_fingerprint: fingerprint,
        }
    }

    /// Parses `sha256:<hex>` or `sha256/<base64>`.
    pub fn parse(pin: &str) -> Result<Self, TrustError> {
        let pin = pin.trim();
        let bytes = if let Some(hex_part) = pin.strip_prefix("sha256:") {
            hex::decode(hex_part).map_err(|e| TrustError::InvalidPin(format!("{pin}: {e}")))?
        } else if let Some(b64_part) = pin.strip_prefix("sha256/") {
            STANDARD
                .decode(b64_part)
                .map_err(|e| TrustError::InvalidPin(format!("{pin}: {e}")))?
        } else {
            return Err(TrustError::InvalidPin(format!(
                "{pin}: expected 'sha256:' or 'sha256/' prefix"
            )));
        };

        let fingerprint: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TrustError::InvalidPin(format!("{pin}: fingerprint must be 32 bytes")))?;
        Ok(Self::new(fingerprint))
    }

    /// `sha256:<hex>` form, as used in logs.
    pub fn to_hex_string(&self) -> String {
        format!("sha256:{}", hex::encode(self.sha256_fingerprint))
    }
}

/// True if any certificate of the presented chain matches a pin.
pub fn chain_matches<'a, I>(chain: &[CertificateDer<'_>], pins: I) -> bool
where
    I: IntoIterator<Item = &'a PinnedCertificate> + Clone,
{
    chain.iter().any(|cert| {
        let cert_pin = PinnedCertificate::from_der(cert.as_ref());
        pins.clone().into_iter().any(|pin| pin == &cert_pin)
    })
}
