// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asset integrity using SHA-256 checksums
//!
//! Checksums are written as `sha256:<hex>`. The same format is stored in the
//! asset metadata (`content_hash_on_disk`) and accepted as the caller-supplied
//! expected hash of a download.

use ring::digest::{Context, SHA256};
use thiserror::Error;

const PREFIX: &str = "sha256:";

/// Verify SHA-256 checksum of content
///
/// # Arguments
/// * `data` - The content bytes to verify
/// * `expected` - Expected checksum in format "sha256:hexstring"
///
/// # Example
/// ```
/// use airborne_sync::integrity::{compute_checksum, verify_checksum};
///
/// let data = b"hello world";
/// let checksum = compute_checksum(data);
/// assert!(verify_checksum(data, &checksum).is_ok());
/// ```
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), IntegrityError> {
    let mut hasher = ChecksumHasher::new();
    hasher.update(data);
    hasher.verify(expected).map(|_| ())
}

/// Compute SHA-256 checksum of content in the "sha256:hexstring" format.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = ChecksumHasher::new();
    hasher.update(data);
    hasher.finish()
}

/// True if `checksum` is a well-formed `sha256:<64 hex digits>` string.
pub fn is_well_formed(checksum: &str) -> bool {
    checksum
        .strip_prefix(PREFIX)
        .is_some_and(|hex_part| hex_part.len() == 64 && hex::decode(hex_part).is_ok())
}

/// Incremental checksum over a streamed body.
pub struct ChecksumHasher {
    context: Context,
    len: u64,
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self {
            context: Context::new(&SHA256),
            len: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.context.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consumes the hasher and returns the checksum string.
    pub fn finish(self) -> String {
        format!("{}{}", PREFIX, hex::encode(self.context.finish().as_ref()))
    }

    /// Consumes the hasher, compares against `expected` and returns the
    /// computed checksum on match.
    pub fn verify(self, expected: &str) -> Result<String, IntegrityError> {
        let expected_hex = expected
            .strip_prefix(PREFIX)
            .ok_or(IntegrityError::InvalidFormat)?;

        let actual = self.finish();
        let actual_hex = &actual[PREFIX.len()..];

        if actual_hex.eq_ignore_ascii_case(expected_hex) {
            Ok(actual)
        } else {
            Err(IntegrityError::ChecksumMismatch {
                expected: expected_hex.to_string(),
                actual: actual_hex.to_string(),
            })
        }
    }
}

impl Default for ChecksumHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during integrity verification
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Checksum format is invalid (missing "sha256:" prefix)
    #[error("Invalid checksum format, expected 'sha256:...'")]
    InvalidFormat,

    /// Computed checksum doesn't match expected checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected checksum (hex string without prefix)
        expected: String,
        /// Actual computed checksum (hex string without prefix)
        actual: String,
    },
}
