// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use super::transport::ResponseSource;

/// How a response relates to the locally cached copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Served locally without a round-trip.
    Hit,
    /// The server confirmed the cached copy with `304 Not Modified`.
    ConditionalHit,
    /// New content arrived.
    Miss,
}

/// Classifies a response. `None` means the status cannot be used to
/// update the asset (errors, or a `304` to an unconditional request).
pub fn classify(source: ResponseSource, status: u16, sent_validators: bool) -> Option<CacheDecision> {
    match (source, status) {
        (ResponseSource::LocalCache, _) => Some(CacheDecision::Hit),
        (ResponseSource::Network, 304) if sent_validators => Some(CacheDecision::ConditionalHit),
        (ResponseSource::Network, 200) => Some(CacheDecision::Miss),
        _ => None,
    }
}
