// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Store error types.

use thiserror::Error;

use crate::commit::CommitError;

/// Metadata store and key-value backend errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The persisted record collection could not be parsed. Never repaired
    /// automatically; see [`AssetMetadataStore::clear_all`](super::AssetMetadataStore::clear_all).
    #[error("Corrupt store at {key}: {reason}")]
    CorruptStore { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Commit error: {0}")]
    Commit(#[from] CommitError),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A previous writer panicked while holding the store lock.
    #[error("Store lock poisoned")]
    Poisoned,
}
