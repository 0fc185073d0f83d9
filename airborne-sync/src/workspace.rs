// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage root provider
//!
//! The synchronization core never asks the host platform where to keep its
//! files. It is handed a [`StorageRoot`] and maps asset identifiers onto
//! paths below it.

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Provides the internal storage directory that committed assets live under.
pub trait StorageRoot: Send + Sync {
    /// Directory holding committed asset content.
    fn internal_dir(&self) -> &Path;

    /// Resolves an asset identifier to its content path.
    fn asset_path(&self, asset_id: &str) -> Result<PathBuf, AssetPathError> {
        resolve_asset_path(self.internal_dir(), asset_id)
    }
}

/// A storage root backed by a plain directory.
#[derive(Debug, Clone)]
pub struct DirectoryRoot {
    dir: PathBuf,
}

impl DirectoryRoot {
    /// Creates the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl StorageRoot for DirectoryRoot {
    fn internal_dir(&self) -> &Path {
        &self.dir
    }
}

/// Joins `asset_id` onto `root`, rejecting identifiers that would escape it.
pub fn resolve_asset_path(root: &Path, asset_id: &str) -> Result<PathBuf, AssetPathError> {
    if asset_id.trim().is_empty() {
        return Err(AssetPathError::Empty);
    }

    let relative = Path::new(asset_id);
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(AssetPathError::Traversal(asset_id.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(AssetPathError::Absolute(asset_id.to_string()))
            }
        }
    }

    if resolved == root {
        return Err(AssetPathError::Empty);
    }
    Ok(resolved)
}

/// Invalid asset identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetPathError {
    #[error("Asset identifier is empty")]
    Empty,

    #[error("Asset identifier must be relative: {0}")]
    Absolute(String),

    #[error("Asset identifier escapes the storage root: {0}")]
    Traversal(String),
}
