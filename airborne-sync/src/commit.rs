// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Atomic file commits
//!
//! Content is streamed into a temporary sibling of the target and renamed
//! over it once complete, so the target path only ever holds the previous
//! content or the new content. Temporary files carry the
//! [`TEMP_SUFFIX`] marker; anything left behind by a crash is removed by
//! [`AtomicFileCommitter::purge_stale`] at startup.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Reserved suffix of in-flight temporary files.
pub const TEMP_SUFFIX: &str = ".ota-partial";

/// Hands out [`PendingWrite`]s and cleans up after interrupted ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicFileCommitter;

impl AtomicFileCommitter {
    pub fn new() -> Self {
        Self
    }

    /// Opens a temporary file next to `target` (same volume, so the final
    /// rename is a single metadata operation).
    pub fn begin(&self, target: &Path) -> Result<PendingWrite, CommitError> {
        let file_name = target
            .file_name()
            .ok_or_else(|| CommitError::InvalidTarget(target.to_path_buf()))?;
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let temp_name = format!(
            ".{}.{}{}",
            file_name.to_string_lossy(),
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        );
        let temp_path = parent.join(temp_name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;

        Ok(PendingWrite {
            temp_path,
            target_path: target.to_path_buf(),
            file: Some(file),
            written: 0,
            finished: false,
        })
    }

    /// One-shot atomic replacement of `target` with `data`.
    pub fn write_atomic(&self, target: &Path, data: &[u8]) -> Result<(), CommitError> {
        let mut pending = self.begin(target)?;
        pending.write(data)?;
        pending.commit()?;
        Ok(())
    }

    /// Deletes every leftover temporary file below `root`.
    ///
    /// Returns the number of files removed. A missing root is not an error.
    pub fn purge_stale(&self, root: &Path) -> Result<usize, CommitError> {
        if !root.exists() {
            return Ok(0);
        }
        let removed = purge_dir(root)?;
        if removed > 0 {
            warn!(root = %root.display(), removed, "removed interrupted commits");
        }
        Ok(removed)
    }
}

fn purge_dir(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            removed += purge_dir(&path)?;
        } else if is_temp_file(&path) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(removed)
}

/// True when `path` follows the temporary naming convention.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEMP_SUFFIX))
}

/// An in-flight commit. Owns its temporary file until [`commit`](Self::commit)
/// hands it to the filesystem; dropping it uncommitted deletes the temp file.
#[derive(Debug)]
pub struct PendingWrite {
    temp_path: PathBuf,
    target_path: PathBuf,
    file: Option<File>,
    written: u64,
    finished: bool,
}

impl PendingWrite {
    /// Appends `bytes` to the temporary file.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), CommitError> {
        let file = self.file.as_mut().ok_or(CommitError::Closed)?;
        file.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Flushes, fsyncs and renames the temporary file over the target.
    ///
    /// Returns the number of bytes committed.
    pub fn commit(mut self) -> Result<u64, CommitError> {
        let mut file = self.file.take().ok_or(CommitError::Closed)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.target_path)?;
        self.finished = true;

        if let Err(e) = sync_parent(&self.target_path) {
            warn!(target = %self.target_path.display(), "directory sync failed: {}", e);
        }
        debug!(target = %self.target_path.display(), bytes = self.written, "committed");
        Ok(self.written)
    }

    /// Discards the temporary file. The target is never touched.
    pub fn abandon(self) {
        drop(self);
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.file.take();
        if let Err(e) = fs::remove_file(&self.temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(temp = %self.temp_path.display(), "failed to remove temp file: {}", e);
            }
        }
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Errors that can occur while committing a file
#[derive(Debug, Error)]
pub enum CommitError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Target has no file name component
    #[error("Invalid commit target: {0}")]
    InvalidTarget(PathBuf),

    /// Write attempted after the handle was closed
    #[error("Pending write already closed")]
    Closed,
}
