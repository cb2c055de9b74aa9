// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Exclusive advisory file locks.
//!
//! A [`FileLock`] holds `flock`-style exclusion on a lock file until it is
//! dropped. Separate handles conflict even inside one process, so the same
//! lock serialises concurrent tool calls and separate processes alike.
//!
//! Never hold one across an `.await`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::ProtocolError;

/// Lock file in a messages directory guarding every read-decide-write over
/// requests and task descriptors.
pub const SUBMIT_LOCK_FILE: &str = ".submit-lock";

#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until `path` is held exclusively. The file and its parent
    /// directory are created if missing.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, ProtocolError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProtocolError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ProtocolError::io(&path, e))?;
        file.lock_exclusive().map_err(|source| ProtocolError::Lock {
            path: path.clone(),
            source,
        })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "Unlock failed; released on close");
        }
    }
}
