// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Temp-file-then-rename writes.
//!
//! Observers of the messages directory must see a file as either absent or
//! fully written. Every protocol artifact goes through one of these helpers.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::ProtocolError;

/// Write `contents` to `path`, replacing any existing file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ProtocolError> {
    let tmp = stage(path, contents)?;
    tmp.persist(path)
        .map_err(|e| ProtocolError::io(path, e.error))?;
    Ok(())
}

/// Write `contents` to `path`, failing with [`ProtocolError::AlreadyExists`]
/// if a file is already there.
pub fn create_new_atomic(path: &Path, contents: &[u8]) -> Result<(), ProtocolError> {
    let tmp = stage(path, contents)?;
    tmp.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            ProtocolError::AlreadyExists(path.to_path_buf())
        } else {
            ProtocolError::io(path, e.error)
        }
    })?;
    Ok(())
}

/// Write to a temp file in the destination directory so the final rename
/// never crosses a filesystem boundary.
fn stage(path: &Path, contents: &[u8]) -> Result<NamedTempFile, ProtocolError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| ProtocolError::io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .map_err(|e| ProtocolError::io(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ProtocolError::io(tmp.path(), e))?;
    Ok(tmp)
}
