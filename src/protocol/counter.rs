// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-process task counter.
//!
//! The counter file is the one piece of shared mutable state in the messages
//! directory. Every increment holds an exclusive advisory lock for the whole
//! read-increment-write cycle.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ProtocolError;

use super::lock::FileLock;

/// Handle to a `.task-counter` file.
#[derive(Debug, Clone)]
pub struct TaskCounter {
    path: PathBuf,
}

impl TaskCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last number handed out (0 if the file does not exist yet).
    pub fn current(&self) -> Result<u32, ProtocolError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => self.parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(ProtocolError::io(&self.path, e)),
        }
    }

    /// Increment and return the new value.
    pub fn next(&self) -> Result<u32, ProtocolError> {
        self.next_after(0)
    }

    /// Increment and return a value strictly greater than both the stored
    /// counter and `floor`.
    ///
    /// `floor` lets callers reconcile with message files that exist on disk
    /// when the counter file was lost or reset.
    pub fn next_after(&self, floor: u32) -> Result<u32, ProtocolError> {
        let mut lock = FileLock::acquire(&self.path)?;
        self.increment_locked(lock.file_mut(), floor)
    }

    fn increment_locked(&self, file: &mut File, floor: u32) -> Result<u32, ProtocolError> {
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| ProtocolError::io(&self.path, e))?;

        let current = self.parse(&content)?;
        let next = current.max(floor) + 1;

        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(file, "{next}"))
            .and_then(|_| file.sync_all())
            .map_err(|e| ProtocolError::io(&self.path, e))?;

        debug!(path = %self.path.display(), value = next, "Task counter incremented");
        Ok(next)
    }

    fn parse(&self, content: &str) -> Result<u32, ProtocolError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed
            .parse()
            .map_err(|_| ProtocolError::CorruptCounter {
                path: self.path.clone(),
                content: trimmed.to_string(),
            })
    }
}
