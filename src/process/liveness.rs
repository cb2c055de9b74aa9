// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pid files answering "is the host/worker for this workspace running".
//!
//! A marker whose pid is dead is stale. That is an expected state after a
//! crash and is reclaimed quietly.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::signal::is_alive;

/// Result of inspecting a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Absent,
    Live(u32),
    /// The marker names a process that no longer exists.
    Stale(u32),
}

impl LivenessState {
    pub fn live_pid(self) -> Option<u32> {
        match self {
            Self::Live(pid) => Some(pid),
            _ => None,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Live(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, pid: u32) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{pid}\n"))
    }

    /// Write the current process id.
    pub fn claim(&self) -> std::io::Result<()> {
        self.write(std::process::id())
    }

    /// The pid stored in the marker; unparseable content reads as absent.
    pub fn read(&self) -> Option<u32> {
        std::fs::read_to_string(&self.path)
            .ok()?
            .lines()
            .next()?
            .trim()
            .parse()
            .ok()
    }

    pub fn state(&self) -> LivenessState {
        match self.read() {
            None => LivenessState::Absent,
            Some(pid) if is_alive(pid) => LivenessState::Live(pid),
            Some(pid) => LivenessState::Stale(pid),
        }
    }

    /// Inspect the marker and delete it if stale.
    pub fn reclaim_if_stale(&self) -> LivenessState {
        let state = self.state();
        if let LivenessState::Stale(pid) = state {
            debug!(path = %self.path.display(), pid, "Reclaiming stale liveness marker");
            if let Err(e) = self.remove() {
                debug!(path = %self.path.display(), error = %e, "Failed to remove stale marker");
            }
        }
        state
    }

    /// Remove the marker. Returns whether a file was removed.
    pub fn remove(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove the marker only if it still names `pid`.
    pub fn release(&self, pid: u32) -> std::io::Result<bool> {
        if self.read() == Some(pid) {
            self.remove()
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_marker() {
        let dir = TempDir::new().unwrap();
        let marker = LivenessMarker::new(dir.path().join(".host-pid"));
        assert_eq!(marker.state(), LivenessState::Absent);
        assert!(!marker.remove().unwrap());
    }

    #[test]
    fn test_claim_is_live() {
        let dir = TempDir::new().unwrap();
        let marker = LivenessMarker::new(dir.path().join("agent/.host-pid"));
        marker.claim().unwrap();
        assert_eq!(marker.state(), LivenessState::Live(std::process::id()));
        assert!(marker.release(std::process::id()).unwrap());
        assert_eq!(marker.state(), LivenessState::Absent);
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_pid_is_stale_and_reclaimed() {
        let dir = TempDir::new().unwrap();
        let marker = LivenessMarker::new(dir.path().join(".worker-pid"));
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        marker.write(pid).unwrap();

        assert_eq!(marker.reclaim_if_stale(), LivenessState::Stale(pid));
        assert!(!marker.path().exists());
    }

    #[test]
    fn test_garbage_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".worker-pid");
        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(LivenessMarker::new(&path).state(), LivenessState::Absent);
    }

    #[test]
    fn test_release_ignores_foreign_pid() {
        let dir = TempDir::new().unwrap();
        let marker = LivenessMarker::new(dir.path().join(".host-pid"));
        marker.write(12345).unwrap();
        assert!(!marker.release(54321).unwrap());
        assert!(marker.path().exists());
    }
}
