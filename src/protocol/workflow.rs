// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Append-only workflow log.
//!
//! One line per protocol event. The log is informational only, so write
//! failures are logged at debug level and otherwise ignored. Decisions
//! never read it back; see [`super::MessageStore::is_abandoned`].

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::workspace::Role;

use super::header::format_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowEvent {
    Delegated,
    Queued,
    MonitoringExisting,
    Received,
    Completed,
    Restarted,
    Exhausted,
    Timeout,
}

impl WorkflowEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delegated => "delegated",
            Self::Queued => "queued",
            Self::MonitoringExisting => "monitoring-existing",
            Self::Received => "received",
            Self::Completed => "completed",
            Self::Restarted => "restarted",
            Self::Exhausted => "exhausted",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowLog {
    path: PathBuf,
}

impl WorkflowLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, event: WorkflowEvent, role: Role, number: Option<u32>, detail: &str) {
        let number = number.map(|n| format!("#{n:04}")).unwrap_or_else(|| "-".to_string());
        let line = format!(
            "{} {} {} {} {}\n",
            format_timestamp(&Utc::now()),
            event,
            role,
            number,
            detail.replace('\n', " ")
        );
        if let Err(e) = self.append(&line) {
            debug!(path = %self.path.display(), error = %e, "Workflow log write failed");
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_appends_lines() {
        let dir = TempDir::new().unwrap();
        let log = WorkflowLog::new(dir.path().join("feature-x/workflow.log"));
        log.record(WorkflowEvent::Delegated, Role::BackendEngineer, Some(1), "Add endpoint");
        log.record(WorkflowEvent::Completed, Role::BackendEngineer, Some(1), "multi\nline");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("delegated backend-engineer #0001 Add endpoint"));
        assert!(lines[1].ends_with("completed backend-engineer #0001 multi line"));
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // A directory where the log file should be makes every append fail.
        let path = dir.path().join("workflow.log");
        std::fs::create_dir_all(&path).unwrap();
        WorkflowLog::new(&path).record(WorkflowEvent::Timeout, Role::Reviewer, None, "x");
    }
}
