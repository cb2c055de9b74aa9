// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Source-control status probe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::debug;

/// Answers "has anyone touched the checkout recently".
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn has_uncommitted_changes(&self) -> bool;

    /// Time of the most recent change: newest modified file in the working
    /// tree, or the last commit when the tree is clean.
    async fn last_change_time(&self) -> Option<DateTime<Utc>>;

    async fn current_branch(&self) -> Option<String>;

    /// Whether the checkout changed within `window`.
    async fn changed_within(&self, window: Duration) -> bool {
        let Some(last) = self.last_change_time().await else {
            return false;
        };
        let age = Utc::now().signed_duration_since(last);
        age.num_seconds() <= window.as_secs() as i64
    }
}

/// [`SourceControl`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitProbe {
    repo: PathBuf,
}

impl GitProbe {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    async fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .await
            .map_err(|e| debug!(error = %e, "git not available"))
            .ok()?;
        if !output.status.success() {
            debug!(args = ?args, status = ?output.status.code(), "git command failed");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn changed_paths(&self) -> Vec<PathBuf> {
        let Some(status) = self.git(&["status", "--porcelain"]).await else {
            return Vec::new();
        };
        status
            .lines()
            .filter_map(porcelain_path)
            .map(|p| self.repo.join(p))
            .collect()
    }
}

#[async_trait]
impl SourceControl for GitProbe {
    async fn has_uncommitted_changes(&self) -> bool {
        !self.changed_paths().await.is_empty()
    }

    async fn last_change_time(&self) -> Option<DateTime<Utc>> {
        let newest_file = self
            .changed_paths()
            .await
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok()?.modified().ok())
            .max()
            .map(DateTime::<Utc>::from);

        let last_commit = self
            .git(&["log", "-1", "--format=%cI"])
            .await
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|t| t.with_timezone(&Utc));

        newest_file.max(last_commit)
    }

    async fn current_branch(&self) -> Option<String> {
        let name = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let name = name.trim();
        (!name.is_empty() && name != "HEAD").then(|| name.to_string())
    }
}

/// Path component of a `git status --porcelain` line (rename targets win).
fn porcelain_path(line: &str) -> Option<&str> {
    let path = line.get(3..)?.trim();
    let path = path.rsplit(" -> ").next().unwrap_or(path);
    let path = path.trim_matches('"');
    (!path.is_empty()).then_some(path)
}
