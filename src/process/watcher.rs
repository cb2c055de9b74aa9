// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Filesystem change notification filtered by a glob.
//!
//! The notify callback runs on its own thread and forwards matching paths
//! into a bounded channel. Consumers must re-check the filesystem after a
//! notification: events can be coalesced or dropped when the channel is full.

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobMatcher};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::WatchError;

const CHANNEL_CAPACITY: usize = 64;

/// Watches one directory (non-recursively) for files matching a glob.
pub struct FileWatcher {
    // Dropping the watcher stops notifications.
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<PathBuf>,
    dir: PathBuf,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher").field("dir", &self.dir).finish()
    }
}

impl FileWatcher {
    /// Start watching `dir` for created or renamed files whose name matches
    /// `pattern`. The directory is created if missing.
    pub fn watch(dir: &Path, pattern: &str) -> Result<Self, WatchError> {
        std::fs::create_dir_all(dir).map_err(|source| WatchError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let matcher: GlobMatcher = Glob::new(pattern)?.compile_matcher();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, _>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for path in event.paths {
                let matched = path
                    .file_name()
                    .map(|name| matcher.is_match(Path::new(name)))
                    .unwrap_or(false);
                if matched {
                    trace!(path = %path.display(), "Watched file changed");
                    // A full channel already holds a pending wake-up.
                    let _ = tx.try_send(path);
                }
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %dir.display(), pattern, "Watching directory");

        Ok(Self {
            _watcher: watcher,
            rx,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Next matching path. `None` if the watcher has shut down.
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.rx.recv().await
    }

    /// Wait until `check` yields a value.
    ///
    /// `check` runs once immediately (covering files written before the
    /// watch was registered), again after every notification, and every
    /// `recheck` interval as a fallback. Returns `None` when `timeout`
    /// elapses first.
    pub async fn wait_for<T, F>(
        &mut self,
        timeout: Option<Duration>,
        recheck: Duration,
        mut check: F,
    ) -> Option<T>
    where
        F: FnMut() -> Option<T>,
    {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            if let Some(found) = check() {
                return Some(found);
            }

            let wake = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = self.rx.recv() => {
                    if event.is_none() {
                        // Watcher gone; fall back to interval checks.
                        tokio::time::sleep(recheck).await;
                    }
                }
                _ = tokio::time::sleep(recheck) => {}
                _ = wake => {
                    return check();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_wait_for_existing_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("0001.reviewer.response.x.md");
        std::fs::write(&target, "done").unwrap();

        let mut watcher = FileWatcher::watch(dir.path(), "*.reviewer.response.*.md").unwrap();
        let found = watcher
            .wait_for(Some(Duration::from_secs(1)), Duration::from_secs(1), || {
                target.exists().then(|| target.clone())
            })
            .await;
        assert_eq!(found, Some(target));
    }

    #[tokio::test]
    async fn test_wait_for_file_created_later() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("0002.reviewer.response.y.md");
        let mut watcher = FileWatcher::watch(dir.path(), "*.reviewer.response.*.md").unwrap();

        let writer_target = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::write(&writer_target, "done").unwrap();
        });

        let found = watcher
            .wait_for(Some(Duration::from_secs(10)), Duration::from_millis(500), || {
                target.exists().then(|| target.clone())
            })
            .await;
        assert_eq!(found, Some(target));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let dir = TempDir::new().unwrap();
        let mut watcher = FileWatcher::watch(dir.path(), "*.md").unwrap();
        let found: Option<()> = watcher
            .wait_for(Some(Duration::from_millis(150)), Duration::from_millis(50), || None)
            .await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_next_filters_by_glob() {
        let dir = TempDir::new().unwrap();
        let mut watcher =
            FileWatcher::watch(dir.path(), "*.backend-engineer.request.*.md").unwrap();

        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("0001.backend-engineer.request.a.md"), "x").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .unwrap()
            .unwrap();
        assert!(path.ends_with("0001.backend-engineer.request.a.md"));
    }
}
