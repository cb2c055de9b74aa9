// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session bookkeeping.
//!
//! [`SessionRegistry`] is the explicit replacement for process-wide session
//! tables: it is created once, cloned into whichever component needs it,
//! and guards its map with an async lock. It also carries the metrics
//! handle and the "show all activity" toggle.
//!
//! [`SessionIdentity`] manages the `.session-id` file that lets a worker
//! resume its previous conversation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::telemetry::Metrics;
use crate::workspace::{Role, Workspace};

use super::state::HostState;

/// What the registry knows about one hosted workspace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub key: String,
    pub role: Role,
    pub branch: String,
    #[serde(flatten)]
    pub state: HostState,
    pub task_title: Option<String>,
    pub restarts: u32,
    pub updated_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            key: workspace.key(),
            role: workspace.role(),
            branch: workspace.branch().to_string(),
            state: HostState::Idle,
            task_title: None,
            restarts: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Shared registry of active sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
    show_activity: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            ..Self::default()
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Register a workspace, replacing any previous entry.
    pub async fn register(&self, workspace: &Workspace) {
        let info = SessionInfo::new(workspace);
        self.sessions.write().await.insert(info.key.clone(), info);
    }

    /// Apply `update` to an entry, registering it first if needed.
    pub async fn update<F>(&self, workspace: &Workspace, update: F)
    where
        F: FnOnce(&mut SessionInfo),
    {
        let mut sessions = self.sessions.write().await;
        let info = sessions
            .entry(workspace.key())
            .or_insert_with(|| SessionInfo::new(workspace));
        update(info);
        info.updated_at = Utc::now();
    }

    pub async fn set_state(&self, workspace: &Workspace, state: HostState) {
        self.update(workspace, |info| info.state = state).await;
    }

    pub async fn get(&self, key: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &str) -> Option<SessionInfo> {
        self.sessions.write().await.remove(key)
    }

    /// All sessions, sorted by key.
    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        let mut all: Vec<_> = self.sessions.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn show_activity(&self) -> bool {
        self.show_activity.load(Ordering::Relaxed)
    }

    pub fn set_show_activity(&self, on: bool) {
        self.show_activity.store(on, Ordering::Relaxed);
    }

    /// Flip the toggle and return the new value.
    pub fn toggle_show_activity(&self) -> bool {
        !self.show_activity.fetch_xor(true, Ordering::Relaxed)
    }
}

/// The `.session-id` file of one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    path: PathBuf,
}

impl SessionIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_workspace(workspace: &Workspace) -> Self {
        Self::new(workspace.session_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored session id, if any.
    pub fn load(&self) -> Option<String> {
        let id = std::fs::read_to_string(&self.path).ok()?;
        let id = id.trim();
        (!id.is_empty()).then(|| id.to_string())
    }

    /// Return the stored id, or create and persist a new one.
    ///
    /// The flag is `true` when the id already existed and the worker should
    /// resume rather than start fresh.
    pub fn load_or_create(&self) -> std::io::Result<(String, bool)> {
        if let Some(id) = self.load() {
            return Ok((id, true));
        }
        let id = Uuid::new_v4().to_string();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{id}\n"))?;
        debug!(path = %self.path.display(), "Created session id");
        Ok((id, false))
    }

    /// Forget the remembered conversation. Returns whether one existed.
    pub fn clear(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
