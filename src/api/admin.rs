// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Operational visibility: list hosted workers and stop one.

use serde::Serialize;
use tracing::info;

use crate::error::{DelegationError, ProtocolError, WorkspaceError};
use crate::process::{terminate_pid, LivenessMarker, LivenessState, StopOutcome};
use crate::protocol::TaskDescriptor;
use crate::workspace::{Role, Workspace};

use super::Relay;

/// One workspace with a host, a worker or a task on record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub id: String,
    pub role: Role,
    pub scope: String,
    pub host_pid: Option<u32>,
    pub host_alive: bool,
    pub worker_pid: Option<u32>,
    pub worker_alive: bool,
    pub task_number: Option<u32>,
    pub task_title: Option<String>,
}

impl WorkerSummary {
    fn inspect(workspace: &Workspace) -> Option<Self> {
        let host = LivenessMarker::new(workspace.host_pid_file()).state();
        let worker = LivenessMarker::new(workspace.worker_pid_file()).state();
        let task = TaskDescriptor::load(&workspace.task_file());
        if host == LivenessState::Absent && worker == LivenessState::Absent && task.is_none() {
            return None;
        }
        Some(Self {
            id: workspace.key(),
            role: workspace.role(),
            scope: workspace.scope().to_string(),
            host_pid: pid_of(host),
            host_alive: host.is_live(),
            worker_pid: pid_of(worker),
            worker_alive: worker.is_live(),
            task_number: task.as_ref().map(|t| t.task_number),
            task_title: task.map(|t| t.task_title),
        })
    }
}

fn pid_of(state: LivenessState) -> Option<u32> {
    match state {
        LivenessState::Absent => None,
        LivenessState::Live(pid) | LivenessState::Stale(pid) => Some(pid),
    }
}

/// What `terminate_worker` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum TerminateOutcome {
    Stopped { id: String, pid: u32, forced: bool },
    /// No live worker; any stale marker was removed.
    NotRunning { id: String },
}

impl TerminateOutcome {
    pub fn summary(&self) -> String {
        match self {
            Self::Stopped { id, pid, forced: false } => format!("Stopped worker {id} (pid {pid})."),
            Self::Stopped { id, pid, forced: true } => {
                format!("Worker {id} (pid {pid}) ignored the interrupt and was killed.")
            }
            Self::NotRunning { id } => format!("No worker is running for {id}."),
        }
    }
}

impl Relay {
    /// Every workspace under the root with a marker or a task, sorted by id.
    pub fn list_workers(&self) -> Result<Vec<WorkerSummary>, ProtocolError> {
        let root = self.root();
        let scopes = match std::fs::read_dir(root) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ProtocolError::io(root, e)),
        };

        let mut workers = Vec::new();
        for scope in scopes.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()) {
            let scope_name = scope.file_name().to_string_lossy().into_owned();
            let Ok(agents) = std::fs::read_dir(scope.path()) else {
                continue;
            };
            for agent in agents.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()) {
                let Ok(role) = agent.file_name().to_string_lossy().parse::<Role>() else {
                    continue;
                };
                let workspace = Workspace::resolve(root, role, &scope_name);
                // Skip directories that do not belong to this role's scope.
                if workspace.agent_dir() != agent.path() {
                    continue;
                }
                workers.extend(WorkerSummary::inspect(&workspace));
            }
        }
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }

    /// Stop the worker identified by `role@branch` (or `role` for
    /// branch-agnostic roles and the caller's branch).
    pub async fn terminate_worker(&self, id: &str) -> Result<TerminateOutcome, DelegationError> {
        let (role, branch) = match id.split_once('@') {
            Some((role, branch)) => (role, branch),
            None => (id, self.branch()),
        };
        let role: Role = role.parse().map_err(DelegationError::Workspace)?;
        if branch.trim().is_empty() && !role.is_branch_agnostic() {
            return Err(WorkspaceError::InvalidBranch(branch.to_string()).into());
        }
        let workspace = Workspace::resolve(self.root(), role, branch);
        let marker = LivenessMarker::new(workspace.worker_pid_file());
        let id = workspace.key();

        match marker.reclaim_if_stale() {
            LivenessState::Live(pid) => {
                let grace = self.config().timing.grace_period();
                let outcome = terminate_pid(pid, grace)
                    .await
                    .map_err(|e| DelegationError::Protocol(ProtocolError::io(marker.path(), e)))?;
                marker
                    .release(pid)
                    .map_err(|e| DelegationError::Protocol(ProtocolError::io(marker.path(), e)))?;
                info!(%id, pid, ?outcome, "Worker terminated");
                Ok(TerminateOutcome::Stopped {
                    id,
                    pid,
                    forced: outcome == StopOutcome::Forced,
                })
            }
            LivenessState::Stale(_) | LivenessState::Absent => Ok(TerminateOutcome::NotRunning { id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolvedConfig;
    use tempfile::TempDir;

    fn relay(temp: &TempDir) -> Relay {
        let mut config = ResolvedConfig::default();
        config.root = temp.path().to_path_buf();
        config.timing.grace_period_secs = 5;
        Relay::new(config, "feature-x")
    }

    #[test]
    fn test_list_workers_reports_markers() {
        let temp = TempDir::new().unwrap();
        let relay = relay(&temp);
        assert!(relay.list_workers().unwrap().is_empty());

        let reviewer = Workspace::resolve(temp.path(), Role::Reviewer, "feature-x");
        LivenessMarker::new(reviewer.host_pid_file()).claim().unwrap();
        let devops = Workspace::resolve(temp.path(), Role::DevopsEngineer, "feature-x");
        LivenessMarker::new(devops.worker_pid_file()).write(u32::MAX - 1).unwrap();
        std::fs::create_dir_all(temp.path().join("feature-x/not-a-role")).unwrap();

        let workers = relay.list_workers().unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].id, "devops-engineer");
        assert_eq!(workers[0].scope, "_shared");
        assert_eq!(workers[1].id, "reviewer@feature-x");
        assert!(workers[1].host_alive);
        assert_eq!(workers[1].host_pid, Some(std::process::id()));
    }

    #[tokio::test]
    async fn test_terminate_without_worker() {
        let temp = TempDir::new().unwrap();
        let outcome = relay(&temp).terminate_worker("reviewer@feature-x").await.unwrap();
        assert_eq!(
            outcome,
            TerminateOutcome::NotRunning {
                id: "reviewer@feature-x".to_string()
            }
        );
        let err = relay(&temp).terminate_worker("janitor").await.unwrap_err();
        assert!(matches!(err, DelegationError::Workspace(WorkspaceError::InvalidRole(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_live_worker() {
        let temp = TempDir::new().unwrap();
        let relay = relay(&temp);
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let reaper = std::thread::spawn(move || {
            let mut child = child;
            child.wait()
        });

        let ws = Workspace::resolve(temp.path(), Role::BackendEngineer, "feature-x");
        LivenessMarker::new(ws.worker_pid_file()).write(pid).unwrap();

        let outcome = relay.terminate_worker("backend-engineer").await.unwrap();
        assert_eq!(
            outcome,
            TerminateOutcome::Stopped {
                id: "backend-engineer@feature-x".to_string(),
                pid,
                forced: false
            }
        );
        assert!(!ws.worker_pid_file().exists());
        reaper.join().unwrap().unwrap();
    }
}
