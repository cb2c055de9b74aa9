// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Activity probes.
//!
//! Each role family has its own notion of "making progress":
//!
//! - reviewers: recent conversation log, else recent source-control change
//! - engineers: the same, plus a longer grace window while the last logged
//!   action was a delegation to a peer
//! - coordinators: any subordinate worker alive, else conversation recency
//!   over a longer window; a crashed subordinate host is an error

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::HealthSettings;
use crate::error::HealthError;
use crate::process::{ConversationLog, LivenessMarker, LivenessState, SourceControl};
use crate::workspace::{Role, RoleFamily, Workspace};

/// Why a worker counts as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    ConversationLog,
    /// Last action was a delegation and the grace window has not elapsed.
    AwaitingPeer,
    SourceControl,
    /// A subordinate worker process is running.
    Subordinate,
}

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active(ActivitySignal),
    Inactive,
}

impl Activity {
    pub fn is_active(&self) -> bool {
        matches!(self, Activity::Active(_))
    }
}

/// Source of activity signals for one worker.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn probe(&self) -> Result<Activity, HealthError>;
}

/// Windows the probes compare timestamps against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindows {
    pub activity: Duration,
    pub delegation_grace: Duration,
    pub coordinator: Duration,
}

impl From<&HealthSettings> for ActivityWindows {
    fn from(health: &HealthSettings) -> Self {
        Self {
            activity: Duration::from_secs(health.activity_window_secs),
            delegation_grace: Duration::from_secs(health.delegation_grace_secs),
            coordinator: Duration::from_secs(health.coordinator_window_secs),
        }
    }
}

/// The [`ActivitySource`] used by real hosts.
pub struct RoleActivity {
    family: RoleFamily,
    log: ConversationLog,
    vcs: Arc<dyn SourceControl>,
    windows: ActivityWindows,
    subordinates: Vec<Workspace>,
}

impl RoleActivity {
    pub fn new(workspace: &Workspace, vcs: Arc<dyn SourceControl>, windows: ActivityWindows) -> Self {
        let family = workspace.role().family();
        let subordinates = if family == RoleFamily::Coordinator {
            subordinates_of(workspace)
        } else {
            Vec::new()
        };
        Self {
            family,
            log: ConversationLog::new(workspace.conversation_log()),
            vcs,
            windows,
            subordinates,
        }
    }

    fn log_age(&self, now: DateTime<Utc>) -> Option<(Duration, Option<String>)> {
        let tail = self.log.tail()?;
        let age = tail
            .timestamp
            .map(|t| now.signed_duration_since(t).to_std().unwrap_or(Duration::ZERO))?;
        Some((age, tail.last_tool))
    }

    async fn probe_reviewer(&self, now: DateTime<Utc>) -> Activity {
        if let Some((age, _)) = self.log_age(now) {
            if age <= self.windows.activity {
                return Activity::Active(ActivitySignal::ConversationLog);
            }
        }
        self.probe_vcs().await
    }

    async fn probe_engineer(&self, now: DateTime<Utc>) -> Activity {
        if let Some((age, last_tool)) = self.log_age(now) {
            if age <= self.windows.activity {
                return Activity::Active(ActivitySignal::ConversationLog);
            }
            let delegating = last_tool.as_deref().is_some_and(is_delegation_tool);
            if delegating && age <= self.windows.delegation_grace {
                debug!(age_secs = age.as_secs(), "Engineer is waiting on a delegation");
                return Activity::Active(ActivitySignal::AwaitingPeer);
            }
        }
        self.probe_vcs().await
    }

    fn probe_coordinator(&self, now: DateTime<Utc>) -> Result<Activity, HealthError> {
        let mut subordinate_running = false;
        for sub in &self.subordinates {
            if let LivenessState::Stale(pid) = LivenessMarker::new(sub.host_pid_file()).state() {
                return Err(HealthError::SubordinateHostCrashed {
                    role: sub.role().to_string(),
                    branch: sub.branch().to_string(),
                    pid,
                });
            }
            if LivenessMarker::new(sub.worker_pid_file()).state().is_live() {
                subordinate_running = true;
            }
        }
        if subordinate_running {
            return Ok(Activity::Active(ActivitySignal::Subordinate));
        }

        match self.log_age(now) {
            Some((age, _)) if age <= self.windows.coordinator => {
                Ok(Activity::Active(ActivitySignal::ConversationLog))
            }
            _ => Ok(Activity::Inactive),
        }
    }

    async fn probe_vcs(&self) -> Activity {
        if self.vcs.changed_within(self.windows.activity).await {
            Activity::Active(ActivitySignal::SourceControl)
        } else {
            Activity::Inactive
        }
    }
}

#[async_trait]
impl ActivitySource for RoleActivity {
    async fn probe(&self) -> Result<Activity, HealthError> {
        let now = Utc::now();
        match self.family {
            RoleFamily::Reviewer => Ok(self.probe_reviewer(now).await),
            RoleFamily::Engineer => Ok(self.probe_engineer(now).await),
            RoleFamily::Coordinator => self.probe_coordinator(now),
        }
    }
}

/// Workspaces a coordinator-family role watches over.
pub fn subordinates_of(workspace: &Workspace) -> Vec<Workspace> {
    Role::ALL
        .iter()
        .filter(|r| r.family() != RoleFamily::Coordinator)
        .map(|r| workspace.peer(*r))
        .collect()
}

/// Whether a logged tool invocation was a delegation.
///
/// Tool names may carry a server prefix such as `mcp__taskrelay__delegate`.
pub fn is_delegation_tool(name: &str) -> bool {
    name == "delegate" || name.ends_with("__delegate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeVcs {
        changed: bool,
    }

    #[async_trait]
    impl SourceControl for FakeVcs {
        async fn has_uncommitted_changes(&self) -> bool {
            self.changed
        }

        async fn last_change_time(&self) -> Option<DateTime<Utc>> {
            self.changed.then(Utc::now)
        }

        async fn current_branch(&self) -> Option<String> {
            Some("feature-x".to_string())
        }
    }

    fn windows() -> ActivityWindows {
        ActivityWindows {
            activity: Duration::from_secs(300),
            delegation_grace: Duration::from_secs(1800),
            coordinator: Duration::from_secs(900),
        }
    }

    fn write_log(ws: &Workspace, age_secs: i64, tool: Option<&str>) {
        std::fs::create_dir_all(ws.agent_dir()).unwrap();
        let ts = (Utc::now() - chrono::Duration::seconds(age_secs)).to_rfc3339();
        let line = match tool {
            Some(name) => format!(r#"{{"timestamp":"{ts}","type":"tool_use","name":"{name}"}}"#),
            None => format!(r#"{{"timestamp":"{ts}","text":"working"}}"#),
        };
        std::fs::write(ws.conversation_log(), format!("{line}\n")).unwrap();
    }

    fn probe_for(ws: &Workspace, vcs_changed: bool) -> RoleActivity {
        RoleActivity::new(ws, Arc::new(FakeVcs { changed: vcs_changed }), windows())
    }

    #[tokio::test]
    async fn test_reviewer_recent_log_is_active() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path(), Role::Reviewer, "feature-x");
        write_log(&ws, 60, None);

        let activity = probe_for(&ws, false).probe().await.unwrap();
        assert_eq!(activity, Activity::Active(ActivitySignal::ConversationLog));
    }

    #[tokio::test]
    async fn test_reviewer_falls_back_to_source_control() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path(), Role::Reviewer, "feature-x");
        write_log(&ws, 3600, None);

        let active = probe_for(&ws, true).probe().await.unwrap();
        assert_eq!(active, Activity::Active(ActivitySignal::SourceControl));

        let idle = probe_for(&ws, false).probe().await.unwrap();
        assert_eq!(idle, Activity::Inactive);
    }

    #[tokio::test]
    async fn test_engineer_waiting_on_delegation_gets_grace() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path(), Role::BackendEngineer, "feature-x");

        write_log(&ws, 1200, Some("mcp__taskrelay__delegate"));
        let activity = probe_for(&ws, false).probe().await.unwrap();
        assert_eq!(activity, Activity::Active(ActivitySignal::AwaitingPeer));

        write_log(&ws, 1200, Some("Bash"));
        let activity = probe_for(&ws, false).probe().await.unwrap();
        assert_eq!(activity, Activity::Inactive);

        write_log(&ws, 2400, Some("delegate"));
        let activity = probe_for(&ws, false).probe().await.unwrap();
        assert_eq!(activity, Activity::Inactive);
    }

    #[tokio::test]
    async fn test_coordinator_active_while_subordinate_runs() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path(), Role::Coordinator, "feature-x");
        let engineer = ws.peer(Role::BackendEngineer);
        LivenessMarker::new(engineer.worker_pid_file()).claim().unwrap();

        let activity = probe_for(&ws, false).probe().await.unwrap();
        assert_eq!(activity, Activity::Active(ActivitySignal::Subordinate));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_coordinator_escalates_crashed_subordinate_host() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path(), Role::Coordinator, "feature-x");
        let reviewer = ws.peer(Role::Reviewer);
        LivenessMarker::new(reviewer.host_pid_file()).write(u32::MAX - 1).unwrap();

        let err = probe_for(&ws, false).probe().await.unwrap_err();
        assert!(matches!(
            err,
            HealthError::SubordinateHostCrashed { ref role, .. } if role == "reviewer"
        ));
    }

    #[tokio::test]
    async fn test_coordinator_uses_longer_log_window() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path(), Role::Coordinator, "feature-x");
        write_log(&ws, 600, None);

        let activity = probe_for(&ws, false).probe().await.unwrap();
        assert_eq!(activity, Activity::Active(ActivitySignal::ConversationLog));
    }

    #[test]
    fn test_is_delegation_tool() {
        assert!(is_delegation_tool("delegate"));
        assert!(is_delegation_tool("mcp__taskrelay__delegate"));
        assert!(!is_delegation_tool("delegate_later"));
    }
}
