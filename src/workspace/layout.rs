// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deterministic path derivation for a (role, branch) pair.
//!
//! # Directory Structure
//!
//! ```text
//! <root>/
//! ├── feature-x/                    # branch scope
//! │   ├── messages/
//! │   │   ├── .task-counter
//! │   │   ├── 0001.backend-engineer.request.add-endpoint.md
//! │   │   └── 0001.backend-engineer.response.add-endpoint.md
//! │   ├── feedback/
//! │   ├── workflow.log
//! │   └── backend-engineer/         # agent workspace
//! │       ├── .host-pid
//! │       ├── .worker-pid
//! │       ├── .session-id
//! │       ├── current-task.json
//! │       ├── conversation.jsonl
//! │       └── system-prompt.md
//! └── _shared/                      # branch-agnostic roles
//!     └── devops-engineer/
//! ```
//!
//! Nothing here touches the filesystem. Directories are created lazily by
//! whoever writes into them.

use std::path::{Path, PathBuf};

use crate::error::WorkspaceError;

use super::role::Role;

/// Scope directory used by branch-agnostic roles.
pub const SHARED_SCOPE: &str = "_shared";

pub const MESSAGES_DIR: &str = "messages";
pub const FEEDBACK_DIR: &str = "feedback";
pub const WORKFLOW_LOG: &str = "workflow.log";
pub const HOST_PID_FILE: &str = ".host-pid";
pub const WORKER_PID_FILE: &str = ".worker-pid";
pub const TASK_FILE: &str = "current-task.json";
pub const COUNTER_FILE: &str = ".task-counter";
pub const SESSION_FILE: &str = ".session-id";
pub const SYSTEM_PROMPT_FILE: &str = "system-prompt.md";
pub const CONVERSATION_LOG: &str = "conversation.jsonl";

/// The resolved workspace of one worker role.
///
/// Two values built from the same root, role and branch always yield
/// identical paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Workspace {
    root: PathBuf,
    role: Role,
    branch: String,
    scope: String,
}

impl Workspace {
    /// Resolve the workspace for a typed role.
    pub fn resolve(root: impl Into<PathBuf>, role: Role, branch: &str) -> Self {
        let scope = if role.is_branch_agnostic() {
            SHARED_SCOPE.to_string()
        } else {
            sanitize_branch(branch)
        };
        Self {
            root: root.into(),
            role,
            branch: branch.trim().to_string(),
            scope,
        }
    }

    /// Resolve the workspace for a role given by name.
    pub fn resolve_named(
        root: impl Into<PathBuf>,
        role: &str,
        branch: &str,
    ) -> Result<Self, WorkspaceError> {
        let role: Role = role.parse()?;
        if branch.trim().is_empty() && !role.is_branch_agnostic() {
            return Err(WorkspaceError::InvalidBranch(branch.to_string()));
        }
        Ok(Self::resolve(root, role, branch))
    }

    /// The workspace of another role on the same branch.
    pub fn peer(&self, role: Role) -> Self {
        Self::resolve(self.root.clone(), role, &self.branch)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The branch as given by the caller.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Directory key under the root (sanitised branch, or [`SHARED_SCOPE`]).
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Human-readable identifier, e.g. `backend-engineer@feature-x`.
    pub fn key(&self) -> String {
        if self.role.is_branch_agnostic() {
            self.role.as_str().to_string()
        } else {
            format!("{}@{}", self.role, self.scope)
        }
    }

    pub fn scope_dir(&self) -> PathBuf {
        self.root.join(&self.scope)
    }

    pub fn agent_dir(&self) -> PathBuf {
        self.scope_dir().join(self.role.as_str())
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.scope_dir().join(MESSAGES_DIR)
    }

    pub fn feedback_dir(&self) -> PathBuf {
        self.scope_dir().join(FEEDBACK_DIR)
    }

    pub fn workflow_log(&self) -> PathBuf {
        self.scope_dir().join(WORKFLOW_LOG)
    }

    pub fn host_pid_file(&self) -> PathBuf {
        self.agent_dir().join(HOST_PID_FILE)
    }

    pub fn worker_pid_file(&self) -> PathBuf {
        self.agent_dir().join(WORKER_PID_FILE)
    }

    pub fn task_file(&self) -> PathBuf {
        self.agent_dir().join(TASK_FILE)
    }

    pub fn counter_file(&self) -> PathBuf {
        self.messages_dir().join(COUNTER_FILE)
    }

    pub fn session_file(&self) -> PathBuf {
        self.agent_dir().join(SESSION_FILE)
    }

    pub fn system_prompt_file(&self) -> PathBuf {
        self.agent_dir().join(SYSTEM_PROMPT_FILE)
    }

    pub fn conversation_log(&self) -> PathBuf {
        self.agent_dir().join(CONVERSATION_LOG)
    }
}

/// Turn a branch name into a single safe directory component.
///
/// `feature/x` becomes `feature-x`. Characters outside `[A-Za-z0-9._-]`
/// map to `-`; an empty or dot-only result becomes `detached`.
pub fn sanitize_branch(branch: &str) -> String {
    let mapped: String = branch
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "detached".to_string()
    } else {
        trimmed.to_string()
    }
}
