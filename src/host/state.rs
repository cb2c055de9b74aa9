// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host states and the human-readable status line printed on each
//! transition.

use std::fmt;

use chrono::Local;
use colored::Colorize;
use serde::Serialize;

use crate::workspace::Workspace;

/// Where a worker host is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum HostState {
    /// Waiting for a request file or a manual trigger.
    Idle,
    Launching { task_number: Option<u32> },
    Monitoring { task_number: Option<u32>, pid: Option<u32> },
    Completing { task_number: Option<u32> },
    /// A human is driving the worker directly; no restarts.
    ManualControl { pid: Option<u32> },
    Stopped,
}

impl HostState {
    pub fn label(&self) -> &'static str {
        match self {
            HostState::Idle => "idle",
            HostState::Launching { .. } => "launching",
            HostState::Monitoring { .. } => "monitoring",
            HostState::Completing { .. } => "completing",
            HostState::ManualControl { .. } => "manual",
            HostState::Stopped => "stopped",
        }
    }

    pub fn task_number(&self) -> Option<u32> {
        match self {
            HostState::Launching { task_number }
            | HostState::Monitoring { task_number, .. }
            | HostState::Completing { task_number } => *task_number,
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self, HostState::Idle | HostState::Stopped)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())?;
        if let Some(n) = self.task_number() {
            write!(f, " #{n:04}")?;
        }
        Ok(())
    }
}

/// Kind of status line, which decides its colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Received,
    Restarting,
    Completed,
    Failed,
}

/// Format one status line: `[12:00:01] Backend Engineer (feature-x) received #0001 Add endpoint`.
pub fn status_line(workspace: &Workspace, kind: StatusKind, message: &str) -> String {
    let info = workspace.role().info();
    let who = format!("{} ({})", info.display_name, workspace.scope()).color(info.color).bold();
    let message = match kind {
        StatusKind::Info => message.normal(),
        StatusKind::Received => message.cyan(),
        StatusKind::Restarting => message.yellow(),
        StatusKind::Completed => message.green(),
        StatusKind::Failed => message.red(),
    };
    format!(
        "{} {} {}",
        format!("[{}]", Local::now().format("%H:%M:%S")).dimmed(),
        who,
        message
    )
}

/// Print a status line to stdout.
pub fn announce(workspace: &Workspace, kind: StatusKind, message: &str) {
    println!("{}", status_line(workspace, kind, message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Role;

    #[test]
    fn test_display_includes_task_number() {
        let state = HostState::Monitoring {
            task_number: Some(7),
            pid: Some(100),
        };
        assert_eq!(state.to_string(), "monitoring #0007");
        assert_eq!(HostState::Idle.to_string(), "idle");
        assert!(state.is_busy());
        assert!(!HostState::Idle.is_busy());
    }

    #[test]
    fn test_serializes_with_state_tag() {
        let json = serde_json::to_value(HostState::Completing { task_number: Some(2) }).unwrap();
        assert_eq!(json["state"], "completing");
        assert_eq!(json["task_number"], 2);
    }

    #[test]
    fn test_status_line_names_workspace() {
        colored::control::set_override(false);
        let ws = Workspace::resolve("/tmp/relay", Role::BackendEngineer, "feature-x");
        let line = status_line(&ws, StatusKind::Received, "received #0001 Add endpoint");
        assert!(line.contains("Backend Engineer (feature-x) received #0001 Add endpoint"));
    }
}
