// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed role enumeration.
//!
//! Every worker role is known at compile time. Display metadata, rule
//! directories, health family and launch behaviour are carried as data on
//! [`RoleInfo`] rather than derived from string matching at call sites.

use std::fmt;
use std::str::FromStr;

use colored::Color;
use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;

/// A worker's functional identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Coordinator,
    PairProgrammer,
    BackendEngineer,
    FrontendEngineer,
    DevopsEngineer,
    Reviewer,
    ProductManager,
}

/// Which activity heuristics and restart limits apply to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleFamily {
    /// Reviews work; falls back to source-control activity when quiet.
    Reviewer,
    /// Implements work; may legitimately wait on a peer it delegated to.
    Engineer,
    /// Long-running orchestrator; active while any subordinate is alive.
    Coordinator,
}

/// When the host starts the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Start as soon as the host starts; driven by open-ended conversation.
    Immediate,
    /// Stay idle until a request file arrives.
    Reactive,
}

/// How a running session is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Human-driven; never restarted for inactivity.
    Manual,
    /// Bound to delegated work; subject to inactivity limits.
    Supervised,
}

/// Static metadata for a role.
#[derive(Debug, Clone, Copy)]
pub struct RoleInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub color: Color,
    pub family: RoleFamily,
    pub launch: LaunchMode,
    /// Session mode used when the host launches immediately.
    pub immediate_session: SessionMode,
    /// Shared across every branch instead of scoped under one.
    pub branch_agnostic: bool,
    /// Role that reviews this role's output, if any.
    pub reviewer: Option<Role>,
    /// Rule directories (relative to the rules root) concatenated into the
    /// system prompt, in order.
    pub rule_dirs: &'static [&'static str],
}

const COORDINATOR: RoleInfo = RoleInfo {
    name: "coordinator",
    display_name: "Coordinator",
    color: Color::Magenta,
    family: RoleFamily::Coordinator,
    launch: LaunchMode::Immediate,
    immediate_session: SessionMode::Supervised,
    branch_agnostic: false,
    reviewer: None,
    rule_dirs: &["common", "coordination"],
};

const PAIR_PROGRAMMER: RoleInfo = RoleInfo {
    name: "pair-programmer",
    display_name: "Pair Programmer",
    color: Color::BrightCyan,
    family: RoleFamily::Engineer,
    launch: LaunchMode::Immediate,
    immediate_session: SessionMode::Manual,
    branch_agnostic: false,
    reviewer: Some(Role::Reviewer),
    rule_dirs: &["common", "engineering"],
};

const BACKEND_ENGINEER: RoleInfo = RoleInfo {
    name: "backend-engineer",
    display_name: "Backend Engineer",
    color: Color::Blue,
    family: RoleFamily::Engineer,
    launch: LaunchMode::Reactive,
    immediate_session: SessionMode::Supervised,
    branch_agnostic: false,
    reviewer: Some(Role::Reviewer),
    rule_dirs: &["common", "engineering", "backend"],
};

const FRONTEND_ENGINEER: RoleInfo = RoleInfo {
    name: "frontend-engineer",
    display_name: "Frontend Engineer",
    color: Color::Green,
    family: RoleFamily::Engineer,
    launch: LaunchMode::Reactive,
    immediate_session: SessionMode::Supervised,
    branch_agnostic: false,
    reviewer: Some(Role::Reviewer),
    rule_dirs: &["common", "engineering", "frontend"],
};

const DEVOPS_ENGINEER: RoleInfo = RoleInfo {
    name: "devops-engineer",
    display_name: "DevOps Engineer",
    color: Color::Yellow,
    family: RoleFamily::Engineer,
    launch: LaunchMode::Reactive,
    immediate_session: SessionMode::Supervised,
    branch_agnostic: true,
    reviewer: Some(Role::Reviewer),
    rule_dirs: &["common", "engineering", "devops"],
};

const REVIEWER: RoleInfo = RoleInfo {
    name: "reviewer",
    display_name: "Reviewer",
    color: Color::Red,
    family: RoleFamily::Reviewer,
    launch: LaunchMode::Reactive,
    immediate_session: SessionMode::Supervised,
    branch_agnostic: false,
    reviewer: None,
    rule_dirs: &["common", "review"],
};

const PRODUCT_MANAGER: RoleInfo = RoleInfo {
    name: "product-manager",
    display_name: "Product Manager",
    color: Color::BrightMagenta,
    family: RoleFamily::Coordinator,
    launch: LaunchMode::Reactive,
    immediate_session: SessionMode::Supervised,
    branch_agnostic: true,
    reviewer: None,
    rule_dirs: &["common", "product"],
};

impl Role {
    /// Every known role, in display order.
    pub const ALL: [Role; 7] = [
        Role::Coordinator,
        Role::PairProgrammer,
        Role::BackendEngineer,
        Role::FrontendEngineer,
        Role::DevopsEngineer,
        Role::Reviewer,
        Role::ProductManager,
    ];

    /// Static metadata for this role.
    pub const fn info(self) -> &'static RoleInfo {
        match self {
            Role::Coordinator => &COORDINATOR,
            Role::PairProgrammer => &PAIR_PROGRAMMER,
            Role::BackendEngineer => &BACKEND_ENGINEER,
            Role::FrontendEngineer => &FRONTEND_ENGINEER,
            Role::DevopsEngineer => &DEVOPS_ENGINEER,
            Role::Reviewer => &REVIEWER,
            Role::ProductManager => &PRODUCT_MANAGER,
        }
    }

    /// The kebab-case name used in paths and message file names.
    pub const fn as_str(self) -> &'static str {
        self.info().name
    }

    pub const fn family(self) -> RoleFamily {
        self.info().family
    }

    pub const fn is_branch_agnostic(self) -> bool {
        self.info().branch_agnostic
    }

    pub const fn launch_mode(self) -> LaunchMode {
        self.info().launch
    }

    pub const fn reviewer(self) -> Option<Role> {
        self.info().reviewer
    }

    /// Comma-separated list of valid role names, for error messages and help.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == needle)
            .ok_or_else(|| WorkspaceError::InvalidRole(s.to_string()))
    }
}
