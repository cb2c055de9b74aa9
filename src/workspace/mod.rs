// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workspace and identity model.
//!
//! A [`Workspace`] is a pure value computed from `(role, branch)` plus the
//! configured root. It owns no state and performs no I/O.

pub mod layout;
pub mod role;

pub use layout::{sanitize_branch, Workspace, SHARED_SCOPE};
pub use role::{LaunchMode, Role, RoleFamily, RoleInfo, SessionMode};
