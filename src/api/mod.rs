// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool-facing delegation API.
//!
//! [`Relay`] is the boundary other agents call through (directly, via the
//! CLI, or via MCP tools):
//!
//! - [`Relay::delegate`]: hand work to another role and wait for the answer
//! - [`Relay::complete_work`]: a worker reports its own completion
//! - [`Relay::list_workers`] / [`Relay::terminate_worker`]: operational
//!   visibility
//!
//! Every error renders as an explanatory sentence so the calling agent can
//! decide whether to retry, wait or escalate.

pub mod admin;
pub mod complete;
pub mod delegate;

use std::path::Path;
use std::sync::Arc;

use crate::config::ResolvedConfig;
use crate::error::DelegationError;
use crate::telemetry::Metrics;
use crate::workspace::{sanitize_branch, Role, Workspace};

pub use admin::{TerminateOutcome, WorkerSummary};
pub use complete::{CompleteRequest, CompletionReceipt};
pub use delegate::{DelegateOutcome, DelegateRequest, DelegateStatus, Submission};

/// Entry point for the delegation API, bound to the caller's branch.
#[derive(Debug, Clone)]
pub struct Relay {
    config: Arc<ResolvedConfig>,
    branch: String,
    metrics: Arc<Metrics>,
}

impl Relay {
    pub fn new(config: ResolvedConfig, branch: impl Into<String>) -> Self {
        Self {
            config: Arc::new(config),
            branch: branch.into(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// The caller's branch.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Resolve `role`'s workspace for a requested branch.
    ///
    /// An empty request means the caller's branch. Branch-scoped roles must
    /// stay on the caller's branch.
    pub fn workspace_for(&self, role: Role, requested: &str) -> Result<Workspace, DelegationError> {
        let requested = requested.trim();
        if requested.is_empty() {
            return Ok(Workspace::resolve(self.root(), role, &self.branch));
        }
        if !role.is_branch_agnostic() && sanitize_branch(requested) != sanitize_branch(&self.branch) {
            return Err(DelegationError::BranchMismatch {
                caller: self.branch.clone(),
                requested: requested.to_string(),
            });
        }
        Ok(Workspace::resolve(self.root(), role, requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay() -> Relay {
        let mut config = ResolvedConfig::default();
        config.root = "/relay".into();
        Relay::new(config, "feature/x")
    }

    #[test]
    fn test_workspace_for_defaults_to_caller_branch() {
        let ws = relay().workspace_for(Role::Reviewer, "").unwrap();
        assert_eq!(ws.scope(), "feature-x");
    }

    #[test]
    fn test_equivalent_branch_names_match() {
        let ws = relay().workspace_for(Role::Reviewer, "feature-x").unwrap();
        assert_eq!(ws.key(), "reviewer@feature-x");
    }

    #[test]
    fn test_branch_mismatch_rejected() {
        let err = relay().workspace_for(Role::BackendEngineer, "main").unwrap_err();
        assert!(matches!(err, DelegationError::BranchMismatch { .. }));
        // Branch-agnostic roles accept any branch.
        assert!(relay().workspace_for(Role::DevopsEngineer, "main").is_ok());
    }
}
