// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! taskrelay - file-based task delegation between long-running agent
//! processes.
//!
//! Every agent role runs under a worker host bound to one branch. Agents
//! hand each other work by writing numbered request files into a shared
//! messages directory; the target's host notices the request, launches its
//! worker, keeps it healthy, and returns to idle once the worker writes the
//! matching response.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - [`workspace`] - roles and the per-(role, branch) directory layout
//! - [`protocol`] - message files, task numbering, descriptors, feedback, workflow log
//! - [`process`] - process launching, signals, liveness markers, file watching, git probe
//! - [`health`] - activity probes, restart policy, worker supervision
//! - [`host`] - the worker-host state machine
//! - [`api`] - `delegate`, `complete_work` and worker administration
//! - [`tools`] / [`mcp`] - the API as callable tools over MCP stdio
//! - [`config`], [`telemetry`], [`error`] - ambient concerns
//!
//! # Example
//!
//! ```rust,ignore
//! use taskrelay::api::{DelegateRequest, Relay};
//! use taskrelay::workspace::Role;
//!
//! let relay = Relay::new(config, "feature/login");
//! let outcome = relay
//!     .delegate(DelegateRequest::new(Role::Coordinator, Role::BackendEngineer, "Add endpoint", "GET /health"))
//!     .await?;
//! println!("{}", outcome.summary());
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod host;
pub mod mcp;
pub mod process;
pub mod protocol;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod workspace;

// Re-export commonly used types at crate root
pub use api::{DelegateOutcome, DelegateRequest, Relay};
pub use config::{load_config, CliOptions, ResolvedConfig};
pub use error::{ConfigError, DelegationError, HealthError, HostError, ProtocolError, Result, ToolError, WorkspaceError};
pub use host::{HostOptions, WorkerHost};
pub use workspace::{Role, Workspace};

/// taskrelay version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
