// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for taskrelay.
//!
//! This module provides strongly-typed errors for each subsystem, using
//! `thiserror` for ergonomic definitions and `anyhow` for propagation at
//! the binary edge.
//!
//! Recoverable conditions that are part of normal operation (a stale
//! liveness marker, a malformed descriptor) are modelled as values, not
//! errors. See [`crate::process::LivenessState`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving roles and workspaces.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("Unknown role: {0}")]
    InvalidRole(String),

    #[error("Invalid branch name: {0:?}")]
    InvalidBranch(String),
}

/// Errors from the file-based delegation protocol.
///
/// Anything that could corrupt shared state (counter increments, request or
/// response creation) surfaces here and is never swallowed.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt task counter {path}: {content:?}")]
    CorruptCounter { path: PathBuf, content: String },

    #[error("Message file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Invalid message file name: {0}")]
    InvalidFileName(String),

    #[error("Missing or malformed header in {0}")]
    MalformedHeader(PathBuf),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Attach a path to an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the tool-facing delegation API.
///
/// Every variant renders as an explanatory sentence so a calling agent can
/// decide whether to retry, wait, or escalate.
#[derive(Error, Debug)]
pub enum DelegationError {
    #[error("{0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("A role cannot delegate to itself ({0})")]
    SelfDelegation(String),

    #[error(
        "{target} is busy with task {active_task} ({active_title}). \
         Retry later or delegate with a tracked task id to queue the request."
    )]
    WorkspaceBusy {
        target: String,
        active_task: String,
        active_title: String,
    },

    #[error(
        "Branch mismatch: caller is on {caller:?} but the request targets {requested:?}. \
         Refusing to write into another branch's workspace."
    )]
    BranchMismatch { caller: String, requested: String },

    #[error("No response to request {request_number:04} from {target} after {waited_secs}s")]
    ResponseTimeout {
        target: String,
        request_number: u32,
        waited_secs: u64,
    },

    #[error(
        "The {target} host gave up on request {request_number:04} \
         (restart budget exhausted or time limit reached). See the workflow log."
    )]
    Abandoned { target: String, request_number: u32 },

    #[error("No active task found for {0}")]
    NoActiveTask(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),
}

impl DelegationError {
    /// Whether the caller can reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::WorkspaceBusy { .. } | Self::ResponseTimeout { .. }
        )
    }
}

/// Errors produced by the health-monitoring engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("Worker for {role} exhausted its restart budget ({restarts} restarts)")]
    WorkerExhaustedRestarts { role: String, restarts: u32 },

    #[error("Subordinate host {role}@{branch} crashed (pid {pid} is gone)")]
    SubordinateHostCrashed {
        role: String,
        branch: String,
        pid: u32,
    },
}

/// Errors from the worker-host state machine.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("{0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Health(#[from] HealthError),

    #[error("Another host for {role}@{branch} is already running (pid {pid})")]
    AlreadyRunning {
        role: String,
        branch: String,
        pid: u32,
    },

    #[error("Failed to launch worker: {0}")]
    Launch(String),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from filesystem change notification.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to watch directory: {0}")]
    Notify(#[from] notify::Error),

    #[error("Invalid watch pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("Failed to create watched directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),

    #[error("Config file already exists: {0}")]
    AlreadyExists(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors that can occur during tool execution.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Delegation(#[from] DelegationError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
