// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker hosts.
//!
//! A host owns one (role, branch) workspace: it waits for requests,
//! launches and supervises the worker, and reports each state change.
//!
//! - [`worker_host`]: the state machine and its event loop
//! - [`command`]: worker command templates
//! - [`prompt`]: system prompt and launch messages
//! - [`session`]: session registry and `.session-id`
//! - [`input`]: terminal commands (manual control)
//! - [`heartbeat`]: keep-alive for idle conversations
//! - [`state`]: host states and status lines

pub mod command;
pub mod heartbeat;
pub mod input;
pub mod prompt;
pub mod session;
pub mod state;
pub mod worker_host;

pub use command::{worker_launch, LaunchContext};
pub use heartbeat::{send_heartbeat, Heartbeat, HeartbeatOutcome};
pub use input::{parse_command, InputCommand, InputListener};
pub use prompt::{compose_system_prompt, recovery_message, task_message, write_system_prompt};
pub use session::{SessionIdentity, SessionInfo, SessionRegistry};
pub use state::{announce, status_line, HostState, StatusKind};
pub use worker_host::{HostOptions, WorkerHost};
