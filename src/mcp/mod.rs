// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model Context Protocol server exposing the relay tools.
//!
//! An agent's MCP client starts `taskrelay mcp` and talks JSON-RPC 2.0 over
//! its stdio, one message per line:
//!
//! ```text
//! agent ──stdin──▶ McpServer ──▶ ToolRegistry ──▶ Relay
//!       ◀─stdout──            (delegate, complete_work, list_workers, terminate_worker)
//! ```
//!
//! Logging goes to stderr; stdout carries protocol messages only.

pub mod error;
pub mod server;
pub mod types;

pub use error::McpError;
pub use server::McpServer;
pub use types::*;
