// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tools other agents call to delegate work and report completion.
//!
//! - [`ToolHandler`] trait - one implementation per tool
//! - [`ToolRegistry`] - maps tool names to handlers, dispatches calls
//! - Individual handlers in the [`handlers`] module, each a thin wrapper
//!   over [`Relay`](crate::api::Relay)
//!
//! ```rust,ignore
//! use taskrelay::tools::ToolRegistry;
//!
//! let registry = ToolRegistry::for_relay(relay);
//! let result = registry.dispatch("list_workers", json!({})).await?;
//! ```

pub mod handlers;
pub mod registry;

pub use handlers::*;
pub use registry::{DispatchResult, ToolHandler, ToolOutput, ToolRegistry, ToolRegistryBuilder};

use serde::Deserialize;
use crate::error::ToolError;

/// Parse JSON arguments into a typed struct.
pub fn parse_arguments<T>(arguments: &serde_json::Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(arguments.clone())
        .map_err(|err| ToolError::InvalidInput(format!("Failed to parse arguments: {err}")))
}
