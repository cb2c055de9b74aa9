// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool handlers over the delegation API.
//!
//! Each handler wraps a [`Relay`](crate::api::Relay) bound to the calling
//! agent's branch and renders its result as explanatory text.

mod complete_work;
mod delegate;
mod workers;

pub use complete_work::CompleteWorkHandler;
pub use delegate::DelegateHandler;
pub use workers::{ListWorkersHandler, TerminateWorkerHandler};

use crate::error::ToolError;
use crate::workspace::Role;

/// Parse a role argument, naming the field in the error.
fn parse_role(field: &str, value: &str) -> Result<Role, ToolError> {
    value
        .parse()
        .map_err(|e| ToolError::InvalidInput(format!("{field}: {e}")))
}

fn role_names() -> Vec<&'static str> {
    Role::ALL.iter().map(|r| r.as_str()).collect()
}
