// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `delegate` tool handler.
//!
//! Writes a request for the target role and blocks until its response
//! arrives, the host gives up on it, or the timeout passes.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::api::{DelegateRequest, Relay};
use crate::error::ToolError;
use crate::tools::parse_arguments;
use crate::tools::registry::{ToolHandler, ToolOutput};
use crate::types::{InputSchema, ToolDefinition};

use super::{parse_role, role_names};

pub struct DelegateHandler {
    relay: Relay,
}

impl DelegateHandler {
    pub fn new(relay: Relay) -> Self {
        Self { relay }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegateArgs {
    sender: String,
    target: String,
    title: String,
    content: String,
    #[serde(default)]
    branch: String,
    feature_id: Option<String>,
    task_id: Option<String>,
    #[serde(default)]
    reset_memory: bool,
    timeout_secs: Option<u64>,
}

impl DelegateArgs {
    fn into_request(self) -> Result<DelegateRequest, ToolError> {
        let sender = parse_role("sender", &self.sender)?;
        let target = parse_role("target", &self.target)?;
        let mut request = DelegateRequest::new(sender, target, self.title, self.content).branch(self.branch);
        request.feature_id = self.feature_id.filter(|s| !s.trim().is_empty());
        request.task_id = self.task_id.filter(|s| !s.trim().is_empty());
        request.reset_memory = self.reset_memory;
        request.timeout = self.timeout_secs.map(Duration::from_secs);
        Ok(request)
    }
}

#[async_trait]
impl ToolHandler for DelegateHandler {
    fn definition(&self) -> ToolDefinition {
        let roles = role_names();
        ToolDefinition::new(
            "delegate",
            "Delegate a task to another role and wait for its response. Calls without a taskId are \
             ad-hoc and are rejected while the target is busy with another task; tracked calls are \
             queued behind it.",
        )
        .with_schema(
            InputSchema::new()
                .with_property("sender", serde_json::json!({
                    "type": "string",
                    "enum": roles,
                    "description": "Your own role"
                }))
                .with_property("target", serde_json::json!({
                    "type": "string",
                    "enum": roles,
                    "description": "Role that should do the work"
                }))
                .with_property("title", serde_json::json!({
                    "type": "string",
                    "description": "Short task title, used in the request file name"
                }))
                .with_property("content", serde_json::json!({
                    "type": "string",
                    "description": "Full task description"
                }))
                .with_property("branch", serde_json::json!({
                    "type": "string",
                    "description": "Branch to work on (default: your branch; must match it for branch-scoped roles)"
                }))
                .with_property("featureId", serde_json::json!({
                    "type": "string",
                    "description": "Feature this task belongs to"
                }))
                .with_property("taskId", serde_json::json!({
                    "type": "string",
                    "description": "External task id; repeated calls with the same id are deduplicated"
                }))
                .with_property("resetMemory", serde_json::json!({
                    "type": "boolean",
                    "description": "Start the target with a fresh conversation (default: false)"
                }))
                .with_property("timeoutSecs", serde_json::json!({
                    "type": "integer",
                    "minimum": 1,
                    "description": "How long to wait for the response (default: configured timeout)"
                }))
                .with_required(&["sender", "target", "title", "content"]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self, input), fields(target, task_id)))]
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let request = parse_arguments::<DelegateArgs>(&input)?.into_request()?;

        #[cfg(feature = "telemetry")]
        {
            let span = tracing::Span::current();
            span.record("target", request.target.as_str());
            if let Some(task_id) = &request.task_id {
                span.record("task_id", task_id.as_str());
            }
        }

        let outcome = self.relay.delegate(request).await?;
        let metadata = serde_json::to_value(&outcome)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::structured(outcome.summary(), true, metadata))
    }
}
