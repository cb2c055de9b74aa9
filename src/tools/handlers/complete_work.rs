// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `complete_work` tool handler, called by a worker when its task or
//! review is done.

use async_trait::async_trait;
use serde::Deserialize;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::api::{CompleteRequest, Relay};
use crate::error::ToolError;
use crate::protocol::{CompletionMode, FeedbackCategories};
use crate::tools::parse_arguments;
use crate::tools::registry::{ToolHandler, ToolOutput};
use crate::types::{InputSchema, ToolDefinition};

use super::{parse_role, role_names};

pub struct CompleteWorkHandler {
    relay: Relay,
}

impl CompleteWorkHandler {
    pub fn new(relay: Relay) -> Self {
        Self { relay }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteArgs {
    mode: String,
    role: String,
    response: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    feedback: FeedbackCategories,
    task_number: Option<u32>,
}

impl CompleteArgs {
    fn into_request(self) -> Result<CompleteRequest, ToolError> {
        let mode: CompletionMode = self
            .mode
            .parse()
            .map_err(|e| ToolError::InvalidInput(format!("mode: {e}")))?;
        Ok(CompleteRequest {
            mode,
            role: parse_role("role", &self.role)?,
            response: self.response,
            branch: self.branch,
            feedback: self.feedback,
            task_number: self.task_number,
        })
    }
}

#[async_trait]
impl ToolHandler for CompleteWorkHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "complete_work",
            "Report that your current task or review is finished. Writes your response for the \
             requester and records your feedback; at least one feedback item is required.",
        )
        .with_schema(
            InputSchema::new()
                .with_property("mode", serde_json::json!({
                    "type": "string",
                    "enum": ["task", "review"],
                    "description": "Whether this completes a task or a review"
                }))
                .with_property("role", serde_json::json!({
                    "type": "string",
                    "enum": role_names(),
                    "description": "Your own role"
                }))
                .with_property("response", serde_json::json!({
                    "type": "string",
                    "description": "Result for the requester"
                }))
                .with_property("branch", serde_json::json!({
                    "type": "string",
                    "description": "Branch you worked on (default: the current branch)"
                }))
                .with_property("feedback", serde_json::json!({
                    "type": "object",
                    "description": "Feedback grouped by category, e.g. {\"blockers\": [\"...\"], \"tooling\": [\"...\"]}",
                    "additionalProperties": {"type": "array", "items": {"type": "string"}}
                }))
                .with_property("taskNumber", serde_json::json!({
                    "type": "integer",
                    "description": "Request number to answer (default: your current task)"
                }))
                .with_required(&["mode", "role", "response", "feedback"]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self, input), fields(role)))]
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let request = parse_arguments::<CompleteArgs>(&input)?.into_request()?;

        #[cfg(feature = "telemetry")]
        tracing::Span::current().record("role", request.role.as_str());

        let receipt = self.relay.complete_work(&request)?;
        let metadata = serde_json::to_value(&receipt)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::structured(receipt.summary(), true, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DelegateRequest;
    use crate::config::ResolvedConfig;
    use crate::workspace::Role;
    use serde_json::json;
    use tempfile::TempDir;

    fn relay(temp: &TempDir) -> Relay {
        let mut config = ResolvedConfig::default();
        config.root = temp.path().to_path_buf();
        Relay::new(config, "main")
    }

    #[tokio::test]
    async fn test_complete_through_tool() {
        let temp = TempDir::new().unwrap();
        let relay = relay(&temp);
        relay
            .submit(&DelegateRequest::new(Role::Coordinator, Role::Reviewer, "Review auth", "Check login"))
            .unwrap();

        let output = CompleteWorkHandler::new(relay)
            .execute(json!({
                "mode": "review",
                "role": "reviewer",
                "response": "Looks good",
                "feedback": {"notes": ["clear diff"]}
            }))
            .await
            .unwrap();
        assert!(output.is_success());
        assert!(output.content().contains("#0001"));
        assert_eq!(output.metadata().unwrap()["feedbackItems"], 1);
    }

    #[tokio::test]
    async fn test_bad_mode_rejected() {
        let temp = TempDir::new().unwrap();
        let err = CompleteWorkHandler::new(relay(&temp))
            .execute(json!({
                "mode": "vacation",
                "role": "reviewer",
                "response": "x",
                "feedback": {"notes": ["y"]}
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(ref m) if m.starts_with("mode")));
    }

    #[tokio::test]
    async fn test_missing_feedback_is_explained() {
        let temp = TempDir::new().unwrap();
        let relay = relay(&temp);
        relay
            .submit(&DelegateRequest::new(Role::Coordinator, Role::Reviewer, "Review auth", "Check login"))
            .unwrap();
        let err = CompleteWorkHandler::new(relay)
            .execute(json!({
                "mode": "review",
                "role": "reviewer",
                "response": "Looks good"
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Delegation(_)));
    }
}
