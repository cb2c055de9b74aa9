// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool registry and handler trait.
//!
//! - [`ToolHandler`] trait that every relay tool implements
//! - [`ToolRegistry`] for listing and dispatching tool calls
//! - [`ToolOutput`] for returning results from tool execution

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::api::Relay;
use crate::error::ToolError;
use crate::telemetry::Metrics;
use crate::types::ToolDefinition;

use super::handlers::{CompleteWorkHandler, DelegateHandler, ListWorkersHandler, TerminateWorkerHandler};

/// Output from executing a tool.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text {
        content: String,
        success: bool,
    },
    /// Text plus a machine-readable copy of the result.
    Structured {
        content: String,
        success: bool,
        metadata: Option<serde_json::Value>,
    },
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            success: true,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            success: false,
        }
    }

    pub fn structured(content: impl Into<String>, success: bool, metadata: serde_json::Value) -> Self {
        Self::Structured {
            content: content.into(),
            success,
            metadata: Some(metadata),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Text { content, .. } => content,
            Self::Structured { content, .. } => content,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Self::Text { success, .. } => *success,
            Self::Structured { success, .. } => *success,
        }
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Text { .. } => None,
            Self::Structured { metadata, .. } => metadata.as_ref(),
        }
    }

    /// Truncated content for log lines.
    pub fn log_preview(&self, max_bytes: usize) -> String {
        let content = self.content();
        if content.len() <= max_bytes {
            return content.to_string();
        }
        let mut end = max_bytes;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &content[..end])
    }
}

impl From<ToolError> for ToolOutput {
    fn from(err: ToolError) -> Self {
        Self::error(err.to_string())
    }
}

/// A tool callable by another agent.
///
/// ```rust,ignore
/// struct Ping;
///
/// #[async_trait]
/// impl ToolHandler for Ping {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition::new("ping", "Check the relay is up")
///     }
///
///     async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput, ToolError> {
///         Ok(ToolOutput::success("pong"))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Returns true if the tool writes messages or stops processes.
    fn is_mutating(&self) -> bool {
        false
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Maps tool names to handlers.
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
    metrics: Option<Arc<Metrics>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            metrics: None,
        }
    }

    /// The relay tools (`delegate`, `complete_work`, `list_workers`,
    /// `terminate_worker`) bound to one caller.
    pub fn for_relay(relay: Relay) -> Self {
        let metrics = Arc::clone(relay.metrics());
        let mut builder = ToolRegistryBuilder::new();
        builder.register(DelegateHandler::new(relay.clone()));
        builder.register(CompleteWorkHandler::new(relay.clone()));
        builder.register(ListWorkersHandler::new(relay.clone()));
        builder.register(TerminateWorkerHandler::new(relay));
        builder.with_metrics(metrics);
        builder.build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// All handlers, sorted by tool name.
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn ToolHandler>> {
        self.handlers.values()
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.values().map(|h| h.definition()).collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Run a tool call.
    ///
    /// Only an unknown tool is an `Err`; a failing tool comes back as a
    /// [`DispatchResult`] with `is_error` set and the error text as output.
    pub async fn dispatch(&self, tool_name: &str, input: serde_json::Value) -> Result<DispatchResult, ToolError> {
        let handler = self
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        debug!(tool = %tool_name, "Executing tool");
        let start = Instant::now();

        #[cfg(feature = "telemetry")]
        let result = tracing::Instrument::instrument(
            handler.execute(input),
            tracing::info_span!("tool_execute", tool = %tool_name),
        )
        .await;

        #[cfg(not(feature = "telemetry"))]
        let result = handler.execute(input).await;

        let duration = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(&format!("tool.{tool_name}"), duration);
        }

        let (output, is_error) = match result {
            Ok(output) => {
                let is_error = !output.is_success();
                (output, is_error)
            }
            Err(err) => {
                debug!(tool = %tool_name, error = %err, "Tool execution failed");
                (ToolOutput::from(err), true)
            }
        };
        debug!(
            tool = %tool_name,
            duration_ms = duration.as_secs_f64() * 1000.0,
            is_error,
            preview = %output.log_preview(200),
            "Tool finished"
        );

        Ok(DispatchResult {
            tool_name: tool_name.to_string(),
            output,
            duration,
            is_error,
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of dispatching a tool call.
#[derive(Debug)]
pub struct DispatchResult {
    pub tool_name: String,
    pub output: ToolOutput,
    pub duration: Duration,
    pub is_error: bool,
}

/// Builder for constructing a ToolRegistry.
pub struct ToolRegistryBuilder {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
    metrics: Option<Arc<Metrics>>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            metrics: None,
        }
    }

    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) -> &mut Self {
        let def = handler.definition();
        self.handlers.insert(def.name, Arc::new(handler));
        self
    }

    /// Record each call's duration as `tool.<name>`.
    pub fn with_metrics(&mut self, metrics: Arc<Metrics>) -> &mut Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            handlers: self.handlers,
            metrics: self.metrics,
        }
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
