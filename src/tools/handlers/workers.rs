// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Administrative tools: `list_workers` and `terminate_worker`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::api::{Relay, WorkerSummary};
use crate::error::ToolError;
use crate::tools::parse_arguments;
use crate::tools::registry::{ToolHandler, ToolOutput};
use crate::types::{InputSchema, ToolDefinition};

pub struct ListWorkersHandler {
    relay: Relay,
}

impl ListWorkersHandler {
    pub fn new(relay: Relay) -> Self {
        Self { relay }
    }
}

fn describe(worker: &WorkerSummary) -> String {
    let pid = |pid: Option<u32>, alive: bool| match (pid, alive) {
        (Some(pid), true) => format!("pid {pid}"),
        (Some(pid), false) => format!("pid {pid} (dead)"),
        (None, _) => "none".to_string(),
    };
    let task = match (&worker.task_number, &worker.task_title) {
        (Some(n), Some(title)) => format!("#{n:04} {title}"),
        _ => "idle".to_string(),
    };
    format!(
        "{}: host {}, worker {}, task {}",
        worker.id,
        pid(worker.host_pid, worker.host_alive),
        pid(worker.worker_pid, worker.worker_alive),
        task
    )
}

#[async_trait]
impl ToolHandler for ListWorkersHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "list_workers",
            "List every workspace with a running host, a worker or a task on record.",
        )
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let workers = self.relay.list_workers().map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        let content = if workers.is_empty() {
            "No workers found.".to_string()
        } else {
            workers.iter().map(describe).collect::<Vec<_>>().join("\n")
        };
        let metadata = serde_json::to_value(&workers)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::structured(content, true, metadata))
    }
}

pub struct TerminateWorkerHandler {
    relay: Relay,
}

impl TerminateWorkerHandler {
    pub fn new(relay: Relay) -> Self {
        Self { relay }
    }
}

#[derive(Debug, Deserialize)]
struct TerminateArgs {
    id: String,
}

#[async_trait]
impl ToolHandler for TerminateWorkerHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "terminate_worker",
            "Stop a worker process: interrupt first, kill after the grace period.",
        )
        .with_schema(
            InputSchema::new()
                .with_property("id", serde_json::json!({
                    "type": "string",
                    "description": "Worker id as `role@branch`, or `role` for your branch and shared roles"
                }))
                .with_required(&["id"]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: TerminateArgs = parse_arguments(&input)?;
        let outcome = self.relay.terminate_worker(args.id.trim()).await?;
        Ok(ToolOutput::success(outcome.summary()))
    }
}
