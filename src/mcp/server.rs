// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP server over newline-delimited JSON-RPC.
//!
//! `tools/call` requests run as background tasks so a long `delegate` wait
//! does not block `ping` or a second call. Responses go through a single
//! writer task, one line each. When the input closes, calls still in flight
//! are aborted: nobody is left to read their results.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::ToolError;
use crate::tools::ToolRegistry;

use super::error::McpError;
use super::types::{
    encode, JsonRpcRequest, JsonRpcResponse, McpContent, McpToolResult, ToolCallParams,
    DEFAULT_PROTOCOL_VERSION, JSONRPC_VERSION,
};

const SERVER_NAME: &str = "taskrelay";

const INSTRUCTIONS: &str = "Hand work to other agent roles with `delegate` and wait for their \
    answer. When you finish a task or review you were given, call `complete_work` with your \
    response and feedback.";

pub struct McpServer {
    registry: ToolRegistry,
}

enum ServeEvent {
    Line(std::io::Result<Option<String>>),
    CallDone(Result<(), JoinError>),
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Serve on the process's stdin and stdout.
    pub async fn serve_stdio(self) -> Result<(), McpError> {
        Arc::new(self).serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until `reader` reaches end of input.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<(), McpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let mut lines = BufReader::new(reader).lines();
        let mut calls = JoinSet::new();
        info!("MCP server listening on stdio");

        loop {
            let event = tokio::select! {
                line = lines.next_line() => ServeEvent::Line(line),
                Some(done) = calls.join_next(), if !calls.is_empty() => ServeEvent::CallDone(done),
            };

            let line = match event {
                ServeEvent::CallDone(Err(e)) if e.is_panic() => {
                    error!(error = %e, "Tool call panicked");
                    continue;
                }
                ServeEvent::CallDone(_) => continue,
                ServeEvent::Line(Ok(Some(line))) => line,
                ServeEvent::Line(Ok(None)) => break,
                ServeEvent::Line(Err(e)) => {
                    calls.abort_all();
                    return Err(e.into());
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let request = match parse_line(&line) {
                Ok(request) => request,
                Err((id, err)) => {
                    debug!(error = %err, "Rejected message");
                    send(&tx, &JsonRpcResponse::failure(id, err.to_rpc_error()));
                    continue;
                }
            };

            if request.method == "tools/call" && !request.is_notification() {
                let server = Arc::clone(&self);
                let tx = tx.clone();
                calls.spawn(async move {
                    if let Some(response) = server.respond(request).await {
                        send(&tx, &response);
                    }
                });
            } else if let Some(response) = self.respond(request).await {
                send(&tx, &response);
            }
        }

        if !calls.is_empty() {
            warn!(in_flight = calls.len(), "Input closed; aborting pending tool calls");
            calls.abort_all();
            while calls.join_next().await.is_some() {}
        }
        drop(tx);
        match writer_task.await {
            Ok(result) => result.map_err(McpError::from),
            Err(e) => Err(McpError::Io(std::io::Error::other(e))),
        }
    }

    /// Handle one request. Notifications never get a response.
    pub async fn respond(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let result = self.handle(&request).await;
        let Some(id) = request.id else {
            if let Err(e) = result {
                debug!(method = %request.method, error = %e, "Notification failed");
            }
            return None;
        };
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::failure(id, e.to_rpc_error()),
        })
    }

    async fn handle(&self, request: &JsonRpcRequest) -> Result<Value, McpError> {
        match request.method.as_str() {
            "initialize" => Ok(self.initialize(request.params.as_ref())),
            "notifications/initialized" => {
                info!("MCP client initialized");
                Ok(Value::Null)
            }
            "notifications/cancelled" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.params.clone()).await,
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        if let Some(client) = params.and_then(|p| p.get("clientInfo")) {
            debug!(%client, protocol_version, "MCP initialize");
        }
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": crate::VERSION},
            "instructions": INSTRUCTIONS,
        })
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self
            .registry
            .handlers()
            .map(|handler| {
                let def = handler.definition();
                json!({
                    "name": def.name,
                    "description": def.description,
                    "inputSchema": def.input_schema,
                    "annotations": {"readOnlyHint": !handler.is_mutating()},
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params: ToolCallParams = params
            .ok_or_else(|| McpError::InvalidParams("tools/call requires params".to_string()))
            .and_then(|p| serde_json::from_value(p).map_err(|e| McpError::InvalidParams(e.to_string())))?;

        let dispatched = match self.registry.dispatch(&params.name, params.arguments).await {
            Ok(dispatched) => dispatched,
            Err(ToolError::NotFound(name)) => return Err(McpError::ToolNotFound(name)),
            Err(e) => return Err(McpError::InvalidParams(e.to_string())),
        };

        let result = McpToolResult {
            content: vec![McpContent::Text {
                text: dispatched.output.content().to_string(),
            }],
            is_error: dispatched.is_error,
            structured_content: dispatched.output.metadata().filter(|m| m.is_object()).cloned(),
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Parse one input line. On failure, returns the id to answer with.
fn parse_line(line: &str) -> Result<JsonRpcRequest, (Value, McpError)> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| (Value::Null, McpError::Parse(e.to_string())))?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| (id.clone(), McpError::InvalidRequest(e.to_string())))?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err((
            id,
            McpError::InvalidRequest(format!("unsupported jsonrpc version {:?}", request.jsonrpc)),
        ));
    }
    Ok(request)
}

fn send(tx: &mpsc::UnboundedSender<String>, response: &JsonRpcResponse) {
    match encode(response) {
        Ok(line) => {
            if tx.send(line).is_err() {
                warn!("Output closed; dropping response");
            }
        }
        Err(e) => error!(error = %e, "Failed to encode response"),
    }
}
