// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `delegate`: hand work to another role and wait for its response.
//!
//! Delegation is split in two steps. [`Relay::submit`] validates the call
//! and writes (or finds) the request file; [`Relay::await_response`] waits
//! for the matching response file without polling the worker.
//!
//! Duplicate policy for tracked tasks (calls carrying a task id):
//!
//! - latest request for the id still unanswered: monitor it, write nothing
//! - otherwise: write a new request with the attempt counter incremented
//!
//! Busy policy when the target's descriptor names a different task:
//!
//! - ad-hoc call (no task id): rejected with [`DelegationError::WorkspaceBusy`]
//!   unless `delegation.rejectAdhocWhenBusy` is off
//! - tracked call: queued; the descriptor is left to the target's host
//!
//! Both checks and the writes that follow run under the messages
//! directory's submission lock, so concurrent callers never both see an
//! idle target or both create a request for the same task id.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use tracing::{debug, info, warn};

use crate::error::DelegationError;
use crate::host::SessionIdentity;
use crate::process::FileWatcher;
use crate::protocol::{MessageStore, NewRequest, TaskDescriptor, WorkflowEvent, WorkflowLog};
use crate::telemetry::Counter;
use crate::workspace::{Role, Workspace};

use super::Relay;

/// Arguments of a `delegate` call.
#[derive(Debug, Clone)]
pub struct DelegateRequest {
    pub sender: Role,
    pub target: Role,
    pub title: String,
    pub content: String,
    /// Branch the target should work on; empty means the caller's branch.
    pub branch: String,
    pub feature_id: Option<String>,
    /// External task id. `None` makes the call ad-hoc.
    pub task_id: Option<String>,
    /// Start the target (and, on a task's first attempt, its reviewer)
    /// with a fresh conversation.
    pub reset_memory: bool,
    /// Overrides the configured response timeout.
    pub timeout: Option<Duration>,
}

impl DelegateRequest {
    pub fn new(sender: Role, target: Role, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender,
            target,
            title: title.into(),
            content: content.into(),
            branch: String::new(),
            feature_id: None,
            task_id: None,
            reset_memory: false,
            timeout: None,
        }
    }

    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn feature_id(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

/// How a request was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelegateStatus {
    /// New request; the target was idle and its descriptor was written.
    Created,
    /// New request behind the target's current task.
    Queued,
    /// An unanswered request for the same task id already existed.
    MonitoringExisting,
}

/// A request that has been written or found, ready to be awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub workspace: Workspace,
    pub request_number: u32,
    pub request_path: PathBuf,
    pub attempt: u32,
    pub status: DelegateStatus,
}

/// Result of a completed delegation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateOutcome {
    pub target: Role,
    pub request_number: u32,
    pub request_path: PathBuf,
    pub response_path: PathBuf,
    pub attempt: u32,
    pub status: DelegateStatus,
    pub response: String,
    pub waited_secs: u64,
}

impl DelegateOutcome {
    /// Human-readable summary followed by the response body.
    pub fn summary(&self) -> String {
        let how = match self.status {
            DelegateStatus::Created => "completed",
            DelegateStatus::Queued => "completed after waiting in the queue",
            DelegateStatus::MonitoringExisting => "completed (an earlier request for this task was already in flight)",
        };
        format!(
            "{} {how} request #{:04} (attempt {}) after {}s.\n\n{}",
            self.target, self.request_number, self.attempt, self.waited_secs, self.response
        )
    }
}

impl Relay {
    /// Delegate and wait for the response.
    #[cfg_attr(
        feature = "telemetry",
        instrument(skip(self, request), fields(sender = %request.sender, target = %request.target))
    )]
    pub async fn delegate(&self, request: DelegateRequest) -> Result<DelegateOutcome, DelegationError> {
        let timeout = request.timeout.unwrap_or_else(|| self.config().timing.response_timeout());
        let submission = self.submit(&request)?;
        self.await_response(&submission, timeout).await
    }

    /// Validate a delegation and write or find its request file.
    ///
    /// Nothing is written when validation fails.
    pub fn submit(&self, request: &DelegateRequest) -> Result<Submission, DelegationError> {
        if request.sender == request.target {
            return Err(DelegationError::SelfDelegation(request.sender.to_string()));
        }
        if request.title.trim().is_empty() {
            return Err(DelegationError::InvalidInput("title must not be empty".to_string()));
        }
        if request.content.trim().is_empty() {
            return Err(DelegationError::InvalidInput("content must not be empty".to_string()));
        }
        let task_id = header_id("taskId", request.task_id.as_deref())?;
        let feature_id = header_id("featureId", request.feature_id.as_deref())?;

        let workspace = self.workspace_for(request.target, &request.branch)?;
        let store = MessageStore::for_workspace(&workspace);
        let workflow = WorkflowLog::new(workspace.workflow_log());
        let target = request.target;

        let _lock = store.lock_submissions()?;

        let mut attempt = 1;
        if let Some(task_id) = task_id {
            let existing = store.requests_for_task(target, task_id)?;
            if let Some((header, entry)) = existing.last() {
                let number = header.request_number;
                let answered = store.find_response(target, number)?.is_some();
                if !answered && !store.is_abandoned(target, number) {
                    info!(task_id, number, "Monitoring existing request");
                    workflow.record(WorkflowEvent::MonitoringExisting, target, Some(number), task_id);
                    return Ok(Submission {
                        workspace,
                        request_number: number,
                        request_path: entry.path.clone(),
                        attempt: header.attempt,
                        status: DelegateStatus::MonitoringExisting,
                    });
                }
            }
            attempt = existing.len() as u32 + 1;
        }

        let task_file = workspace.task_file();
        let active = TaskDescriptor::load(&task_file)
            .filter(|current| task_id.map_or(true, |t| !current.is_same_task(t)));
        if let Some(ref current) = active {
            if task_id.is_none() && self.config().delegation.reject_adhoc_when_busy {
                return Err(DelegationError::WorkspaceBusy {
                    target: workspace.key(),
                    active_task: current.task_id.clone(),
                    active_title: current.task_title.clone(),
                });
            }
        }
        let status = if active.is_some() {
            DelegateStatus::Queued
        } else {
            DelegateStatus::Created
        };

        if request.reset_memory {
            if status == DelegateStatus::Created {
                self.reset_memory(&workspace, attempt);
            } else {
                warn!(target = %workspace.key(), "Target is busy; keeping its conversation");
            }
        }

        let (header, path) = store.create_request(&NewRequest {
            from: request.sender,
            to: target,
            title: request.title.trim(),
            body: &request.content,
            feature_id,
            task_id,
            attempt,
        })?;
        let number = header.request_number;
        self.metrics().increment(Counter::RequestsCreated);

        if status == DelegateStatus::Created {
            let descriptor = TaskDescriptor {
                task_number: number,
                request_file_path: path.clone(),
                started_at: header.timestamp,
                attempt,
                feature_id: header.feature_id.clone(),
                task_id: task_id
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("adhoc-{number:04}")),
                task_title: header.title.clone(),
                sender_role: request.sender,
            };
            descriptor.save(&task_file)?;
        }

        let event = match status {
            DelegateStatus::Queued => WorkflowEvent::Queued,
            _ => WorkflowEvent::Delegated,
        };
        workflow.record(
            event,
            target,
            Some(number),
            &format!("from {} attempt {attempt}: {}", request.sender, header.title),
        );
        info!(target = %workspace.key(), number, attempt, ?status, "Request written");

        Ok(Submission {
            workspace,
            request_number: number,
            request_path: path,
            attempt,
            status,
        })
    }

    /// Wait for the response to a submitted request.
    ///
    /// Returns early with [`DelegationError::Abandoned`] when the target's
    /// host gives up on the request. On timeout the request is marked
    /// abandoned and the target's descriptor cleared if it still names it.
    pub async fn await_response(
        &self,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<DelegateOutcome, DelegationError> {
        let workspace = &submission.workspace;
        let target = workspace.role();
        let number = submission.request_number;
        let store = MessageStore::for_workspace(workspace);
        let workflow = WorkflowLog::new(workspace.workflow_log());
        let started = Instant::now();
        self.metrics().increment(Counter::Delegations);

        enum Waited {
            Response(PathBuf),
            Abandoned,
        }

        let pattern = format!("{number:04}.{target}.response.*.md");
        let mut watcher = FileWatcher::watch(&workspace.messages_dir(), &pattern)?;
        let recheck = self.config().timing.poll_interval();
        let waited = watcher
            .wait_for(Some(timeout), recheck, || {
                match store.find_response(target, number) {
                    Ok(Some(path)) => return Some(Waited::Response(path)),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Response scan failed"),
                }
                store.is_abandoned(target, number).then_some(Waited::Abandoned)
            })
            .await;
        let elapsed = started.elapsed();
        self.metrics().record_operation("delegate", elapsed);

        match waited {
            Some(Waited::Response(response_path)) => {
                let response = store.read_response_body(&response_path)?;
                clear_descriptor_for(workspace, number);
                Ok(DelegateOutcome {
                    target,
                    request_number: number,
                    request_path: submission.request_path.clone(),
                    response_path,
                    attempt: submission.attempt,
                    status: submission.status,
                    response,
                    waited_secs: elapsed.as_secs(),
                })
            }
            Some(Waited::Abandoned) => {
                clear_descriptor_for(workspace, number);
                Err(DelegationError::Abandoned {
                    target: workspace.key(),
                    request_number: number,
                })
            }
            None => {
                warn!(target = %workspace.key(), number, "Gave up waiting for response");
                workflow.record(
                    WorkflowEvent::Timeout,
                    target,
                    Some(number),
                    &format!("no response after {}s", timeout.as_secs()),
                );
                self.metrics().increment(Counter::Timeouts);
                if let Err(e) = store.mark_abandoned(target, number, "caller stopped waiting") {
                    warn!(error = %e, number, "Failed to mark request abandoned");
                }
                clear_descriptor_for(workspace, number);
                Err(DelegationError::ResponseTimeout {
                    target: workspace.key(),
                    request_number: number,
                    waited_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Forget the target's conversation, and its reviewer's on a task's
    /// first attempt.
    fn reset_memory(&self, workspace: &Workspace, attempt: u32) {
        let mut forget = vec![workspace.clone()];
        if attempt == 1 {
            if let Some(reviewer) = workspace.role().reviewer() {
                forget.push(workspace.peer(reviewer));
            }
        }
        for ws in forget {
            match SessionIdentity::for_workspace(&ws).clear() {
                Ok(true) => info!(key = %ws.key(), "Cleared remembered conversation"),
                Ok(false) => {}
                Err(e) => warn!(key = %ws.key(), error = %e, "Failed to clear session id"),
            }
        }
    }
}

/// A task or feature id as written into a request header.
///
/// Blank means absent. Ids that would break the header line or read back
/// as absent are rejected.
fn header_id<'a>(field: &str, value: Option<&'a str>) -> Result<Option<&'a str>, DelegationError> {
    let Some(id) = value.map(str::trim).filter(|id| !id.is_empty()) else {
        return Ok(None);
    };
    if id.chars().any(char::is_control) {
        return Err(DelegationError::InvalidInput(format!(
            "{field} must not contain control characters or line breaks"
        )));
    }
    if id.eq_ignore_ascii_case("none") || id.eq_ignore_ascii_case("null") {
        return Err(DelegationError::InvalidInput(format!(
            "{field} {id:?} is reserved; omit it instead"
        )));
    }
    Ok(Some(id))
}

/// Remove the target's descriptor if it still names request `number`.
pub(super) fn clear_descriptor_for(workspace: &Workspace, number: u32) {
    let _lock = match MessageStore::for_workspace(workspace).lock_submissions() {
        Ok(lock) => lock,
        Err(e) => {
            warn!(error = %e, "Failed to lock submissions; leaving descriptor");
            return;
        }
    };
    let task_file = workspace.task_file();
    let ours = TaskDescriptor::load(&task_file).is_some_and(|d| d.task_number == number);
    if ours {
        if let Err(e) = TaskDescriptor::clear(&task_file) {
            warn!(error = %e, "Failed to clear task descriptor");
        }
    }
}
