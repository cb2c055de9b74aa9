// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `complete_work`: a worker reports that its task or review is done.

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::error::DelegationError;
use crate::protocol::{
    CompletionMode, FeedbackCategories, FeedbackRecord, MessageKind, MessageStore, TaskDescriptor,
};
use crate::workspace::Role;

use super::delegate::clear_descriptor_for;
use super::Relay;

/// Arguments of a `complete_work` call.
#[derive(Debug, Clone)]
pub struct CompleteRequest {
    pub mode: CompletionMode,
    pub role: Role,
    pub response: String,
    /// Empty means the caller's branch.
    pub branch: String,
    pub feedback: FeedbackCategories,
    /// Defaults to the task in the role's descriptor.
    pub task_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReceipt {
    pub request_number: u32,
    pub response_path: PathBuf,
    pub feedback_path: PathBuf,
    pub feedback_items: usize,
}

impl CompletionReceipt {
    pub fn summary(&self) -> String {
        format!(
            "Recorded the response for request #{:04} at {} ({} feedback items saved). \
             Your host will pick it up and return to idle.",
            self.request_number,
            self.response_path.display(),
            self.feedback_items
        )
    }
}

impl Relay {
    /// Write the response for the role's current task and persist its
    /// feedback.
    ///
    /// Feedback and response are validated before anything is written.
    pub fn complete_work(&self, request: &CompleteRequest) -> Result<CompletionReceipt, DelegationError> {
        if request.response.trim().is_empty() {
            return Err(DelegationError::InvalidInput("response must not be empty".to_string()));
        }

        let workspace = self.workspace_for(request.role, &request.branch)?;
        let task_file = workspace.task_file();
        let descriptor = TaskDescriptor::load(&task_file);
        let number = request
            .task_number
            .or_else(|| descriptor.as_ref().map(|d| d.task_number))
            .ok_or_else(|| DelegationError::NoActiveTask(workspace.key()))?;

        let feedback = FeedbackRecord::new(number, request.role, request.mode, request.feedback.clone())?;

        let store = MessageStore::for_workspace(&workspace);
        let requester = match descriptor.as_ref().filter(|d| d.task_number == number) {
            Some(d) => d.sender_role,
            None => self.requester_of(&store, request.role, number)?,
        };

        let response_path = store.write_response(request.role, number, requester, request.mode, &request.response)?;
        let feedback_path = feedback.save(&workspace.feedback_dir())?;

        clear_descriptor_for(&workspace, number);
        info!(role = %request.role, number, mode = %request.mode, "Work completed");

        Ok(CompletionReceipt {
            request_number: number,
            response_path,
            feedback_path,
            feedback_items: feedback.item_count(),
        })
    }

    fn requester_of(&self, store: &MessageStore, role: Role, number: u32) -> Result<Role, DelegationError> {
        let entry = store
            .list(role, MessageKind::Request)?
            .into_iter()
            .find(|e| e.name.number == number)
            .ok_or_else(|| {
                DelegationError::InvalidInput(format!("no request #{number:04} for {role} exists"))
            })?;
        let (header, _) = store.read_request(&entry.path)?;
        Ok(header.from)
    }
}
