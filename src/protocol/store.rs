// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The shared messages directory.
//!
//! [`MessageStore`] is the only writer of request and response files. It
//! allocates task numbers, scans headers for external task ids and pairs
//! requests with their responses.
//!
//! A request the target's host gave up on carries an
//! `{NNNN}.{role}.abandoned` marker next to it. The marker is written
//! atomically and its failure is an error, since a lost marker would let
//! the request run again with a fresh restart budget.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::error::ProtocolError;
use crate::workspace::{Role, Workspace};

use super::atomic::{create_new_atomic, write_atomic};
use super::counter::TaskCounter;
use super::filename::{MessageFileName, MessageKind};
use super::header::{format_timestamp, message_body, CompletionMode, RequestHeader, ResponseHeader};
use super::lock::{FileLock, SUBMIT_LOCK_FILE};

/// A message file on disk with its decoded name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub name: MessageFileName,
    pub path: PathBuf,
}

/// Fields of a new request; the number is allocated by the store.
#[derive(Debug, Clone)]
pub struct NewRequest<'a> {
    pub from: Role,
    pub to: Role,
    pub title: &'a str,
    pub body: &'a str,
    pub feature_id: Option<&'a str>,
    pub task_id: Option<&'a str>,
    pub attempt: u32,
}

/// Handle to one branch's messages directory.
#[derive(Debug, Clone)]
pub struct MessageStore {
    dir: PathBuf,
    counter: TaskCounter,
}

impl MessageStore {
    pub fn new(dir: impl Into<PathBuf>, counter_file: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: TaskCounter::new(counter_file),
        }
    }

    pub fn for_workspace(workspace: &Workspace) -> Self {
        Self::new(workspace.messages_dir(), workspace.counter_file())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every message file in the directory, ascending by number.
    pub fn entries(&self) -> Result<Vec<MessageEntry>, ProtocolError> {
        let read = match std::fs::read_dir(&self.dir) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ProtocolError::io(&self.dir, e)),
        };

        let mut entries: Vec<MessageEntry> = read
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                MessageFileName::from_path(&path)
                    .ok()
                    .map(|name| MessageEntry { name, path })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.name
                .number
                .cmp(&b.name.number)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(entries)
    }

    /// Messages of one kind for one role, ascending by number.
    pub fn list(&self, role: Role, kind: MessageKind) -> Result<Vec<MessageEntry>, ProtocolError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.name.role == role && e.name.kind == kind)
            .collect())
    }

    /// Allocate the next task number.
    ///
    /// The counter is reconciled with the highest number already on disk so
    /// a lost counter file never causes a number to be reused.
    pub fn next_task_number(&self) -> Result<u32, ProtocolError> {
        let floor = self
            .entries()?
            .iter()
            .map(|e| e.name.number)
            .max()
            .unwrap_or(0);
        self.counter.next_after(floor)
    }

    /// Allocate a number and write a request file for it.
    pub fn create_request(
        &self,
        request: &NewRequest<'_>,
    ) -> Result<(RequestHeader, PathBuf), ProtocolError> {
        let number = self.next_task_number()?;
        let header = RequestHeader {
            from: request.from,
            to: request.to,
            request_number: number,
            timestamp: Utc::now(),
            feature_id: request.feature_id.map(str::to_string),
            task_id: request.task_id.map(str::to_string),
            attempt: request.attempt.max(1),
            title: request.title.to_string(),
        };
        let path = self.write_request(&header, request.body)?;
        Ok((header, path))
    }

    /// Write a request file for an already allocated number.
    ///
    /// Never overwrites: an existing file with the same name is
    /// [`ProtocolError::AlreadyExists`].
    pub fn write_request(&self, header: &RequestHeader, body: &str) -> Result<PathBuf, ProtocolError> {
        let name = MessageFileName::request(header.request_number, header.to, &header.title);
        let path = self.dir.join(name.to_string());
        create_new_atomic(&path, header.render(body).as_bytes())?;
        debug!(path = %path.display(), from = %header.from, to = %header.to, "Request written");
        Ok(path)
    }

    /// Parse a request file.
    pub fn read_request(&self, path: &Path) -> Result<(RequestHeader, String), ProtocolError> {
        let text = std::fs::read_to_string(path).map_err(|e| ProtocolError::io(path, e))?;
        RequestHeader::parse(&text).ok_or_else(|| ProtocolError::MalformedHeader(path.to_path_buf()))
    }

    /// Requests addressed to `role` carrying `task_id`, ascending by number.
    ///
    /// Files with unreadable headers are skipped.
    pub fn requests_for_task(
        &self,
        role: Role,
        task_id: &str,
    ) -> Result<Vec<(RequestHeader, MessageEntry)>, ProtocolError> {
        Ok(self
            .list(role, MessageKind::Request)?
            .into_iter()
            .filter_map(|entry| {
                let (header, _) = self.read_request(&entry.path).ok()?;
                (header.task_id.as_deref() == Some(task_id)).then_some((header, entry))
            })
            .collect())
    }

    /// The most recent request to `role` for an external task id.
    pub fn find_request_by_external_id(
        &self,
        role: Role,
        task_id: &str,
    ) -> Result<Option<(u32, PathBuf)>, ProtocolError> {
        Ok(self
            .requests_for_task(role, task_id)?
            .pop()
            .map(|(header, entry)| (header.request_number, entry.path)))
    }

    /// How many requests to `role` already exist for an external task id.
    pub fn count_attempts(&self, role: Role, task_id: &str) -> Result<u32, ProtocolError> {
        Ok(self.requests_for_task(role, task_id)?.len() as u32)
    }

    /// The response answering request `number` for `role`, if written.
    pub fn find_response(&self, role: Role, number: u32) -> Result<Option<PathBuf>, ProtocolError> {
        Ok(self
            .list(role, MessageKind::Response)?
            .into_iter()
            .find(|e| e.name.number == number)
            .map(|e| e.path))
    }

    /// Requests to `role` with no matching response, oldest first.
    pub fn unprocessed_requests(&self, role: Role) -> Result<Vec<MessageEntry>, ProtocolError> {
        let entries = self.entries()?;
        let (requests, responses): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .filter(|e| e.name.role == role)
            .partition(|e| e.name.is_request());

        Ok(requests
            .into_iter()
            .filter(|req| !responses.iter().any(|resp| req.name.is_answered_by(&resp.name)))
            .collect())
    }

    /// Write the response for request `number` to `role`.
    ///
    /// The response reuses the request's slug. If the request file is gone,
    /// the slug falls back to `response`.
    pub fn write_response(
        &self,
        role: Role,
        number: u32,
        requester: Role,
        mode: CompletionMode,
        body: &str,
    ) -> Result<PathBuf, ProtocolError> {
        let request = self
            .list(role, MessageKind::Request)?
            .into_iter()
            .find(|e| e.name.number == number);

        let name = match request {
            Some(entry) => entry.name.response(),
            None => MessageFileName {
                number,
                role,
                kind: MessageKind::Response,
                slug: "response".to_string(),
            },
        };

        let header = ResponseHeader {
            from: role,
            to: requester,
            request_number: number,
            timestamp: Utc::now(),
            mode,
        };
        let path = self.dir.join(name.to_string());
        create_new_atomic(&path, header.render(body).as_bytes())?;
        debug!(path = %path.display(), role = %role, "Response written");
        Ok(path)
    }

    /// Take the lock serialising submissions to this directory.
    ///
    /// Hold it from the duplicate and busy checks through the request and
    /// descriptor writes.
    pub fn lock_submissions(&self) -> Result<FileLock, ProtocolError> {
        FileLock::acquire(self.dir.join(SUBMIT_LOCK_FILE))
    }

    /// Record that the host gave up on request `number` for `role`.
    pub fn mark_abandoned(&self, role: Role, number: u32, reason: &str) -> Result<PathBuf, ProtocolError> {
        let path = self.abandoned_marker(role, number);
        let contents = format!("{} {}\n", format_timestamp(&Utc::now()), reason.replace('\n', " "));
        write_atomic(&path, contents.as_bytes())?;
        debug!(path = %path.display(), "Request marked abandoned");
        Ok(path)
    }

    pub fn is_abandoned(&self, role: Role, number: u32) -> bool {
        self.abandoned_marker(role, number).is_file()
    }

    fn abandoned_marker(&self, role: Role, number: u32) -> PathBuf {
        self.dir.join(format!("{number:04}.{role}.abandoned"))
    }

    /// Read a response file and strip its header.
    pub fn read_response_body(&self, path: &Path) -> Result<String, ProtocolError> {
        let text = std::fs::read_to_string(path).map_err(|e| ProtocolError::io(path, e))?;
        Ok(message_body(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> MessageStore {
        let ws = Workspace::resolve(dir.path(), Role::BackendEngineer, "feature-x");
        MessageStore::for_workspace(&ws)
    }

    fn request<'a>(title: &'a str, task_id: Option<&'a str>) -> NewRequest<'a> {
        NewRequest {
            from: Role::Coordinator,
            to: Role::BackendEngineer,
            title,
            body: "Do the thing.",
            feature_id: None,
            task_id,
            attempt: 1,
        }
    }

    #[test]
    fn test_create_request_uses_convention() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (header, path) = store.create_request(&request("Add endpoint", Some("T-1"))).unwrap();
        assert_eq!(header.request_number, 1);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "0001.backend-engineer.request.add-endpoint.md"
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("task-id: T-1\n"));
    }

    #[test]
    fn test_write_request_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (header, _) = store.create_request(&request("Add endpoint", None)).unwrap();
        let err = store.write_request(&header, "other").unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyExists(_)));
    }

    #[test]
    fn test_find_request_by_external_id_returns_latest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_request(&request("First", Some("T-1"))).unwrap();
        store.create_request(&request("Other", Some("T-2"))).unwrap();
        store.create_request(&request("Retry", Some("T-1"))).unwrap();

        let (number, path) = store
            .find_request_by_external_id(Role::BackendEngineer, "T-1")
            .unwrap()
            .unwrap();
        assert_eq!(number, 3);
        assert!(path.ends_with("0003.backend-engineer.request.retry.md"));
        assert_eq!(store.count_attempts(Role::BackendEngineer, "T-1").unwrap(), 2);
        assert!(store
            .find_request_by_external_id(Role::Reviewer, "T-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unprocessed_requests() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_request(&request("One", None)).unwrap();
        store.create_request(&request("Two", None)).unwrap();
        store
            .write_response(Role::BackendEngineer, 1, Role::Coordinator, CompletionMode::Task, "ok")
            .unwrap();

        let pending = store.unprocessed_requests(Role::BackendEngineer).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name.number, 2);
    }

    #[test]
    fn test_response_pairs_with_request() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_request(&request("Add endpoint", None)).unwrap();
        let path = store
            .write_response(Role::BackendEngineer, 1, Role::Coordinator, CompletionMode::Task, "Done")
            .unwrap();
        assert!(path.ends_with("0001.backend-engineer.response.add-endpoint.md"));
        assert_eq!(store.find_response(Role::BackendEngineer, 1).unwrap(), Some(path.clone()));
        assert_eq!(store.read_response_body(&path).unwrap(), "Done\n");
    }

    #[test]
    fn test_counter_reconciles_with_existing_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(
            store.dir().join("0041.reviewer.request.old-review.md"),
            "---\nfrom: backend-engineer\nto: reviewer\nrequest-number: 0041\n---\n\nx",
        )
        .unwrap();
        assert_eq!(store.next_task_number().unwrap(), 42);
    }

    #[test]
    fn test_abandoned_marker_is_per_request() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_request(&request("One", Some("T-1"))).unwrap();
        assert!(!store.is_abandoned(Role::BackendEngineer, 1));

        let path = store
            .mark_abandoned(Role::BackendEngineer, 1, "restart budget\nexhausted")
            .unwrap();
        assert!(path.ends_with("0001.backend-engineer.abandoned"));
        assert!(store.is_abandoned(Role::BackendEngineer, 1));
        assert!(!store.is_abandoned(Role::Reviewer, 1));
        assert!(!store.is_abandoned(Role::BackendEngineer, 2));
        // The marker is not a message and leaves the request pending.
        assert_eq!(store.entries().unwrap().len(), 1);
        assert_eq!(store.unprocessed_requests(Role::BackendEngineer).unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("notes.txt"), "hello").unwrap();
        store.create_request(&request("One", None)).unwrap();
        assert_eq!(store.entries().unwrap().len(), 1);
    }
}
