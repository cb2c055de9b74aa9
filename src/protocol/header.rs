// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Header blocks for request and response files.
//!
//! A message file starts with a `---` delimited block of `key: value` lines,
//! followed by a blank line and free-form body text:
//!
//! ```text
//! ---
//! from: coordinator
//! to: backend-engineer
//! request-number: 0001
//! timestamp: 2026-03-01T12:00:00Z
//! feature-id: none
//! task-id: T-1
//! attempt: 1
//! title: Add endpoint
//! ---
//!
//! Please add a GET /health endpoint.
//! ```
//!
//! Parsing is lenient: unknown keys are ignored and missing optional keys
//! fall back to defaults, so older files stay readable.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::workspace::Role;

const DELIMITER: &str = "---";
const NONE_VALUE: &str = "none";

/// Structured fields of a request file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub from: Role,
    pub to: Role,
    pub request_number: u32,
    pub timestamp: DateTime<Utc>,
    pub feature_id: Option<String>,
    pub task_id: Option<String>,
    pub attempt: u32,
    pub title: String,
}

impl RequestHeader {
    /// Render the header and body as file contents.
    pub fn render(&self, body: &str) -> String {
        let mut out = String::new();
        out.push_str(DELIMITER);
        out.push('\n');
        push_field(&mut out, "from", self.from.as_str());
        push_field(&mut out, "to", self.to.as_str());
        push_field(&mut out, "request-number", &format!("{:04}", self.request_number));
        push_field(&mut out, "timestamp", &format_timestamp(&self.timestamp));
        push_field(&mut out, "feature-id", self.feature_id.as_deref().unwrap_or(NONE_VALUE));
        push_field(&mut out, "task-id", self.task_id.as_deref().unwrap_or(NONE_VALUE));
        push_field(&mut out, "attempt", &self.attempt.to_string());
        push_field(&mut out, "title", &single_line(&self.title));
        out.push_str(DELIMITER);
        out.push_str("\n\n");
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    /// Parse file contents into a header and body.
    ///
    /// Returns `None` when the header block is missing or lacks the fields
    /// that identify the request (`from`, `to`, `request-number`).
    pub fn parse(text: &str) -> Option<(Self, String)> {
        let (fields, body) = split_front_matter(text)?;
        let from = fields.get("from")?.parse().ok()?;
        let to = fields.get("to")?.parse().ok()?;
        let request_number = fields.get("request-number")?.parse().ok()?;
        let timestamp = fields
            .get("timestamp")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let header = Self {
            from,
            to,
            request_number,
            timestamp,
            feature_id: optional(fields.get("feature-id")),
            task_id: optional(fields.get("task-id")),
            attempt: fields
                .get("attempt")
                .and_then(|a| a.parse().ok())
                .unwrap_or(1),
            title: fields.get("title").cloned().unwrap_or_default(),
        };
        Some((header, body))
    }
}

/// Whether a completion answers a task or a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    Task,
    Review,
}

impl CompletionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "review" => Ok(Self::Review),
            other => Err(format!("unknown completion mode {other:?} (expected task or review)")),
        }
    }
}

/// Structured fields of a response file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// The role that did the work.
    pub from: Role,
    /// The role that asked for it.
    pub to: Role,
    pub request_number: u32,
    pub timestamp: DateTime<Utc>,
    pub mode: CompletionMode,
}

impl ResponseHeader {
    pub fn render(&self, body: &str) -> String {
        let mut out = String::new();
        out.push_str(DELIMITER);
        out.push('\n');
        push_field(&mut out, "from", self.from.as_str());
        push_field(&mut out, "to", self.to.as_str());
        push_field(&mut out, "request-number", &format!("{:04}", self.request_number));
        push_field(&mut out, "timestamp", &format_timestamp(&self.timestamp));
        push_field(&mut out, "mode", self.mode.as_str());
        out.push_str(DELIMITER);
        out.push_str("\n\n");
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Strip a header block if present and return only the body.
///
/// Responses written by hand (or by an older worker) may have no header; in
/// that case the whole text is the body.
pub fn message_body(text: &str) -> String {
    match split_front_matter(text) {
        Some((_, body)) => body,
        None => text.to_string(),
    }
}

/// Split `---` delimited front matter from the body.
///
/// A repeated key keeps its first value.
pub fn split_front_matter(text: &str) -> Option<(BTreeMap<String, String>, String)> {
    let mut lines = text.lines();
    if lines.next()?.trim() != DELIMITER {
        return None;
    }

    let mut fields = BTreeMap::new();
    let mut closed = false;
    let mut consumed = DELIMITER.len() + 1;
    for line in lines.by_ref() {
        consumed += line.len() + 1;
        if line.trim() == DELIMITER {
            closed = true;
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            fields
                .entry(key.trim().to_ascii_lowercase())
                .or_insert_with(|| value.trim().to_string());
        }
    }
    if !closed {
        return None;
    }

    let rest = text.get(consumed.min(text.len())..).unwrap_or("");
    let body = rest.strip_prefix('\n').unwrap_or(rest);
    Some((fields, body.to_string()))
}

fn push_field(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn optional(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(NONE_VALUE) && *v != "null")
        .map(str::to_string)
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
