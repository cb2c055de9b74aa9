// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reader for a worker's line-oriented conversation log.
//!
//! Workers append one JSON object per line. Only the tail matters for
//! health checks: when the last line was written and which tool, if any, it
//! invoked.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Bytes read from the end of the log when looking for the last line.
const TAIL_BYTES: u64 = 64 * 1024;

/// The parts of the last log line the health engine cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogTail {
    pub timestamp: Option<DateTime<Utc>>,
    pub last_tool: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationLog {
    path: PathBuf,
}

impl ConversationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last non-empty line, if the log exists.
    pub fn last_line(&self) -> Option<String> {
        let mut file = File::open(&self.path).ok()?;
        let len = file.metadata().ok()?.len();
        let start = len.saturating_sub(TAIL_BYTES);
        file.seek(SeekFrom::Start(start)).ok()?;

        let mut buf = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut buf).ok()?;
        let text = String::from_utf8_lossy(&buf);
        text.lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }

    /// Timestamp and tool name of the last entry.
    ///
    /// Falls back to the file's modification time when the line carries no
    /// parseable timestamp.
    pub fn tail(&self) -> Option<LogTail> {
        let line = self.last_line()?;
        let mut tail = parse_line(&line);
        if tail.timestamp.is_none() {
            tail.timestamp = std::fs::metadata(&self.path)
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
        }
        Some(tail)
    }
}

/// Extract timestamp and tool name from one JSON log line.
pub fn parse_line(line: &str) -> LogTail {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return LogTail::default();
    };

    let timestamp = ["timestamp", "ts", "time"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    LogTail {
        timestamp,
        last_tool: find_tool_name(&value),
    }
}

/// Name of the last `tool_use` block in an entry, searching nested content.
fn find_tool_name(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("tool_use") {
                if let Some(name) = map.get("name").and_then(Value::as_str) {
                    return Some(name.to_string());
                }
            }
            if let Some(name) = map.get("tool_name").and_then(Value::as_str) {
                return Some(name.to_string());
            }
            map.values().filter_map(find_tool_name).last()
        }
        Value::Array(items) => items.iter().filter_map(find_tool_name).last(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_parse_tool_use_entry() {
        let line = r#"{"timestamp":"2026-03-01T12:00:00Z","message":{"content":[{"type":"text","text":"hi"},{"type":"tool_use","name":"delegate","input":{}}]}}"#;
        let tail = parse_line(line);
        assert_eq!(tail.last_tool.as_deref(), Some("delegate"));
        assert_eq!(tail.timestamp.unwrap().to_rfc3339(), "2026-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_parse_plain_entry() {
        let tail = parse_line(r#"{"ts":"2026-03-01T12:00:00+02:00","text":"thinking"}"#);
        assert!(tail.last_tool.is_none());
        assert!(tail.timestamp.is_some());
        assert_eq!(parse_line("not json"), LogTail::default());
    }

    #[test]
    fn test_last_line_skips_trailing_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conversation.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"n":1}}"#).unwrap();
        writeln!(file, r#"{{"n":2,"tool_name":"complete_work"}}"#).unwrap();
        writeln!(file).unwrap();

        let log = ConversationLog::new(&path);
        assert_eq!(log.last_line().unwrap(), r#"{"n":2,"tool_name":"complete_work"}"#);
        let tail = log.tail().unwrap();
        assert_eq!(tail.last_tool.as_deref(), Some("complete_work"));
        // No timestamp field: falls back to mtime.
        assert!(tail.timestamp.is_some());
    }

    #[test]
    fn test_missing_log() {
        let dir = TempDir::new().unwrap();
        let log = ConversationLog::new(dir.path().join("missing.jsonl"));
        assert!(log.last_line().is_none());
        assert!(log.tail().is_none());
    }
}
