// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The current-task descriptor (`current-task.json`).
//!
//! At most one descriptor exists per workspace. Its presence means "this
//! worker is busy with this task"; its absence means idle or mid-recovery.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::workspace::Role;

use super::atomic::write_atomic;

/// What a worker is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    #[serde(serialize_with = "serialize_padded", deserialize_with = "deserialize_padded")]
    pub task_number: u32,
    pub request_file_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub attempt: u32,
    pub feature_id: Option<String>,
    pub task_id: String,
    pub task_title: String,
    pub sender_role: Role,
}

impl TaskDescriptor {
    /// Read the descriptor at `path`.
    ///
    /// A missing file is `None`. A malformed or unreadable file is logged and
    /// also treated as `None` so the host starts fresh instead of crashing.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable task descriptor; treating as absent");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(desc) => Some(desc),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed task descriptor; treating as absent");
                None
            }
        }
    }

    /// Persist the descriptor, replacing any previous one wholesale.
    pub fn save(&self, path: &Path) -> Result<(), ProtocolError> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        debug!(path = %path.display(), task_number = self.task_number, "Task descriptor written");
        Ok(())
    }

    /// Remove the descriptor. Returns whether a file was removed.
    pub fn clear(path: &Path) -> Result<bool, ProtocolError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ProtocolError::io(path, e)),
        }
    }

    /// Whether this descriptor is for the same external task.
    pub fn is_same_task(&self, task_id: &str) -> bool {
        self.task_id == task_id
    }
}

fn serialize_padded<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:04}"))
}

fn deserialize_padded<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
