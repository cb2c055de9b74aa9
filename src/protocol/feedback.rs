// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structured feedback captured on completion.
//!
//! Feedback is stored apart from the response so it can be analysed later
//! without parsing free-form response text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DelegationError, ProtocolError};
use crate::workspace::Role;

use super::atomic::write_atomic;
use super::header::CompletionMode;

/// Feedback items grouped by category, e.g. `{"blockers": ["flaky CI"]}`.
pub type FeedbackCategories = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub request_number: u32,
    pub role: Role,
    pub mode: CompletionMode,
    pub categories: FeedbackCategories,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackRecord {
    /// Build a record, dropping blank items and empty categories.
    ///
    /// Fails when nothing is left: feedback is mandatory.
    pub fn new(
        request_number: u32,
        role: Role,
        mode: CompletionMode,
        categories: FeedbackCategories,
    ) -> Result<Self, DelegationError> {
        let categories: FeedbackCategories = categories
            .into_iter()
            .filter_map(|(category, items)| {
                let category = category.trim().to_string();
                let items: Vec<String> = items
                    .into_iter()
                    .map(|i| i.trim().to_string())
                    .filter(|i| !i.is_empty())
                    .collect();
                (!category.is_empty() && !items.is_empty()).then_some((category, items))
            })
            .collect();

        if categories.is_empty() {
            return Err(DelegationError::InvalidInput(
                "feedback is required: provide at least one category with one non-empty item"
                    .to_string(),
            ));
        }

        Ok(Self {
            request_number,
            role,
            mode,
            categories,
            recorded_at: Utc::now(),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{:04}.{}.{}.feedback.json", self.request_number, self.role, self.mode)
    }

    /// Write the record into `dir`, returning its path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ProtocolError> {
        let path = dir.join(self.file_name());
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    pub fn item_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn categories(pairs: &[(&str, &[&str])]) -> FeedbackCategories {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_blank_feedback_is_rejected() {
        let err = FeedbackRecord::new(
            1,
            Role::Reviewer,
            CompletionMode::Review,
            categories(&[("blockers", &["  "]), ("", &["x"])]),
        )
        .unwrap_err();
        assert!(matches!(err, DelegationError::InvalidInput(_)));
    }

    #[test]
    fn test_empty_items_are_dropped() {
        let record = FeedbackRecord::new(
            2,
            Role::BackendEngineer,
            CompletionMode::Task,
            categories(&[("blockers", &[]), ("tooling", &["slow tests", ""])]),
        )
        .unwrap();
        assert_eq!(record.categories.len(), 1);
        assert_eq!(record.item_count(), 1);
    }

    #[test]
    fn test_save_writes_json() {
        let dir = TempDir::new().unwrap();
        let record = FeedbackRecord::new(
            7,
            Role::BackendEngineer,
            CompletionMode::Task,
            categories(&[("process", &["clear requirements"])]),
        )
        .unwrap();
        let path = record.save(dir.path()).unwrap();
        assert!(path.ends_with("0007.backend-engineer.task.feedback.json"));
        let loaded: FeedbackRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, record);
    }
}
