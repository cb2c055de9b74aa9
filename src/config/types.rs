// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::workspace::RoleFamily;

/// Workspace configuration for taskrelay.
/// Can be defined in .taskrelay.json or .taskrelay/config.json in the repository root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Directory holding every branch's workspaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Worker command templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerConfigPartial>,

    /// Host loop timing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingConfigPartial>,

    /// Activity windows, inactivity thresholds and restart caps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthConfigPartial>,

    /// Delegation policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation: Option<DelegationConfigPartial>,

    /// System prompt sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsConfigPartial>,

    /// Default log level when RUST_LOG is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Worker command settings (partial, for workspace config).
///
/// Argument templates may contain `{system_prompt}`, `{system_prompt_file}`,
/// `{message}`, `{session_id}`, `{role}`, `{branch}`, `{workspace}` and
/// `{conversation_log}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Arguments for a fresh session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Arguments when resuming a stored session id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_args: Option<Vec<String>>,

    /// Extra environment variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,

    /// Working directory for workers (defaults to the repository root)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Message sent on keep-alive runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_message: Option<String>,
}

/// Host loop timing (partial). All values in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_delay_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_cooldown_secs: Option<u64>,
    /// Keep-alive interval for idle sessions; unset disables the heartbeat
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,
}

/// Per-family values (partial).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyPartial<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engineer: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<T>,
}

impl<T> Default for FamilyPartial<T> {
    fn default() -> Self {
        Self {
            reviewer: None,
            engineer: None,
            coordinator: None,
        }
    }
}

/// Health-monitoring settings (partial). Durations in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_window_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation_grace_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator_window_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_threshold_secs: Option<FamilyPartial<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<FamilyPartial<RestartCap>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationConfigPartial {
    /// Reject ad-hoc requests to a busy role instead of queueing them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_adhoc_when_busy: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsConfigPartial {
    /// Base system prompt file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Directory of per-role rule documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_dir: Option<String>,
}

/// Maximum number of inactivity restarts.
///
/// Serialized as a number or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartCap {
    Limited(u32),
    Unlimited,
}

impl RestartCap {
    /// Whether another restart is allowed after `restarts` restarts.
    pub fn allows(self, restarts: u32) -> bool {
        match self {
            Self::Limited(max) => restarts < max,
            Self::Unlimited => true,
        }
    }
}

impl fmt::Display for RestartCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{n}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for RestartCap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limited(n) => serializer.serialize_u32(*n),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for RestartCap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::Limited(n)),
            Raw::Text(s) if s.eq_ignore_ascii_case("unlimited") => Ok(Self::Unlimited),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a number or \"unlimited\", got {s:?}"
            ))),
        }
    }
}

/// Resolved per-family values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilySettings<T> {
    pub reviewer: T,
    pub engineer: T,
    pub coordinator: T,
}

impl<T: Copy> FamilySettings<T> {
    pub fn get(&self, family: RoleFamily) -> T {
        match family {
            RoleFamily::Reviewer => self.reviewer,
            RoleFamily::Engineer => self.engineer,
            RoleFamily::Coordinator => self.coordinator,
        }
    }

    pub(crate) fn apply(&mut self, partial: &FamilyPartial<T>) {
        if let Some(v) = partial.reviewer {
            self.reviewer = v;
        }
        if let Some(v) = partial.engineer {
            self.engineer = v;
        }
        if let Some(v) = partial.coordinator {
            self.coordinator = v;
        }
    }
}

/// Resolved worker command settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSettings {
    pub program: String,
    pub args: Vec<String>,
    pub resume_args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub heartbeat_message: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "--session-id".to_string(),
                "{session_id}".to_string(),
                "--append-system-prompt".to_string(),
                "{system_prompt}".to_string(),
                "{message}".to_string(),
            ],
            resume_args: vec![
                "--resume".to_string(),
                "{session_id}".to_string(),
                "--append-system-prompt".to_string(),
                "{system_prompt}".to_string(),
                "{message}".to_string(),
            ],
            env: HashMap::new(),
            cwd: None,
            heartbeat_message: "Heartbeat: reply with OK and take no other action.".to_string(),
        }
    }
}

/// Resolved timing, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingSettings {
    pub poll_interval_secs: u64,
    pub startup_delay_secs: u64,
    pub grace_period_secs: u64,
    pub response_timeout_secs: u64,
    pub restart_cooldown_secs: u64,
    pub heartbeat_interval_secs: Option<u64>,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 120,
            startup_delay_secs: 3,
            grace_period_secs: 10,
            response_timeout_secs: 4 * 60 * 60,
            restart_cooldown_secs: 600,
            heartbeat_interval_secs: None,
        }
    }
}

impl TimingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

/// Resolved health settings, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSettings {
    pub activity_window_secs: u64,
    pub delegation_grace_secs: u64,
    pub coordinator_window_secs: u64,
    pub inactivity_threshold_secs: FamilySettings<u64>,
    pub max_restarts: FamilySettings<RestartCap>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            activity_window_secs: 300,
            delegation_grace_secs: 1800,
            coordinator_window_secs: 900,
            inactivity_threshold_secs: FamilySettings {
                reviewer: 600,
                engineer: 900,
                coordinator: 1800,
            },
            max_restarts: FamilySettings {
                reviewer: RestartCap::Limited(3),
                engineer: RestartCap::Limited(3),
                coordinator: RestartCap::Unlimited,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationSettings {
    pub reject_adhoc_when_busy: bool,
}

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            reject_adhoc_when_busy: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSettings {
    pub base: Option<PathBuf>,
    pub rules_dir: PathBuf,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            base: None,
            rules_dir: PathBuf::from("rules"),
        }
    }
}

/// Resolved configuration with all values set.
/// This is the merged result of global, workspace, local, and CLI configs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub root: PathBuf,
    pub worker: WorkerSettings,
    pub timing: TimingSettings,
    pub health: HealthSettings,
    pub delegation: DelegationSettings,
    pub prompts: PromptSettings,
    pub log_level: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".taskrelay/workspaces"),
            worker: WorkerSettings::default(),
            timing: TimingSettings::default(),
            health: HealthSettings::default(),
            delegation: DelegationSettings::default(),
            prompts: PromptSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ResolvedConfig {
    /// Make relative paths absolute against the repository root.
    pub fn anchored(mut self, repo_root: &Path) -> Self {
        let anchor = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                repo_root.join(p)
            }
        };
        self.root = anchor(&self.root);
        self.prompts.rules_dir = anchor(&self.prompts.rules_dir);
        self.prompts.base = self.prompts.base.as_deref().map(anchor);
        self.worker.cwd = Some(
            self.worker
                .cwd
                .as_deref()
                .map(anchor)
                .unwrap_or_else(|| repo_root.to_path_buf()),
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_config_default() {
        let config = WorkspaceConfig::default();
        assert!(config.root.is_none());
        assert!(config.timing.is_none());
    }

    #[test]
    fn test_workspace_config_json_serialization() {
        let config = WorkspaceConfig {
            root: Some("/tmp/relay".to_string()),
            timing: Some(TimingConfigPartial {
                poll_interval_secs: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };

        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"pollIntervalSecs\": 30"));
        assert!(!json.contains("health"));

        let parsed: WorkspaceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.root.as_deref(), Some("/tmp/relay"));
    }

    #[test]
    fn test_workspace_config_yaml_serialization() {
        let yaml = "health:\n  maxRestarts:\n    engineer: 5\n    coordinator: unlimited\n";
        let parsed: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        let caps = parsed.health.unwrap().max_restarts.unwrap();
        assert_eq!(caps.engineer, Some(RestartCap::Limited(5)));
        assert_eq!(caps.coordinator, Some(RestartCap::Unlimited));
        assert_eq!(caps.reviewer, None);
    }

    #[test]
    fn test_restart_cap_rejects_garbage() {
        let result: Result<RestartCap, _> = serde_json::from_str("\"lots\"");
        assert!(result.is_err());
        assert_eq!(serde_json::to_string(&RestartCap::Unlimited).unwrap(), "\"unlimited\"");
    }

    #[test]
    fn test_restart_cap_allows() {
        assert!(RestartCap::Limited(3).allows(2));
        assert!(!RestartCap::Limited(3).allows(3));
        assert!(!RestartCap::Limited(0).allows(0));
        assert!(RestartCap::Unlimited.allows(u32::MAX));
    }

    #[test]
    fn test_resolved_config_default() {
        let config = ResolvedConfig::default();
        assert_eq!(config.timing.poll_interval_secs, 120);
        assert_eq!(config.timing.response_timeout(), Duration::from_secs(14400));
        assert_eq!(config.health.inactivity_threshold_secs.get(RoleFamily::Engineer), 900);
        assert_eq!(config.health.max_restarts.get(RoleFamily::Coordinator), RestartCap::Unlimited);
        assert!(config.delegation.reject_adhoc_when_busy);
        assert!(config.timing.heartbeat_interval().is_none());
    }

    #[test]
    fn test_anchored_paths() {
        let config = ResolvedConfig::default().anchored(Path::new("/repo"));
        assert_eq!(config.root, PathBuf::from("/repo/.taskrelay/workspaces"));
        assert_eq!(config.prompts.rules_dir, PathBuf::from("/repo/rules"));
        assert_eq!(config.worker.cwd, Some(PathBuf::from("/repo")));
    }
}
