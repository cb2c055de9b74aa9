// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use crate::error::ConfigError;

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub root: Option<PathBuf>,
    pub program: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub response_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.taskrelay.local.json)
/// 3. Workspace config (.taskrelay.json)
/// 4. Global config (~/.taskrelay/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    // Apply global config
    if let Some(config) = global {
        apply_workspace_config(&mut result, &config);
    }

    // Apply workspace config
    if let Some(config) = workspace {
        apply_workspace_config(&mut result, &config);
    }

    // Apply local config
    if let Some(config) = local {
        apply_workspace_config(&mut result, &config);
    }

    // Apply CLI options (highest precedence)
    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(ref root) = config.root {
        result.root = PathBuf::from(root);
    }

    if let Some(ref worker) = config.worker {
        if let Some(ref program) = worker.program {
            result.worker.program = program.clone();
        }
        if let Some(ref args) = worker.args {
            result.worker.args = args.clone();
        }
        if let Some(ref args) = worker.resume_args {
            result.worker.resume_args = args.clone();
        }
        if let Some(ref env) = worker.env {
            // Merge environment maps
            result.worker.env.extend(env.clone());
        }
        if let Some(ref cwd) = worker.cwd {
            result.worker.cwd = Some(PathBuf::from(cwd));
        }
        if let Some(ref message) = worker.heartbeat_message {
            result.worker.heartbeat_message = message.clone();
        }
    }

    if let Some(ref timing) = config.timing {
        let t = &mut result.timing;
        if let Some(v) = timing.poll_interval_secs {
            t.poll_interval_secs = v;
        }
        if let Some(v) = timing.startup_delay_secs {
            t.startup_delay_secs = v;
        }
        if let Some(v) = timing.grace_period_secs {
            t.grace_period_secs = v;
        }
        if let Some(v) = timing.response_timeout_secs {
            t.response_timeout_secs = v;
        }
        if let Some(v) = timing.restart_cooldown_secs {
            t.restart_cooldown_secs = v;
        }
        if timing.heartbeat_interval_secs.is_some() {
            t.heartbeat_interval_secs = timing.heartbeat_interval_secs;
        }
    }

    if let Some(ref health) = config.health {
        let h = &mut result.health;
        if let Some(v) = health.activity_window_secs {
            h.activity_window_secs = v;
        }
        if let Some(v) = health.delegation_grace_secs {
            h.delegation_grace_secs = v;
        }
        if let Some(v) = health.coordinator_window_secs {
            h.coordinator_window_secs = v;
        }
        if let Some(ref thresholds) = health.inactivity_threshold_secs {
            h.inactivity_threshold_secs.apply(thresholds);
        }
        if let Some(ref caps) = health.max_restarts {
            h.max_restarts.apply(caps);
        }
    }

    if let Some(ref delegation) = config.delegation {
        if let Some(reject) = delegation.reject_adhoc_when_busy {
            result.delegation.reject_adhoc_when_busy = reject;
        }
    }

    if let Some(ref prompts) = config.prompts {
        if let Some(ref base) = prompts.base {
            result.prompts.base = Some(PathBuf::from(base));
        }
        if let Some(ref rules) = prompts.rules_dir {
            result.prompts.rules_dir = PathBuf::from(rules);
        }
    }

    if let Some(ref level) = config.log_level {
        result.log_level = level.clone();
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref root) = cli.root {
        result.root = root.clone();
    }

    if let Some(ref program) = cli.program {
        result.worker.program = program.clone();
    }

    if let Some(secs) = cli.poll_interval_secs {
        result.timing.poll_interval_secs = secs;
    }

    if let Some(secs) = cli.response_timeout_secs {
        result.timing.response_timeout_secs = secs;
    }

    if cli.log_level.is_some() {
        result.log_level = cli.log_level.clone().unwrap_or_default();
    }
}

/// Reject values that would make the host loop misbehave.
pub fn validate_config(config: &ResolvedConfig) -> Result<(), ConfigError> {
    if config.worker.program.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "worker.program".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    if config.timing.poll_interval_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "timing.pollIntervalSecs".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if config.timing.response_timeout_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "timing.responseTimeoutSecs".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if config.health.activity_window_secs > config.health.delegation_grace_secs {
        return Err(ConfigError::InvalidValue {
            field: "health.delegationGraceSecs".to_string(),
            message: "must not be shorter than health.activityWindowSecs".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{FamilyPartial, HealthConfigPartial, RestartCap, TimingConfigPartial, WorkerConfigPartial};
    use crate::workspace::RoleFamily;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.worker.program, "claude");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_merge_config_precedence() {
        let global = WorkspaceConfig {
            root: Some("/global".to_string()),
            timing: Some(TimingConfigPartial {
                poll_interval_secs: Some(10),
                grace_period_secs: Some(20),
                ..Default::default()
            }),
            ..Default::default()
        };

        let workspace = WorkspaceConfig {
            timing: Some(TimingConfigPartial {
                poll_interval_secs: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };

        let local = WorkspaceConfig {
            timing: Some(TimingConfigPartial {
                poll_interval_secs: Some(60),
                ..Default::default()
            }),
            ..Default::default()
        };

        let cli = CliOptions {
            root: Some(PathBuf::from("/cli")),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(workspace), Some(local), cli);

        // CLI root takes precedence
        assert_eq!(result.root, PathBuf::from("/cli"));
        // Local poll interval takes precedence over workspace and global
        assert_eq!(result.timing.poll_interval_secs, 60);
        // Untouched global value survives
        assert_eq!(result.timing.grace_period_secs, 20);
    }

    #[test]
    fn test_merge_family_values() {
        let workspace = WorkspaceConfig {
            health: Some(HealthConfigPartial {
                max_restarts: Some(FamilyPartial {
                    engineer: Some(RestartCap::Limited(1)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = merge_config(None, Some(workspace), None, CliOptions::default());
        assert_eq!(result.health.max_restarts.get(RoleFamily::Engineer), RestartCap::Limited(1));
        assert_eq!(result.health.max_restarts.get(RoleFamily::Reviewer), RestartCap::Limited(3));
    }

    #[test]
    fn test_merge_worker_env() {
        let global = WorkspaceConfig {
            worker: Some(WorkerConfigPartial {
                env: Some(HashMap::from([("A".to_string(), "1".to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            worker: Some(WorkerConfigPartial {
                program: Some("codex".to_string()),
                env: Some(HashMap::from([("B".to_string(), "2".to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(workspace), None, CliOptions::default());
        assert_eq!(result.worker.program, "codex");
        assert_eq!(result.worker.env.len(), 2);
    }

    #[test]
    fn test_validate_rejects_zero_poll() {
        let cli = CliOptions {
            poll_interval_secs: Some(0),
            ..Default::default()
        };
        let result = merge_config(None, None, None, cli);
        assert!(matches!(
            validate_config(&result),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
