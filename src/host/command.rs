// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker command construction.
//!
//! The worker program and its arguments come from configuration. Argument
//! templates may contain these placeholders:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{system_prompt}` | composed system prompt text |
//! | `{system_prompt_file}` | path of `system-prompt.md` |
//! | `{message}` | opening message (an argument that is exactly `{message}` is dropped when empty) |
//! | `{session_id}` | conversation id from `.session-id` |
//! | `{role}` / `{branch}` | workspace identity |
//! | `{workspace}` | agent directory |
//! | `{conversation_log}` | path of `conversation.jsonl` |

use std::path::PathBuf;

use crate::config::WorkerSettings;
use crate::process::LaunchSpec;
use crate::workspace::Workspace;

pub const ENV_ROLE: &str = "TASKRELAY_ROLE";
pub const ENV_BRANCH: &str = "TASKRELAY_BRANCH";
pub const ENV_ROOT: &str = "TASKRELAY_ROOT";

const MESSAGE: &str = "{message}";

/// Per-launch values substituted into the argument templates.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    pub session_id: String,
    /// Continue the stored conversation instead of starting a new one.
    pub resume: bool,
    pub system_prompt: String,
    pub system_prompt_file: PathBuf,
    pub message: String,
    /// Inherit the terminal (manual control).
    pub interactive: bool,
}

/// Build the launch spec for one worker run.
pub fn worker_launch(settings: &WorkerSettings, workspace: &Workspace, ctx: &LaunchContext) -> LaunchSpec {
    let templates = if ctx.resume {
        &settings.resume_args
    } else {
        &settings.args
    };

    let args = templates
        .iter()
        .filter(|t| !(t.as_str() == MESSAGE && ctx.message.is_empty()))
        .map(|t| expand(t, workspace, ctx));

    let mut spec = LaunchSpec::new(&settings.program)
        .args(args)
        .interactive(ctx.interactive);
    if let Some(ref cwd) = settings.cwd {
        spec = spec.cwd(cwd.clone());
    }

    let mut env: Vec<_> = settings.env.iter().collect();
    env.sort();
    for (key, value) in env {
        spec = spec.env(key, value);
    }
    spec.env(ENV_ROLE, workspace.role().as_str())
        .env(ENV_BRANCH, workspace.branch())
        .env(ENV_ROOT, workspace.root().display().to_string())
}

fn expand(template: &str, workspace: &Workspace, ctx: &LaunchContext) -> String {
    template
        .replace("{system_prompt_file}", &ctx.system_prompt_file.display().to_string())
        .replace("{system_prompt}", &ctx.system_prompt)
        .replace("{session_id}", &ctx.session_id)
        .replace("{role}", workspace.role().as_str())
        .replace("{branch}", workspace.branch())
        .replace("{workspace}", &workspace.agent_dir().display().to_string())
        .replace("{conversation_log}", &workspace.conversation_log().display().to_string())
        .replace(MESSAGE, &ctx.message)
}
