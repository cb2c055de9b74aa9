// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Role priming: system prompt composition and the messages handed to a
//! worker on launch, recovery and heartbeat.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::PromptSettings;
use crate::protocol::TaskDescriptor;
use crate::workspace::{Role, RoleFamily, Workspace};

const DEFAULT_BASE_PROMPT: &str = "\
You are the {display_name} ({role}) in a team of autonomous agents working on branch {branch}.

Work arrives as request files in {messages_dir}. Your current task is described in {task_file}.
When you finish a task, call the `complete_work` tool with your response and structured feedback.
To hand work to another role, call the `delegate` tool. Never edit another role's workspace.";

/// Build the system prompt for a workspace.
///
/// The base prompt (configured file or the built-in one) is followed by a
/// `## Rules` section holding every `*.md` file of each of the role's rule
/// directories, sorted by name. Missing directories are skipped.
pub fn compose_system_prompt(workspace: &Workspace, prompts: &PromptSettings) -> std::io::Result<String> {
    let base = match prompts.base {
        Some(ref path) => std::fs::read_to_string(path)?,
        None => DEFAULT_BASE_PROMPT.to_string(),
    };
    let mut prompt = fill_placeholders(&base, workspace);

    let rules = collect_rules(workspace.role(), &prompts.rules_dir)?;
    if !rules.is_empty() {
        prompt.push_str("\n\n## Rules\n");
        for (label, content) in rules {
            prompt.push_str(&format!("\n### {label}\n\n{}\n", content.trim_end()));
        }
    }
    Ok(prompt)
}

/// Compose the system prompt and write it to the workspace.
pub fn write_system_prompt(workspace: &Workspace, prompts: &PromptSettings) -> std::io::Result<(PathBuf, String)> {
    let prompt = compose_system_prompt(workspace, prompts)?;
    let path = workspace.system_prompt_file();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &prompt)?;
    Ok((path, prompt))
}

/// `(dir/file.md, content)` for every rule document of a role, in order.
fn collect_rules(role: Role, rules_root: &Path) -> std::io::Result<Vec<(String, String)>> {
    let mut rules = Vec::new();
    for dir in role.info().rule_dirs {
        let path = rules_root.join(dir);
        let read = match std::fs::read_dir(&path) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %path.display(), "Rule directory missing");
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut files: Vec<PathBuf> = read
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        files.sort();

        for file in files {
            let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            rules.push((format!("{dir}/{name}"), std::fs::read_to_string(&file)?));
        }
    }
    Ok(rules)
}

fn fill_placeholders(template: &str, workspace: &Workspace) -> String {
    template
        .replace("{display_name}", workspace.role().info().display_name)
        .replace("{role}", workspace.role().as_str())
        .replace("{branch}", workspace.branch())
        .replace("{messages_dir}", &workspace.messages_dir().display().to_string())
        .replace("{task_file}", &workspace.task_file().display().to_string())
}

/// First message for a delegated task.
pub fn task_message(role: Role, descriptor: &TaskDescriptor) -> String {
    let mode = if role.family() == RoleFamily::Reviewer {
        "review"
    } else {
        "task"
    };
    format!(
        "New task #{number:04} from {sender}: {title}\n\n\
         Read the request at {request}. When done, call `complete_work` with mode \"{mode}\" \
         and your response.",
        number = descriptor.task_number,
        sender = descriptor.sender_role,
        title = descriptor.task_title,
        request = descriptor.request_file_path.display(),
    )
}

/// Message injected when a stuck or crashed worker is relaunched.
pub fn recovery_message(workspace: &Workspace, descriptor: Option<&TaskDescriptor>) -> String {
    match descriptor {
        Some(task) => format!(
            "You were restarted because you stopped making progress. Re-read {task_file} and the \
             request at {request}, review your recent history, then resume task #{number:04} ({title}) \
             where you left off.",
            task_file = workspace.task_file().display(),
            request = task.request_file_path.display(),
            number = task.task_number,
            title = task.task_title,
        ),
        None => format!(
            "You were restarted because you stopped making progress. Check {task_file} for a current \
             task, review your recent history, then continue.",
            task_file = workspace.task_file().display(),
        ),
    }
}

/// Opening message for roles that launch as soon as the host starts.
pub fn session_start_message(workspace: &Workspace) -> String {
    format!(
        "Session started for {} on branch {}. Review the state of the branch and continue coordinating.",
        workspace.role().info().display_name,
        workspace.branch()
    )
}
