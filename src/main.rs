// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! taskrelay entry point: worker hosts, the MCP server and thin CLI
//! wrappers around the delegation API.

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use taskrelay::api::{CompleteRequest, DelegateRequest, Relay};
use taskrelay::config::{self, CliOptions, ResolvedConfig};
use taskrelay::host::{HostOptions, SessionRegistry, WorkerHost};
use taskrelay::mcp::McpServer;
use taskrelay::process::{GitProbe, SourceControl, TokioLauncher};
use taskrelay::protocol::{CompletionMode, FeedbackCategories};
use taskrelay::telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
use taskrelay::tools::ToolRegistry;
use taskrelay::workspace::{Role, Workspace};

/// Delegate work between long-running agent processes.
#[derive(Parser)]
#[command(name = "taskrelay")]
#[command(author, version, about = "Delegate work between long-running agent processes", long_about = None)]
struct Cli {
    /// Workspaces root (default: <repo>/.taskrelay/workspaces)
    #[arg(long, global = true, env = "TASKRELAY_ROOT")]
    root: Option<PathBuf>,

    /// Show informational logs
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show debug logs
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker host for a role
    Host {
        /// Role to host
        role: Role,
        /// Branch to serve (default: the checked-out branch)
        #[arg(short, long, env = "TASKRELAY_BRANCH")]
        branch: Option<String>,
        /// Replace a running host for the same workspace without asking
        #[arg(long)]
        replace: bool,
    },

    /// Serve the relay tools over MCP on stdio
    Mcp {
        /// Caller's branch (default: the checked-out branch)
        #[arg(short, long, env = "TASKRELAY_BRANCH")]
        branch: Option<String>,
    },

    /// Delegate a task and wait for the response
    Delegate {
        /// Sending role
        #[arg(long = "from", env = "TASKRELAY_ROLE")]
        sender: Role,
        /// Target role
        #[arg(long = "to")]
        target: Role,
        #[arg(long)]
        title: String,
        /// Task description (read from stdin when omitted)
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,
        #[arg(long)]
        content_file: Option<PathBuf>,
        #[arg(short, long, env = "TASKRELAY_BRANCH")]
        branch: Option<String>,
        /// External task id; omit for an ad-hoc request
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        feature_id: Option<String>,
        /// Start the target with a fresh conversation
        #[arg(long)]
        reset_memory: bool,
        /// Seconds to wait for the response
        #[arg(long)]
        timeout: Option<u64>,
        /// Write the request and return without waiting
        #[arg(long)]
        no_wait: bool,
    },

    /// Report the current task or review as done
    Complete {
        #[arg(long, env = "TASKRELAY_ROLE")]
        role: Role,
        #[arg(long, value_enum, default_value = "task")]
        mode: ModeArg,
        /// Response body (read from stdin when omitted)
        #[arg(long, conflicts_with = "response_file")]
        response: Option<String>,
        #[arg(long)]
        response_file: Option<PathBuf>,
        /// Feedback item as `category=text`; repeatable
        #[arg(long = "feedback", value_name = "CATEGORY=TEXT")]
        feedback: Vec<String>,
        #[arg(short, long, env = "TASKRELAY_BRANCH")]
        branch: Option<String>,
        /// Request number to answer (default: the current task)
        #[arg(long)]
        task_number: Option<u32>,
    },

    /// List or stop hosted workers
    Workers {
        #[command(subcommand)]
        action: Option<WorkersAction>,
        #[arg(short, long, env = "TASKRELAY_BRANCH")]
        branch: Option<String>,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Task,
    Review,
}

impl From<ModeArg> for CompletionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Task => CompletionMode::Task,
            ModeArg::Review => CompletionMode::Review,
        }
    }
}

#[derive(Subcommand)]
enum WorkersAction {
    /// List workspaces with a host, a worker or a task
    List {
        #[arg(long)]
        json: bool,
    },
    /// Stop a worker by id (`role@branch`, or `role`)
    Kill { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir()?;
    let repo = config::find_workspace_root(&cwd).unwrap_or(cwd);

    let cli_options = CliOptions {
        root: cli.root.clone(),
        ..Default::default()
    };
    let config = config::load_config(&repo, cli_options)?;
    let _guard = init_tracing(&cli, &config)?;

    match cli.command {
        Commands::Host { role, branch, replace } => {
            let branch = resolve_branch(&repo, branch, role.is_branch_agnostic()).await?;
            let workspace = Workspace::resolve(&config.root, role, &branch);
            let options = HostOptions {
                replace,
                interactive: std::io::stdin().is_terminal(),
            };
            let host = WorkerHost::new(
                workspace,
                config,
                Arc::new(TokioLauncher),
                Arc::new(GitProbe::new(&repo)),
                SessionRegistry::new(),
                options,
            );
            host.run().await?;
        }
        Commands::Mcp { branch } => {
            let branch = resolve_branch(&repo, branch, false).await?;
            let server = McpServer::new(ToolRegistry::for_relay(Relay::new(config, branch)));
            tokio::select! {
                result = server.serve_stdio() => result?,
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Commands::Delegate {
            sender,
            target,
            title,
            content,
            content_file,
            branch,
            task_id,
            feature_id,
            reset_memory,
            timeout,
            no_wait,
        } => {
            let caller = resolve_branch(&repo, branch, false).await?;
            let content = read_text(content, content_file.as_deref(), "content")?;
            let relay = Relay::new(config, caller);
            let mut request = DelegateRequest::new(sender, target, title, content);
            request.task_id = task_id;
            request.feature_id = feature_id;
            request.reset_memory = reset_memory;
            request.timeout = timeout.map(Duration::from_secs);

            if no_wait {
                let submission = relay.submit(&request)?;
                println!(
                    "{} request #{:04} for {} ({:?}): {}",
                    "→".cyan(),
                    submission.request_number,
                    target,
                    submission.status,
                    submission.request_path.display()
                );
            } else {
                let outcome = relay.delegate(request).await?;
                println!("{}", outcome.summary());
            }
        }
        Commands::Complete {
            role,
            mode,
            response,
            response_file,
            feedback,
            branch,
            task_number,
        } => {
            let caller = resolve_branch(&repo, branch, role.is_branch_agnostic()).await?;
            let request = CompleteRequest {
                mode: mode.into(),
                role,
                response: read_text(response, response_file.as_deref(), "response")?,
                branch: String::new(),
                feedback: parse_feedback(&feedback)?,
                task_number,
            };
            let receipt = Relay::new(config, caller).complete_work(&request)?;
            println!("{} {}", "✓".green(), receipt.summary());
        }
        Commands::Workers { action, branch } => {
            let caller = resolve_branch(&repo, branch, true).await?;
            let relay = Relay::new(config, caller);
            match action {
                Some(WorkersAction::List { json }) => print_workers(&relay, json)?,
                None => print_workers(&relay, false)?,
                Some(WorkersAction::Kill { id }) => {
                    let outcome = relay.terminate_worker(&id).await?;
                    println!("{}", outcome.summary());
                }
            }
        }
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },
        Commands::Init => {
            let path = config::init_config(&repo, Some(config::get_example_config()))?;
            println!("Created config file: {}", path.display());
        }
    }
    Ok(())
}

fn init_tracing(cli: &Cli, config: &ResolvedConfig) -> anyhow::Result<TelemetryGuard> {
    let telemetry = if cli.debug {
        TelemetryConfig::development()
    } else if cli.verbose {
        TelemetryConfig::from_level_name("info")
    } else {
        TelemetryConfig::from_level_name(&config.log_level)
    };
    let telemetry = match cli.command {
        Commands::Mcp { .. } => telemetry.for_mcp(),
        _ => telemetry,
    };
    Ok(init_telemetry(&telemetry)?)
}

/// `--branch`, else the checked-out branch. Shared roles fall back to
/// `main` outside a git checkout.
async fn resolve_branch(repo: &Path, branch: Option<String>, optional: bool) -> anyhow::Result<String> {
    if let Some(branch) = branch.filter(|b| !b.trim().is_empty()) {
        return Ok(branch);
    }
    match GitProbe::new(repo).current_branch().await {
        Some(branch) => Ok(branch),
        None if optional => Ok("main".to_string()),
        None => bail!("could not determine the current branch; pass --branch"),
    }
}

fn read_text(inline: Option<String>, file: Option<&Path>, what: &str) -> anyhow::Result<String> {
    if let Some(text) = inline {
        return Ok(text);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(path).with_context(|| format!("reading {what} from {}", path.display()));
    }
    if std::io::stdin().is_terminal() {
        bail!("no {what} given; pass --{what}, --{what}-file or pipe it on stdin");
    }
    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text)?;
    Ok(text)
}

fn parse_feedback(items: &[String]) -> anyhow::Result<FeedbackCategories> {
    let mut feedback = FeedbackCategories::new();
    for item in items {
        let Some((category, text)) = item.split_once('=') else {
            bail!("feedback must look like category=text, got {item:?}");
        };
        feedback
            .entry(category.trim().to_string())
            .or_default()
            .push(text.trim().to_string());
    }
    Ok(feedback)
}

fn print_workers(relay: &Relay, json: bool) -> anyhow::Result<()> {
    let workers = relay.list_workers()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&workers)?);
        return Ok(());
    }
    if workers.is_empty() {
        println!("{}", "No workers found.".dimmed());
        return Ok(());
    }
    for worker in workers {
        let host = match (worker.host_pid, worker.host_alive) {
            (Some(pid), true) => format!("host {pid}").green(),
            (Some(pid), false) => format!("host {pid} (stale)").yellow(),
            (None, _) => "no host".dimmed(),
        };
        let child = match (worker.worker_pid, worker.worker_alive) {
            (Some(pid), true) => format!("worker {pid}").green(),
            (Some(pid), false) => format!("worker {pid} (stale)").yellow(),
            (None, _) => "no worker".dimmed(),
        };
        let task = match (worker.task_number, worker.task_title) {
            (Some(n), Some(title)) => format!("#{n:04} {title}"),
            _ => "idle".to_string(),
        };
        println!("{:<32} {:<22} {:<24} {}", worker.id.bold(), host, child, task);
    }
    Ok(())
}
