// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker process launching.
//!
//! The host only depends on the [`ProcessLauncher`] and [`WorkerProcess`]
//! traits. [`TokioLauncher`] is the real implementation; tests substitute
//! fakes with scripted exit behaviour.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::signal::StopOutcome;

/// Everything needed to start one worker process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Inherit the terminal instead of detaching stdin.
    pub interactive: bool,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

/// Exit status of a finished worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A running worker process.
#[async_trait]
pub trait WorkerProcess: Send {
    /// OS process id, if the process is still known.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> std::io::Result<ExitInfo>;

    /// Interrupt, wait up to `grace`, then kill.
    async fn terminate(&mut self, grace: Duration) -> std::io::Result<StopOutcome>;

    /// Wait at most `timeout`; `None` if the process is still running.
    async fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitInfo>> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// Starts worker processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Box<dyn WorkerProcess>>;
}

/// Launcher backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Box<dyn WorkerProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if !spec.interactive {
            cmd.stdin(Stdio::null());
        }
        // Workers outlive a host that shuts down mid-task.
        cmd.kill_on_drop(false);

        let child = cmd.spawn()?;
        info!(program = %spec.program, pid = child.id(), "Spawned worker process");
        Ok(Box::new(TokioProcess { child }))
    }
}

/// A child spawned by [`TokioLauncher`].
#[derive(Debug)]
pub struct TokioProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(ExitInfo::from))
    }

    async fn wait(&mut self) -> std::io::Result<ExitInfo> {
        Ok(self.child.wait().await?.into())
    }

    async fn terminate(&mut self, grace: Duration) -> std::io::Result<StopOutcome> {
        if self.child.try_wait()?.is_some() {
            return Ok(StopOutcome::AlreadyExited);
        }

        if self.interrupt_and_wait(grace).await? {
            return Ok(StopOutcome::Graceful);
        }

        self.child.kill().await?;
        Ok(StopOutcome::Forced)
    }
}

impl TokioProcess {
    /// Returns `true` if the child exited within `grace` after an interrupt.
    #[cfg(unix)]
    async fn interrupt_and_wait(&mut self, grace: Duration) -> std::io::Result<bool> {
        let Some(pid) = self.child.id() else {
            return Ok(true);
        };
        if !super::signal::interrupt(pid)? {
            return Ok(true);
        }
        debug!(pid, "Sent interrupt to worker");

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(pid, code = ?status.code(), "Worker exited after interrupt");
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    #[cfg(not(unix))]
    async fn interrupt_and_wait(&mut self, _grace: Duration) -> std::io::Result<bool> {
        Ok(false)
    }
}
