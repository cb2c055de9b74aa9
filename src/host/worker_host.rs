// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The worker-host state machine.
//!
//! One host runs per (role, branch). It waits for request files addressed
//! to its role, launches the worker for each one, supervises it until the
//! response appears, then returns to idle:
//!
//! ```text
//! Idle ──request──▶ Launching ──pid──▶ Monitoring ──response/exit/timeout──▶ Completing ──▶ Idle
//!   │                                                                                      ▲
//!   └──────────── manual command ──▶ ManualControl ──exit/preempted───────────────────────┘
//! ```
//!
//! Every wait is a `select!` over whichever happens first: ctrl-c, a file
//! notification, terminal input, a worker exit or the poll interval.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::Instant as TokioInstant;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use tracing::{debug, error, info, warn};

use crate::config::ResolvedConfig;
use crate::error::{HealthError, HostError, ProtocolError};
use crate::health::{
    ActivityWindows, HealthMonitor, Preemption, RestartPolicy, RoleActivity, Supervisor, SupervisorEvent,
    SupervisorOptions,
};
use crate::process::{
    terminate_pid, ExitInfo, FileWatcher, LaunchSpec, LivenessMarker, LivenessState, ProcessLauncher, SourceControl,
};
use crate::protocol::{
    glob_for, CompletionMode, MessageEntry, MessageKind, MessageStore, RequestHeader, TaskDescriptor, WorkflowEvent,
    WorkflowLog,
};
use crate::telemetry::Counter;
use crate::workspace::{LaunchMode, Role, SessionMode, Workspace};

use super::command::{worker_launch, LaunchContext};
use super::heartbeat::{send_heartbeat, Heartbeat, HeartbeatOutcome};
use super::input::{confirm, next_command, InputCommand, InputListener};
use super::prompt::{recovery_message, session_start_message, task_message, write_system_prompt};
use super::session::{SessionIdentity, SessionRegistry};
use super::state::{announce, HostState, StatusKind};

/// Requester recorded on failure responses to requests whose header
/// cannot be read.
const UNKNOWN_REQUESTER: Role = Role::Coordinator;

/// Host start-up options.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostOptions {
    /// Terminate a live host for the same workspace without asking.
    pub replace: bool,
    /// Allow terminal prompts and the manual-control listener.
    pub interactive: bool,
}

/// Whether the host keeps running after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

enum IdleEvent {
    Shutdown,
    Notified(Option<PathBuf>),
    Input(Option<InputCommand>),
    Tick,
}

enum SessionEvent {
    Shutdown,
    Exited(std::io::Result<ExitInfo>),
    Notified,
    Tick,
    Deadline,
}

/// How a supervised session ended.
#[derive(Debug)]
enum SessionEnd {
    Responded(PathBuf),
    /// The worker exited cleanly with no response expected.
    Finished(ExitInfo),
    Preempted,
    Exhausted(HealthError),
    TimedOut,
    Shutdown,
}

/// What a supervised session is waiting for.
struct AwaitResponse {
    number: u32,
    watcher: FileWatcher,
    deadline: TokioInstant,
}

pub struct WorkerHost {
    workspace: Workspace,
    config: ResolvedConfig,
    launcher: Arc<dyn ProcessLauncher>,
    vcs: Arc<dyn SourceControl>,
    registry: SessionRegistry,
    options: HostOptions,
    store: MessageStore,
    workflow: WorkflowLog,
    host_marker: LivenessMarker,
    worker_marker: LivenessMarker,
    identity: SessionIdentity,
    heartbeat: Option<Heartbeat>,
    /// Requests given up on during this run, skipped even if their
    /// abandonment marker could not be written.
    abandoned: HashSet<u32>,
}

impl WorkerHost {
    pub fn new(
        workspace: Workspace,
        config: ResolvedConfig,
        launcher: Arc<dyn ProcessLauncher>,
        vcs: Arc<dyn SourceControl>,
        registry: SessionRegistry,
        options: HostOptions,
    ) -> Self {
        let heartbeat = config
            .timing
            .heartbeat_interval()
            .map(|interval| Heartbeat::new(interval, Instant::now()));
        Self {
            store: MessageStore::for_workspace(&workspace),
            workflow: WorkflowLog::new(workspace.workflow_log()),
            host_marker: LivenessMarker::new(workspace.host_pid_file()),
            worker_marker: LivenessMarker::new(workspace.worker_pid_file()),
            identity: SessionIdentity::for_workspace(&workspace),
            workspace,
            config,
            launcher,
            vcs,
            registry,
            options,
            heartbeat,
            abandoned: HashSet::new(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run until ctrl-c.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(role = %self.workspace.role(), branch = %self.workspace.branch())))]
    pub async fn run(mut self) -> Result<(), HostError> {
        self.claim().await?;
        std::fs::create_dir_all(self.workspace.agent_dir())?;
        self.registry.register(&self.workspace).await;
        info!(key = %self.workspace.key(), pid = std::process::id(), "Host started");
        announce(&self.workspace, StatusKind::Info, "host started");

        let pattern = glob_for(self.workspace.role(), MessageKind::Request);
        let mut requests = FileWatcher::watch(&self.workspace.messages_dir(), &pattern)?;

        let flow = if self.workspace.role().launch_mode() == LaunchMode::Immediate {
            self.run_immediate().await?
        } else {
            Flow::Continue
        };

        let mut input = if self.options.interactive {
            InputListener::spawn()
        } else {
            None
        };
        if input.is_some() {
            announce(
                &self.workspace,
                StatusKind::Info,
                "type 'm' + Enter for manual control, 'a' to toggle activity output, 's' for status",
            );
        }

        if flow == Flow::Continue {
            self.idle_loop(&mut requests, &mut input).await?;
        }
        self.shutdown().await;
        Ok(())
    }

    /// Refuse to run next to another live host for the same workspace.
    async fn claim(&self) -> Result<(), HostError> {
        if let LivenessState::Live(pid) = self.host_marker.reclaim_if_stale() {
            if pid != std::process::id() {
                let question = format!(
                    "Another host for {} is running (pid {pid}). Terminate it?",
                    self.workspace.key()
                );
                if !(self.options.replace || (self.options.interactive && confirm(&question))) {
                    return Err(HostError::AlreadyRunning {
                        role: self.workspace.role().to_string(),
                        branch: self.workspace.branch().to_string(),
                        pid,
                    });
                }
                let outcome = terminate_pid(pid, self.config.timing.grace_period()).await?;
                info!(pid, ?outcome, "Replaced running host");
            }
        }
        self.host_marker.claim()?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.registry.set_state(&self.workspace, HostState::Stopped).await;
        if let Err(e) = self.host_marker.release(std::process::id()) {
            warn!(error = %e, "Failed to remove host marker");
        }
        if let LivenessState::Stale(_) = self.worker_marker.reclaim_if_stale() {
            debug!("Removed worker marker of exited worker");
        }
        announce(&self.workspace, StatusKind::Info, "host stopped");
        info!(key = %self.workspace.key(), "Host stopped");
    }

    async fn idle_loop(
        &mut self,
        requests: &mut FileWatcher,
        input: &mut Option<InputListener>,
    ) -> Result<(), HostError> {
        let poll = self.config.timing.poll_interval();
        let mut announced = false;

        loop {
            // Unanswered requests always win over waiting for new ones.
            if let Some(entry) = self.next_pending()? {
                announced = false;
                if self.process_request(entry).await? == Flow::Shutdown {
                    return Ok(());
                }
                continue;
            }

            if !announced {
                self.registry.set_state(&self.workspace, HostState::Idle).await;
                announce(&self.workspace, StatusKind::Info, "idle, waiting for requests");
                announced = true;
            }

            let event = tokio::select! {
                _ = tokio::signal::ctrl_c() => IdleEvent::Shutdown,
                path = requests.next() => IdleEvent::Notified(path),
                command = next_command(input) => IdleEvent::Input(command),
                _ = tokio::time::sleep(poll) => IdleEvent::Tick,
            };

            match event {
                IdleEvent::Shutdown => return Ok(()),
                IdleEvent::Notified(Some(path)) => {
                    debug!(path = %path.display(), "Request notification");
                }
                IdleEvent::Notified(None) => {
                    warn!("Request watcher closed; re-registering");
                    let pattern = glob_for(self.workspace.role(), MessageKind::Request);
                    *requests = FileWatcher::watch(&self.workspace.messages_dir(), &pattern)?;
                }
                IdleEvent::Input(None) => {
                    debug!("Terminal input closed");
                    *input = None;
                }
                IdleEvent::Input(Some(command)) => {
                    let flow = self.handle_command(command).await?;
                    if let Some(listener) = input.as_ref() {
                        listener.resume();
                    }
                    announced = false;
                    if flow == Flow::Shutdown {
                        return Ok(());
                    }
                }
                IdleEvent::Tick => self.maybe_heartbeat().await,
            }
        }
    }

    /// Oldest unanswered request the host has not already given up on.
    fn next_pending(&self) -> Result<Option<MessageEntry>, HostError> {
        let role = self.workspace.role();
        Ok(self
            .store
            .unprocessed_requests(role)?
            .into_iter()
            .find(|e| {
                let number = e.name.number;
                !self.abandoned.contains(&number) && !self.store.is_abandoned(role, number)
            }))
    }

    async fn handle_command(&mut self, command: InputCommand) -> Result<Flow, HostError> {
        match command {
            InputCommand::Manual => self.run_manual(String::new()).await,
            InputCommand::ToggleActivity => {
                let on = self.registry.toggle_show_activity();
                let state = if on { "on" } else { "off" };
                announce(&self.workspace, StatusKind::Info, &format!("activity output {state}"));
                Ok(Flow::Continue)
            }
            InputCommand::Status => {
                for info in self.registry.snapshot().await {
                    let title = info.task_title.as_deref().unwrap_or("-");
                    println!("  {:<32} {:<20} restarts={} {}", info.key, info.state.to_string(), info.restarts, title);
                }
                println!("{}", self.registry.metrics().snapshot().format_report());
                Ok(Flow::Continue)
            }
        }
    }

    /// Launch the session that immediate-launch roles start with.
    async fn run_immediate(&mut self) -> Result<Flow, HostError> {
        let message = session_start_message(&self.workspace);
        match self.workspace.role().info().immediate_session {
            SessionMode::Manual => self.run_manual(message).await,
            SessionMode::Supervised => {
                let (ctx, _) = self.launch_context(message, false)?;
                let recovery = self.recovery_spec(None, &ctx);
                let spec = worker_launch(&self.config.worker, &self.workspace, &ctx);
                let Some(supervisor) = self.start_supervised(&spec, recovery).await? else {
                    return Ok(Flow::Continue);
                };
                let end = self.supervise(supervisor, None).await?;
                self.finish_session(None, end).await
            }
        }
    }

    /// Process one request from launch to completion.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, entry), fields(task_number = entry.name.number)))]
    async fn process_request(&mut self, entry: MessageEntry) -> Result<Flow, HostError> {
        let number = entry.name.number;
        let role = self.workspace.role();

        let header = match self.store.read_request(&entry.path) {
            Ok((header, _)) => header,
            Err(ProtocolError::MalformedHeader(path)) => {
                self.reject_malformed(number, &path)?;
                return Ok(Flow::Continue);
            }
            Err(e) => return Err(e.into()),
        };

        let descriptor = self.ensure_descriptor(&header, &entry.path)?;
        announce(
            &self.workspace,
            StatusKind::Received,
            &format!("received #{number:04} {} from {}", header.title, header.from),
        );
        self.workflow
            .record(WorkflowEvent::Received, role, Some(number), &header.title);
        self.registry
            .update(&self.workspace, |info| {
                info.state = HostState::Launching {
                    task_number: Some(number),
                };
                info.task_title = Some(header.title.clone());
                info.restarts = 0;
            })
            .await;

        let started = Instant::now();
        let (ctx, _) = self.launch_context(task_message(role, &descriptor), false)?;
        let recovery = self.recovery_spec(Some(&descriptor), &ctx);
        let spec = worker_launch(&self.config.worker, &self.workspace, &ctx);

        let Some(supervisor) = self.start_supervised(&spec, recovery).await? else {
            self.abandon(number, WorkflowEvent::Exhausted, "worker failed to launch")?;
            return Ok(Flow::Continue);
        };

        let response_glob = format!("{number:04}.{role}.response.*.md");
        let wait = AwaitResponse {
            number,
            watcher: FileWatcher::watch(&self.workspace.messages_dir(), &response_glob)?,
            deadline: TokioInstant::now() + self.config.timing.response_timeout(),
        };
        let end = self.supervise(supervisor, Some(wait)).await?;

        let flow = self.finish_session(Some(number), end).await?;
        self.registry
            .metrics()
            .record_operation("task", started.elapsed());
        if let Some(beat) = self.heartbeat.as_mut() {
            beat.reset(Instant::now());
        }
        Ok(flow)
    }

    /// Answer a request that has no readable header so its sender is not
    /// left waiting.
    fn reject_malformed(&self, number: u32, path: &std::path::Path) -> Result<(), HostError> {
        let role = self.workspace.role();
        error!(path = %path.display(), "Request has a malformed header");
        announce(
            &self.workspace,
            StatusKind::Failed,
            &format!("rejected #{number:04}: malformed request header"),
        );
        let body = format!(
            "Request #{number:04} could not be processed: its header block is missing or malformed. \
             Re-send it with a valid header."
        );
        self.store
            .write_response(role, number, UNKNOWN_REQUESTER, CompletionMode::Task, &body)?;
        self.workflow
            .record(WorkflowEvent::Exhausted, role, Some(number), "malformed request header");
        Ok(())
    }

    /// The current descriptor for this request, written if missing.
    fn ensure_descriptor(&self, header: &RequestHeader, path: &std::path::Path) -> Result<TaskDescriptor, HostError> {
        let _lock = self.store.lock_submissions()?;
        let task_file = self.workspace.task_file();
        if let Some(existing) = TaskDescriptor::load(&task_file) {
            if existing.task_number == header.request_number {
                return Ok(existing);
            }
            debug!(
                stale = existing.task_number,
                current = header.request_number,
                "Replacing descriptor of another task"
            );
        }

        let descriptor = TaskDescriptor {
            task_number: header.request_number,
            request_file_path: path.to_path_buf(),
            started_at: Utc::now(),
            attempt: header.attempt,
            feature_id: header.feature_id.clone(),
            task_id: header
                .task_id
                .clone()
                .unwrap_or_else(|| format!("adhoc-{:04}", header.request_number)),
            task_title: header.title.clone(),
            sender_role: header.from,
        };
        descriptor.save(&task_file)?;
        Ok(descriptor)
    }

    /// Session id and system prompt for a launch.
    fn launch_context(&self, message: String, interactive: bool) -> Result<(LaunchContext, bool), HostError> {
        let (session_id, resume) = self.identity.load_or_create()?;
        let (system_prompt_file, system_prompt) =
            match write_system_prompt(&self.workspace, &self.config.prompts) {
                Ok(written) => written,
                Err(e) => {
                    warn!(error = %e, "Failed to compose system prompt; launching without rules");
                    (self.workspace.system_prompt_file(), String::new())
                }
            };
        let ctx = LaunchContext {
            session_id,
            resume,
            system_prompt,
            system_prompt_file,
            message,
            interactive,
        };
        Ok((ctx, resume))
    }

    /// Relaunch command: always resumes the conversation with a recovery
    /// message.
    fn recovery_spec(&self, descriptor: Option<&TaskDescriptor>, ctx: &LaunchContext) -> LaunchSpec {
        let recovery = LaunchContext {
            resume: true,
            message: recovery_message(&self.workspace, descriptor),
            interactive: false,
            ..ctx.clone()
        };
        worker_launch(&self.config.worker, &self.workspace, &recovery)
    }

    /// Spawn a supervised worker and wait out the startup delay.
    ///
    /// The worker marker is written as soon as the process handle exists,
    /// so a crash during startup is still visible to peers.
    /// `None` when the process could not be spawned at all.
    async fn start_supervised(
        &self,
        spec: &LaunchSpec,
        recovery: LaunchSpec,
    ) -> Result<Option<Supervisor>, HostError> {
        let process = match self.launcher.launch(spec).await {
            Ok(p) => p,
            Err(e) => {
                error!(program = %spec.program, error = %e, "Failed to launch worker");
                announce(
                    &self.workspace,
                    StatusKind::Failed,
                    &format!("could not launch {}: {e}", spec.program),
                );
                return Ok(None);
            }
        };

        let role = self.workspace.role();
        let policy = RestartPolicy::for_role(role, &self.config.health, &self.config.timing);
        let activity = RoleActivity::new(
            &self.workspace,
            self.vcs.clone(),
            ActivityWindows::from(&self.config.health),
        );
        let monitor = HealthMonitor::supervised(role, policy, Arc::new(activity), Instant::now());
        let mut supervisor =
            Supervisor::attach(process, self.launcher.clone(), monitor, self.supervisor_options(recovery));

        tokio::time::sleep(self.config.timing.startup_delay()).await;
        if let Some(exit) = supervisor.peek_exit()? {
            if !exit.success() {
                warn!(code = ?exit.code, "Worker exited during startup");
            }
        }
        Ok(Some(supervisor))
    }

    fn supervisor_options(&self, recovery: LaunchSpec) -> SupervisorOptions {
        SupervisorOptions {
            recovery,
            grace: self.config.timing.grace_period(),
            marker: self.worker_marker.clone(),
        }
    }

    /// Monitor a supervised worker until it answers, fails or finishes.
    async fn supervise(
        &mut self,
        mut supervisor: Supervisor,
        mut response: Option<AwaitResponse>,
    ) -> Result<SessionEnd, HostError> {
        let number = response.as_ref().map(|r| r.number);
        let deadline_at = response.as_ref().map(|r| r.deadline);
        let mut ticker = tokio::time::interval(self.config.timing.poll_interval());
        ticker.tick().await;

        self.registry
            .set_state(
                &self.workspace,
                HostState::Monitoring {
                    task_number: number,
                    pid: supervisor.pid(),
                },
            )
            .await;

        loop {
            if let Some(path) = self.response_for(number)? {
                supervisor.stop().await?;
                return Ok(SessionEnd::Responded(path));
            }

            let event = {
                let notified = async {
                    match response.as_mut() {
                        Some(wait) => {
                            wait.watcher.next().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };
                let deadline = async {
                    match deadline_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => SessionEvent::Shutdown,
                    exit = supervisor.wait_exit() => SessionEvent::Exited(exit),
                    _ = notified => SessionEvent::Notified,
                    _ = ticker.tick() => SessionEvent::Tick,
                    _ = deadline => SessionEvent::Deadline,
                }
            };

            let outcome = match event {
                SessionEvent::Shutdown => return Ok(SessionEnd::Shutdown),
                SessionEvent::Notified => continue,
                SessionEvent::Deadline => {
                    if let Some(path) = self.response_for(number)? {
                        supervisor.stop().await?;
                        return Ok(SessionEnd::Responded(path));
                    }
                    supervisor.stop().await?;
                    return Ok(SessionEnd::TimedOut);
                }
                SessionEvent::Exited(exit) => {
                    let exit = exit.unwrap_or_else(|e| {
                        warn!(error = %e, "Failed to wait for worker");
                        ExitInfo { code: None }
                    });
                    if let Some(path) = self.response_for(number)? {
                        supervisor.stop().await?;
                        return Ok(SessionEnd::Responded(path));
                    }
                    if number.is_none() && exit.success() {
                        supervisor.stop().await?;
                        return Ok(SessionEnd::Finished(exit));
                    }
                    supervisor.on_exit(exit, Instant::now()).await?
                }
                SessionEvent::Tick => supervisor.check(Instant::now()).await?,
            };

            if let Some(end) = self.on_supervisor_event(&supervisor, number, outcome).await {
                return Ok(end);
            }
        }
    }

    fn response_for(&self, number: Option<u32>) -> Result<Option<PathBuf>, HostError> {
        match number {
            Some(n) => Ok(self.store.find_response(self.workspace.role(), n)?),
            None => Ok(None),
        }
    }

    async fn on_supervisor_event(
        &self,
        supervisor: &Supervisor,
        number: Option<u32>,
        event: SupervisorEvent,
    ) -> Option<SessionEnd> {
        let role = self.workspace.role();
        match event {
            SupervisorEvent::Healthy => {
                if self.registry.show_activity() {
                    announce(
                        &self.workspace,
                        StatusKind::Info,
                        &format!("activity check: healthy (restarts {})", supervisor.restarts()),
                    );
                }
                None
            }
            SupervisorEvent::CoolingDown { remaining } => {
                debug!(remaining_secs = remaining.as_secs(), "Restart waiting for cooldown");
                None
            }
            SupervisorEvent::Restarted { restarts, pid } => {
                announce(
                    &self.workspace,
                    StatusKind::Restarting,
                    &format!("restarting worker (restart {restarts})"),
                );
                self.workflow
                    .record(WorkflowEvent::Restarted, role, number, &format!("restart {restarts}"));
                self.registry.metrics().increment(Counter::Restarts);
                self.registry
                    .update(&self.workspace, |info| {
                        info.restarts = restarts;
                        info.state = HostState::Monitoring { task_number: number, pid };
                    })
                    .await;
                None
            }
            SupervisorEvent::Exhausted(err) => Some(SessionEnd::Exhausted(err)),
            SupervisorEvent::Escalated(err) => {
                announce(&self.workspace, StatusKind::Failed, &err.to_string());
                None
            }
            SupervisorEvent::Preempted => Some(SessionEnd::Preempted),
            SupervisorEvent::Finished(exit) => Some(SessionEnd::Finished(exit)),
        }
    }

    /// Completing: report the outcome and clean up per-task state.
    async fn finish_session(&mut self, number: Option<u32>, end: SessionEnd) -> Result<Flow, HostError> {
        let role = self.workspace.role();
        let label = number.map(|n| format!("#{n:04}")).unwrap_or_else(|| "session".to_string());
        self.registry
            .set_state(&self.workspace, HostState::Completing { task_number: number })
            .await;

        let mut recorded = Ok(());
        let flow = match end {
            SessionEnd::Responded(path) => {
                info!(response = %path.display(), "Response observed");
                self.clear_descriptor(number);
                self.workflow.record(WorkflowEvent::Completed, role, number, "");
                self.registry.metrics().increment(Counter::Responses);
                announce(&self.workspace, StatusKind::Completed, &format!("completed {label}"));
                Flow::Continue
            }
            SessionEnd::Finished(exit) => {
                announce(
                    &self.workspace,
                    StatusKind::Completed,
                    &format!("{label} ended (exit {})", exit.code.map_or("-".to_string(), |c| c.to_string())),
                );
                Flow::Continue
            }
            SessionEnd::Preempted => {
                announce(&self.workspace, StatusKind::Info, "session preempted for queued work");
                Flow::Continue
            }
            SessionEnd::Exhausted(err) => {
                if let Some(n) = number {
                    recorded = self.abandon(n, WorkflowEvent::Exhausted, &err.to_string());
                }
                self.registry.metrics().increment(Counter::Exhausted);
                announce(&self.workspace, StatusKind::Failed, &format!("failed {label}: {err}"));
                Flow::Continue
            }
            SessionEnd::TimedOut => {
                if let Some(n) = number {
                    recorded = self.abandon(n, WorkflowEvent::Timeout, "no response before the time limit");
                }
                self.registry.metrics().increment(Counter::Timeouts);
                announce(&self.workspace, StatusKind::Failed, &format!("timed out {label}"));
                Flow::Continue
            }
            SessionEnd::Shutdown => Flow::Shutdown,
        };

        self.registry
            .update(&self.workspace, |info| {
                info.state = HostState::Idle;
                info.task_title = None;
            })
            .await;
        recorded?;
        Ok(flow)
    }

    /// Give up on a request: record why, drop its descriptor so the next
    /// request can run and leave an abandonment marker for callers.
    ///
    /// The request is skipped for the rest of this run even when the
    /// marker cannot be written; the write error is still returned.
    fn abandon(&mut self, number: u32, event: WorkflowEvent, detail: &str) -> Result<(), HostError> {
        let role = self.workspace.role();
        self.abandoned.insert(number);
        self.workflow.record(event, role, Some(number), detail);
        self.clear_descriptor(Some(number));
        self.store.mark_abandoned(role, number, detail)?;
        Ok(())
    }

    /// Drop the task descriptor unless it names a request other than
    /// `number`.
    fn clear_descriptor(&self, number: Option<u32>) {
        let _lock = match self.store.lock_submissions() {
            Ok(lock) => lock,
            Err(e) => {
                warn!(error = %e, "Failed to lock submissions; leaving descriptor");
                return;
            }
        };
        let task_file = self.workspace.task_file();
        if let (Some(number), Some(current)) = (number, TaskDescriptor::load(&task_file)) {
            if current.task_number != number {
                debug!(current = current.task_number, number, "Descriptor names another task; keeping it");
                return;
            }
        }
        if let Err(e) = TaskDescriptor::clear(&task_file) {
            warn!(error = %e, "Failed to clear task descriptor");
        }
    }

    /// Hand the worker to the human at the terminal.
    ///
    /// The session is never restarted. It is stopped early only when a
    /// task descriptor appears and the checkout has been quiet.
    async fn run_manual(&mut self, message: String) -> Result<Flow, HostError> {
        let (ctx, _) = self.launch_context(message, true)?;
        let spec = worker_launch(&self.config.worker, &self.workspace, &ctx);

        let process = match self.launcher.launch(&spec).await {
            Ok(p) => p,
            Err(e) => {
                error!(program = %spec.program, error = %e, "Failed to launch manual session");
                announce(
                    &self.workspace,
                    StatusKind::Failed,
                    &format!("could not launch {}: {e}", spec.program),
                );
                return Ok(Flow::Continue);
            }
        };

        let role = self.workspace.role();
        let policy = RestartPolicy::for_role(role, &self.config.health, &self.config.timing);
        let preemption = Preemption::new(
            self.workspace.task_file(),
            self.vcs.clone(),
            ActivityWindows::from(&self.config.health).activity,
        );
        let monitor = HealthMonitor::manual(role, policy, Some(preemption), Instant::now());
        let mut supervisor = Supervisor::attach(process, self.launcher.clone(), monitor, self.supervisor_options(spec));

        announce(&self.workspace, StatusKind::Info, "manual control started");
        self.registry
            .set_state(&self.workspace, HostState::ManualControl { pid: supervisor.pid() })
            .await;

        let mut ticker = tokio::time::interval(self.config.timing.poll_interval());
        ticker.tick().await;
        loop {
            let event = tokio::select! {
                _ = tokio::signal::ctrl_c() => SessionEvent::Shutdown,
                exit = supervisor.wait_exit() => SessionEvent::Exited(exit),
                _ = ticker.tick() => SessionEvent::Tick,
            };
            let outcome = match event {
                SessionEvent::Shutdown => {
                    // The interactive worker received the same interrupt.
                    supervisor.stop().await?;
                    return self.finish_session(None, SessionEnd::Shutdown).await;
                }
                SessionEvent::Exited(exit) => {
                    let exit = exit.unwrap_or(ExitInfo { code: None });
                    supervisor.on_exit(exit, Instant::now()).await?
                }
                SessionEvent::Tick => supervisor.check(Instant::now()).await?,
                SessionEvent::Notified | SessionEvent::Deadline => continue,
            };
            if let Some(end) = self.on_supervisor_event(&supervisor, None, outcome).await {
                return self.finish_session(None, end).await;
            }
        }
    }

    /// Keep an idle conversation warm.
    async fn maybe_heartbeat(&mut self) {
        let now = Instant::now();
        let due = self.heartbeat.as_ref().is_some_and(|b| b.is_due(now));
        if !due || self.identity.load().is_none() || self.workspace.task_file().exists() {
            return;
        }
        if let Some(beat) = self.heartbeat.as_mut() {
            beat.reset(now);
        }

        let message = self.config.worker.heartbeat_message.clone();
        let ctx = match self.launch_context(message, false) {
            Ok((ctx, _)) => ctx,
            Err(e) => {
                debug!(error = %e, "Skipping heartbeat");
                return;
            }
        };
        let spec = worker_launch(&self.config.worker, &self.workspace, &ctx);
        let timing = &self.config.timing;
        let bound = timing.grace_period() + timing.poll_interval();

        match send_heartbeat(self.launcher.as_ref(), &spec, bound, timing.grace_period()).await {
            Ok(HeartbeatOutcome::Answered(exit)) if exit.success() => {
                debug!(key = %self.workspace.key(), "Heartbeat sent")
            }
            Ok(outcome) => warn!(?outcome, "Heartbeat did not complete cleanly"),
            Err(e) => warn!(error = %e, "Heartbeat failed to launch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::process::{StopOutcome, WorkerProcess};
    use crate::protocol::NewRequest;

    /// A worker that writes the response for its task and exits.
    struct Responder {
        store: MessageStore,
        role: Role,
        respond: bool,
        exit_code: i32,
        launches: AtomicU32,
        specs: Mutex<Vec<LaunchSpec>>,
    }

    struct Done {
        exit: ExitInfo,
    }

    #[async_trait]
    impl WorkerProcess for Done {
        fn id(&self) -> Option<u32> {
            Some(4242)
        }
        fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>> {
            Ok(Some(self.exit))
        }
        async fn wait(&mut self) -> std::io::Result<ExitInfo> {
            Ok(self.exit)
        }
        async fn terminate(&mut self, _grace: Duration) -> std::io::Result<StopOutcome> {
            Ok(StopOutcome::AlreadyExited)
        }
    }

    #[async_trait]
    impl ProcessLauncher for Responder {
        async fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Box<dyn WorkerProcess>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.specs.lock().unwrap().push(spec.clone());
            if self.respond {
                for entry in self.store.unprocessed_requests(self.role).unwrap() {
                    self.store
                        .write_response(self.role, entry.name.number, Role::Coordinator, CompletionMode::Task, "done")
                        .unwrap();
                }
            }
            Ok(Box::new(Done {
                exit: ExitInfo {
                    code: Some(self.exit_code),
                },
            }))
        }
    }

    struct QuietVcs;

    #[async_trait]
    impl SourceControl for QuietVcs {
        async fn has_uncommitted_changes(&self) -> bool {
            false
        }
        async fn last_change_time(&self) -> Option<chrono::DateTime<Utc>> {
            None
        }
        async fn current_branch(&self) -> Option<String> {
            Some("feature-x".to_string())
        }
    }

    fn config(root: &std::path::Path) -> ResolvedConfig {
        let mut config = ResolvedConfig::default().anchored(root);
        config.root = root.join("ws");
        config.timing.startup_delay_secs = 0;
        config.timing.poll_interval_secs = 1;
        config.timing.restart_cooldown_secs = 0;
        config.timing.response_timeout_secs = 30;
        config
    }

    fn host(temp: &TempDir, launcher: Arc<Responder>) -> WorkerHost {
        let config = config(temp.path());
        let ws = Workspace::resolve(config.root.clone(), Role::BackendEngineer, "feature-x");
        WorkerHost::new(ws, config, launcher, Arc::new(QuietVcs), SessionRegistry::new(), HostOptions::default())
    }

    fn delegate_request(store: &MessageStore) -> MessageEntry {
        store
            .create_request(&NewRequest {
                from: Role::Coordinator,
                to: Role::BackendEngineer,
                title: "Add endpoint",
                body: "Please add GET /health",
                feature_id: None,
                task_id: Some("T-1"),
                attempt: 1,
            })
            .unwrap();
        store.unprocessed_requests(Role::BackendEngineer).unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_request_processed_to_completion() {
        colored::control::set_override(false);
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path().join("ws"), Role::BackendEngineer, "feature-x");
        let store = MessageStore::for_workspace(&ws);
        let launcher = Arc::new(Responder {
            store: store.clone(),
            role: Role::BackendEngineer,
            respond: true,
            exit_code: 0,
            launches: AtomicU32::new(0),
            specs: Mutex::new(Vec::new()),
        });
        let mut host = host(&temp, launcher.clone());

        let entry = delegate_request(&store);
        assert_eq!(host.next_pending().unwrap(), Some(entry.clone()));

        let flow = host.process_request(entry).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert!(store.find_response(Role::BackendEngineer, 1).unwrap().is_some());
        assert!(!ws.task_file().exists());
        assert!(!ws.worker_pid_file().exists());
        assert!(host.next_pending().unwrap().is_none());
        assert_eq!(host.registry.metrics().count(Counter::Responses), 1);

        let spec = launcher.specs.lock().unwrap()[0].clone();
        assert!(spec.args.iter().any(|a| a.contains("New task #0001")));
        assert!(ws.session_file().exists());
        assert!(ws.system_prompt_file().exists());
    }

    #[tokio::test]
    async fn test_crashing_worker_is_abandoned_after_cap() {
        colored::control::set_override(false);
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path().join("ws"), Role::BackendEngineer, "feature-x");
        let store = MessageStore::for_workspace(&ws);
        let launcher = Arc::new(Responder {
            store: store.clone(),
            role: Role::BackendEngineer,
            respond: false,
            exit_code: 1,
            launches: AtomicU32::new(0),
            specs: Mutex::new(Vec::new()),
        });
        let mut host = host(&temp, launcher.clone());

        let entry = delegate_request(&store);
        host.process_request(entry).await.unwrap();

        // One launch plus three restarts (engineer cap).
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 4);
        let specs = launcher.specs.lock().unwrap();
        assert!(specs[1].args.iter().any(|a| a.contains("You were restarted")));
        drop(specs);

        assert!(!ws.task_file().exists());
        assert!(store.is_abandoned(Role::BackendEngineer, 1));
        assert!(host.next_pending().unwrap().is_none());
        assert_eq!(host.registry.metrics().count(Counter::Exhausted), 1);
        assert_eq!(host.registry.metrics().count(Counter::Restarts), 3);
    }

    fn crashing(store: &MessageStore) -> Arc<Responder> {
        Arc::new(Responder {
            store: store.clone(),
            role: Role::BackendEngineer,
            respond: false,
            exit_code: 1,
            launches: AtomicU32::new(0),
            specs: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_abandonment_survives_unwritable_workflow_log() {
        colored::control::set_override(false);
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path().join("ws"), Role::BackendEngineer, "feature-x");
        let store = MessageStore::for_workspace(&ws);
        std::fs::create_dir_all(ws.workflow_log()).unwrap();
        let launcher = crashing(&store);
        let mut host = host(&temp, launcher.clone());

        let entry = delegate_request(&store);
        host.process_request(entry).await.unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 4);

        assert!(store.is_abandoned(Role::BackendEngineer, 1));
        assert!(host.next_pending().unwrap().is_none());
        // A restarted host does not pick it up again either.
        let fresh = self::host(&temp, crashing(&store));
        assert!(fresh.next_pending().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unwritable_marker_fails_loudly_but_is_not_retried() {
        colored::control::set_override(false);
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path().join("ws"), Role::BackendEngineer, "feature-x");
        let store = MessageStore::for_workspace(&ws);
        let launcher = crashing(&store);
        let mut host = host(&temp, launcher.clone());

        let entry = delegate_request(&store);
        // A non-empty directory where the marker goes makes its rename fail.
        let blocked = ws.messages_dir().join("0001.backend-engineer.abandoned");
        std::fs::create_dir_all(blocked.join("x")).unwrap();

        let err = host.process_request(entry).await.unwrap_err();
        assert!(matches!(err, HostError::Protocol(_)));
        assert!(!store.is_abandoned(Role::BackendEngineer, 1));
        assert!(host.next_pending().unwrap().is_none());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_worker_marker_written_before_startup_delay() {
        let temp = TempDir::new().unwrap();
        let mut config = config(temp.path());
        config.timing.startup_delay_secs = 1;
        let ws = Workspace::resolve(config.root.clone(), Role::BackendEngineer, "feature-x");
        let launcher = crashing(&MessageStore::for_workspace(&ws));
        let host = WorkerHost::new(
            ws.clone(),
            config,
            launcher,
            Arc::new(QuietVcs),
            SessionRegistry::new(),
            HostOptions::default(),
        );

        let marker = LivenessMarker::new(ws.worker_pid_file());
        let spec = LaunchSpec::new("worker");
        let (started, during_startup) = tokio::join!(
            host.start_supervised(&spec, LaunchSpec::new("worker")),
            async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                marker.read()
            }
        );
        // The worker already exited, yet peers could see its pid.
        assert_eq!(during_startup, Some(4242));
        assert!(started.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_malformed_request_gets_failure_response() {
        colored::control::set_override(false);
        let temp = TempDir::new().unwrap();
        let ws = Workspace::resolve(temp.path().join("ws"), Role::BackendEngineer, "feature-x");
        let store = MessageStore::for_workspace(&ws);
        std::fs::create_dir_all(ws.messages_dir()).unwrap();
        std::fs::write(ws.messages_dir().join("0003.backend-engineer.request.broken.md"), "no header").unwrap();

        let launcher = Arc::new(Responder {
            store: store.clone(),
            role: Role::BackendEngineer,
            respond: false,
            exit_code: 0,
            launches: AtomicU32::new(0),
            specs: Mutex::new(Vec::new()),
        });
        let mut host = host(&temp, launcher.clone());
        let entry = host.next_pending().unwrap().unwrap();
        host.process_request(entry).await.unwrap();

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
        let response = store.find_response(Role::BackendEngineer, 3).unwrap().unwrap();
        assert!(store.read_response_body(&response).unwrap().contains("malformed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_live_host_marker_blocks_second_host() {
        let temp = TempDir::new().unwrap();
        let launcher = Arc::new(Responder {
            store: MessageStore::new(temp.path(), temp.path().join(".task-counter")),
            role: Role::BackendEngineer,
            respond: false,
            exit_code: 0,
            launches: AtomicU32::new(0),
            specs: Mutex::new(Vec::new()),
        });
        let host = host(&temp, launcher);

        // pid 1 is always alive and never ours.
        LivenessMarker::new(host.workspace.host_pid_file()).write(1).unwrap();
        let err = host.claim().await.unwrap_err();
        assert!(matches!(err, HostError::AlreadyRunning { pid: 1, .. }));

        // A dead pid is reclaimed silently.
        LivenessMarker::new(host.workspace.host_pid_file())
            .write(u32::MAX - 1)
            .unwrap();
        host.claim().await.unwrap();
        assert_eq!(host.host_marker.read(), Some(std::process::id()));
    }
}
