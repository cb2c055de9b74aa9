// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end delegation scenarios: a caller delegates through [`Relay`]
//! while a [`WorkerHost`] serves the target role with a scripted worker.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use taskrelay::api::{CompleteRequest, DelegateRequest, DelegateStatus, Relay};
use taskrelay::config::ResolvedConfig;
use taskrelay::error::DelegationError;
use taskrelay::host::{HostOptions, SessionRegistry, WorkerHost};
use taskrelay::process::{ExitInfo, LaunchSpec, ProcessLauncher, SourceControl, StopOutcome, WorkerProcess};
use taskrelay::protocol::{CompletionMode, MessageStore, TaskDescriptor};
use taskrelay::workspace::{Role, Workspace};

/// Worker that has already exited with a fixed code.
struct Exited(i32);

#[async_trait]
impl WorkerProcess for Exited {
    fn id(&self) -> Option<u32> {
        None
    }
    fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>> {
        Ok(Some(ExitInfo { code: Some(self.0) }))
    }
    async fn wait(&mut self) -> std::io::Result<ExitInfo> {
        Ok(ExitInfo { code: Some(self.0) })
    }
    async fn terminate(&mut self, _grace: Duration) -> std::io::Result<StopOutcome> {
        Ok(StopOutcome::AlreadyExited)
    }
}

/// Answers every open request addressed to `role` when launched, or
/// crashes when `answer` is `None`.
struct ScriptedWorker {
    store: MessageStore,
    role: Role,
    answer: Option<&'static str>,
    launches: AtomicU32,
}

#[async_trait]
impl ProcessLauncher for ScriptedWorker {
    async fn launch(&self, _spec: &LaunchSpec) -> std::io::Result<Box<dyn WorkerProcess>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let Some(answer) = self.answer else {
            return Ok(Box::new(Exited(1)));
        };
        for entry in self.store.unprocessed_requests(self.role).map_err(std::io::Error::other)? {
            self.store
                .write_response(self.role, entry.name.number, Role::Coordinator, CompletionMode::Task, answer)
                .map_err(std::io::Error::other)?;
        }
        Ok(Box::new(Exited(0)))
    }
}

struct QuietCheckout;

#[async_trait]
impl SourceControl for QuietCheckout {
    async fn has_uncommitted_changes(&self) -> bool {
        false
    }
    async fn last_change_time(&self) -> Option<DateTime<Utc>> {
        None
    }
    async fn current_branch(&self) -> Option<String> {
        Some("feature-x".to_string())
    }
}

fn config(root: &Path) -> ResolvedConfig {
    let mut config = ResolvedConfig::default().anchored(root);
    config.root = root.join("workspaces");
    config.timing.startup_delay_secs = 0;
    config.timing.poll_interval_secs = 1;
    config.timing.restart_cooldown_secs = 0;
    config.timing.response_timeout_secs = 30;
    config
}

fn host(config: &ResolvedConfig, workspace: &Workspace, launcher: Arc<ScriptedWorker>) -> WorkerHost {
    WorkerHost::new(
        workspace.clone(),
        config.clone(),
        launcher,
        Arc::new(QuietCheckout),
        SessionRegistry::new(),
        HostOptions::default(),
    )
}

fn worker(workspace: &Workspace, answer: Option<&'static str>) -> Arc<ScriptedWorker> {
    Arc::new(ScriptedWorker {
        store: MessageStore::for_workspace(workspace),
        role: workspace.role(),
        answer,
        launches: AtomicU32::new(0),
    })
}

fn add_endpoint() -> DelegateRequest {
    DelegateRequest::new(
        Role::Coordinator,
        Role::BackendEngineer,
        "Add endpoint",
        "Please add GET /health returning 200.",
    )
    .task_id("T-1")
}

#[tokio::test]
async fn test_round_trip_through_running_host() {
    colored::control::set_override(false);
    let temp = TempDir::new().unwrap();
    let config = config(temp.path());
    let relay = Relay::new(config.clone(), "feature-x");
    let ws = relay.workspace_for(Role::BackendEngineer, "").unwrap();
    let launcher = worker(&ws, Some("Endpoint added in src/health.rs"));
    let host = host(&config, &ws, launcher.clone());

    let outcome = tokio::select! {
        result = host.run() => panic!("host stopped early: {result:?}"),
        outcome = relay.delegate(add_endpoint()) => outcome.unwrap(),
    };

    assert_eq!(outcome.request_number, 1);
    assert_eq!(outcome.attempt, 1);
    assert_eq!(outcome.status, DelegateStatus::Created);
    assert!(outcome
        .request_path
        .ends_with("0001.backend-engineer.request.add-endpoint.md"));
    assert!(outcome
        .response_path
        .ends_with("0001.backend-engineer.response.add-endpoint.md"));
    assert!(outcome.response.contains("Endpoint added"));
    assert!(outcome.summary().contains("#0001"));
    assert!(!ws.task_file().exists());
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_host_gives_up_on_crashing_worker() {
    colored::control::set_override(false);
    let temp = TempDir::new().unwrap();
    let config = config(temp.path());
    let relay = Relay::new(config.clone(), "feature-x");
    let ws = relay.workspace_for(Role::BackendEngineer, "").unwrap();
    let launcher = worker(&ws, None);
    let host = host(&config, &ws, launcher.clone());

    let err = tokio::select! {
        result = host.run() => panic!("host stopped early: {result:?}"),
        outcome = relay.delegate(add_endpoint()) => outcome.unwrap_err(),
    };

    assert!(matches!(err, DelegationError::Abandoned { request_number: 1, .. }));
    // First launch plus the engineer restart cap.
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 4);
    assert!(MessageStore::for_workspace(&ws).is_abandoned(Role::BackendEngineer, 1));

    // The same task can be delegated again as a new attempt.
    let retry = relay.submit(&add_endpoint()).unwrap();
    assert_eq!(retry.request_number, 2);
    assert_eq!(retry.attempt, 2);
}

#[test]
fn test_repeated_delegation_monitors_existing_request() {
    let temp = TempDir::new().unwrap();
    let relay = Relay::new(config(temp.path()), "feature-x");

    let first = relay.submit(&add_endpoint()).unwrap();
    let again = relay.submit(&add_endpoint()).unwrap();
    assert_eq!(again.status, DelegateStatus::MonitoringExisting);
    assert_eq!(again.request_number, first.request_number);

    let store = MessageStore::for_workspace(&first.workspace);
    assert_eq!(store.unprocessed_requests(Role::BackendEngineer).unwrap().len(), 1);

    // Once answered, the next call for the same task is a new attempt.
    relay
        .complete_work(&CompleteRequest {
            mode: CompletionMode::Task,
            role: Role::BackendEngineer,
            response: "Done".to_string(),
            branch: String::new(),
            feedback: [("notes".to_string(), vec!["straightforward".to_string()])].into(),
            task_number: None,
        })
        .unwrap();
    let next = relay.submit(&add_endpoint()).unwrap();
    assert_eq!(next.status, DelegateStatus::Created);
    assert_eq!(next.request_number, 2);
    assert_eq!(next.attempt, 2);
}

#[test]
fn test_rejections_write_nothing() {
    let temp = TempDir::new().unwrap();
    let relay = Relay::new(config(temp.path()), "feature-x");

    let err = relay
        .submit(&DelegateRequest::new(Role::Reviewer, Role::Reviewer, "Review", "Look at it"))
        .unwrap_err();
    assert!(matches!(err, DelegationError::SelfDelegation(_)));

    let err = relay.submit(&add_endpoint().branch("main")).unwrap_err();
    assert!(matches!(err, DelegationError::BranchMismatch { .. }));
    assert!(!err.is_retryable());

    let ws = relay.workspace_for(Role::BackendEngineer, "").unwrap();
    assert!(!ws.messages_dir().exists());

    // Shared roles accept work from any branch.
    let shared = relay
        .submit(&DelegateRequest::new(Role::Coordinator, Role::DevopsEngineer, "Rotate keys", "Rotate CI keys").branch("main"))
        .unwrap();
    assert_eq!(shared.workspace.scope(), "_shared");
}

#[test]
fn test_busy_target_queues_tracked_and_rejects_adhoc() {
    let temp = TempDir::new().unwrap();
    let relay = Relay::new(config(temp.path()), "feature-x");
    relay.submit(&add_endpoint()).unwrap();

    let err = relay
        .submit(&DelegateRequest::new(Role::Coordinator, Role::BackendEngineer, "Quick question", "Which port?"))
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("T-1"));

    let queued = relay
        .submit(
            &DelegateRequest::new(Role::Coordinator, Role::BackendEngineer, "Add metrics", "Expose /metrics")
                .task_id("T-2"),
        )
        .unwrap();
    assert_eq!(queued.status, DelegateStatus::Queued);
    assert_eq!(queued.request_number, 2);
}

#[tokio::test]
async fn test_timeout_abandons_request() {
    let temp = TempDir::new().unwrap();
    let relay = Relay::new(config(temp.path()), "feature-x");
    let mut request = add_endpoint();
    request.timeout = Some(Duration::from_secs(1));

    let err = relay.delegate(request).await.unwrap_err();
    assert!(matches!(
        err,
        DelegationError::ResponseTimeout {
            request_number: 1,
            ..
        }
    ));
    assert!(err.to_string().contains("0001"));

    let ws = relay.workspace_for(Role::BackendEngineer, "").unwrap();
    assert!(!ws.task_file().exists());
    assert!(MessageStore::for_workspace(&ws).is_abandoned(Role::BackendEngineer, 1));

    let retry = relay.submit(&add_endpoint()).unwrap();
    assert_eq!(retry.status, DelegateStatus::Created);
    assert_eq!(retry.attempt, 2);
}

#[test]
fn test_concurrent_writers_get_contiguous_numbers() {
    let temp = TempDir::new().unwrap();
    let ws = Workspace::resolve(temp.path(), Role::Reviewer, "feature-x");
    let store = MessageStore::for_workspace(&ws);

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || {
                let title = format!("Review change {i}");
                let (header, _) = store
                    .create_request(&taskrelay::protocol::NewRequest {
                        from: Role::BackendEngineer,
                        to: Role::Reviewer,
                        title: &title,
                        body: "Please review",
                        feature_id: None,
                        task_id: None,
                        attempt: 1,
                    })
                    .unwrap();
                header.request_number
            })
        })
        .collect();

    let mut numbers: Vec<u32> = writers.into_iter().map(|w| w.join().unwrap()).collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=8).collect::<Vec<_>>());
    assert_eq!(store.unprocessed_requests(Role::Reviewer).unwrap().len(), 8);
}

/// Submit `requests` from one thread each, released together.
fn submit_together(relay: &Arc<Relay>, requests: Vec<DelegateRequest>) -> Vec<taskrelay::api::Submission> {
    let barrier = Arc::new(Barrier::new(requests.len()));
    let callers: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let relay = Arc::clone(relay);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                relay.submit(&request).unwrap()
            })
        })
        .collect();
    callers.into_iter().map(|c| c.join().unwrap()).collect()
}

#[test]
fn test_concurrent_submits_never_share_an_idle_target() {
    for _ in 0..20 {
        let temp = TempDir::new().unwrap();
        let relay = Arc::new(Relay::new(config(temp.path()), "feature-x"));
        let second = DelegateRequest::new(Role::Coordinator, Role::BackendEngineer, "Add metrics", "Expose /metrics")
            .task_id("T-2");

        let subs = submit_together(&relay, vec![add_endpoint(), second]);
        let created: Vec<_> = subs.iter().filter(|s| s.status == DelegateStatus::Created).collect();
        assert_eq!(created.len(), 1, "{subs:?}");
        assert!(subs.iter().any(|s| s.status == DelegateStatus::Queued));

        // The descriptor names the one request that found the target idle.
        let descriptor = TaskDescriptor::load(&created[0].workspace.task_file()).unwrap();
        assert_eq!(descriptor.task_number, created[0].request_number);
    }
}

#[test]
fn test_concurrent_submits_for_one_task_write_one_request() {
    for _ in 0..20 {
        let temp = TempDir::new().unwrap();
        let relay = Arc::new(Relay::new(config(temp.path()), "feature-x"));

        let subs = submit_together(&relay, vec![add_endpoint(), add_endpoint()]);
        assert_eq!(subs[0].request_number, subs[1].request_number);
        let mut statuses: Vec<_> = subs.iter().map(|s| s.status).collect();
        statuses.sort_by_key(|s| *s != DelegateStatus::Created);
        assert_eq!(statuses, vec![DelegateStatus::Created, DelegateStatus::MonitoringExisting]);

        let store = MessageStore::for_workspace(&subs[0].workspace);
        assert_eq!(store.count_attempts(Role::BackendEngineer, "T-1").unwrap(), 1);
    }
}
