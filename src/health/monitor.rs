// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-session health evaluation.
//!
//! A [`HealthMonitor`] combines an [`ActivitySource`] with the
//! [`RestartPolicy`] for one running worker. Supervised sessions are
//! restarted on inactivity; manual sessions are never restarted and are
//! only preempted when queued automated work is waiting and the human has
//! gone quiet.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::HealthError;
use crate::process::SourceControl;
use crate::workspace::{Role, SessionMode};

use super::activity::{Activity, ActivitySignal, ActivitySource};
use super::policy::{RestartDecision, RestartPolicy, RestartState};

/// Decides whether a manual session should give way to queued work.
pub struct Preemption {
    task_file: PathBuf,
    vcs: Arc<dyn SourceControl>,
    window: Duration,
}

impl Preemption {
    pub fn new(task_file: impl Into<PathBuf>, vcs: Arc<dyn SourceControl>, window: Duration) -> Self {
        Self {
            task_file: task_file.into(),
            vcs,
            window,
        }
    }

    /// A task descriptor exists and nobody touched the checkout recently.
    pub async fn is_due(&self) -> bool {
        if !self.task_file.exists() {
            return false;
        }
        !self.vcs.changed_within(self.window).await
    }
}

/// What the monitor concluded from one check.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorVerdict {
    Active(ActivitySignal),
    /// No activity, still under the threshold.
    Idle { idle_for: Duration },
    CoolingDown { remaining: Duration },
    Restart,
    Exhausted { restarts: u32 },
    /// Manual session should stop so queued work can run.
    Preempt,
    /// A condition a human needs to look at. Reported once per distinct
    /// error.
    Escalate(HealthError),
    /// Manual session with nothing to do.
    Unmonitored,
}

pub struct HealthMonitor {
    role: Role,
    mode: SessionMode,
    policy: RestartPolicy,
    state: RestartState,
    activity: Option<Arc<dyn ActivitySource>>,
    preemption: Option<Preemption>,
    last_escalation: Option<HealthError>,
}

impl HealthMonitor {
    /// Monitor a task-bound or long-running session that may be restarted.
    pub fn supervised(
        role: Role,
        policy: RestartPolicy,
        activity: Arc<dyn ActivitySource>,
        now: Instant,
    ) -> Self {
        Self {
            role,
            mode: SessionMode::Supervised,
            policy,
            state: RestartState::new(now),
            activity: Some(activity),
            preemption: None,
            last_escalation: None,
        }
    }

    /// Monitor a human-driven session. It is never restarted.
    pub fn manual(role: Role, policy: RestartPolicy, preemption: Option<Preemption>, now: Instant) -> Self {
        Self {
            role,
            mode: SessionMode::Manual,
            policy,
            state: RestartState::new(now),
            activity: None,
            preemption,
            last_escalation: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    pub fn state(&self) -> &RestartState {
        &self.state
    }

    pub fn restarts(&self) -> u32 {
        self.state.restarts()
    }

    /// Run one health check.
    pub async fn check(&mut self, now: Instant) -> MonitorVerdict {
        if self.mode == SessionMode::Manual {
            let due = match self.preemption {
                Some(ref p) => p.is_due().await,
                None => false,
            };
            return if due {
                MonitorVerdict::Preempt
            } else {
                MonitorVerdict::Unmonitored
            };
        }

        let Some(ref activity) = self.activity else {
            return MonitorVerdict::Unmonitored;
        };

        match activity.probe().await {
            Ok(Activity::Active(signal)) => {
                debug!(role = %self.role, ?signal, "Worker active");
                self.state.record_activity(now);
                self.last_escalation = None;
                MonitorVerdict::Active(signal)
            }
            Ok(Activity::Inactive) => self.decide(self.policy.on_inactivity(&self.state, now), now),
            Err(err) => {
                if self.last_escalation.as_ref() == Some(&err) {
                    // Already reported; leave the worker alone until it clears.
                    return MonitorVerdict::Idle {
                        idle_for: self.state.idle_for(now),
                    };
                }
                self.last_escalation = Some(err.clone());
                MonitorVerdict::Escalate(err)
            }
        }
    }

    /// Evaluate a worker exit that produced no response.
    pub fn on_crash(&self, now: Instant) -> MonitorVerdict {
        if self.mode == SessionMode::Manual {
            return MonitorVerdict::Unmonitored;
        }
        self.decide(self.policy.on_crash(&self.state, now), now)
    }

    pub fn record_restart(&mut self, now: Instant) {
        self.state.record_restart(now);
    }

    fn decide(&self, decision: RestartDecision, now: Instant) -> MonitorVerdict {
        match decision {
            RestartDecision::Wait => MonitorVerdict::Idle {
                idle_for: self.state.idle_for(now),
            },
            RestartDecision::CoolingDown { remaining } => {
                debug!(role = %self.role, remaining_secs = remaining.as_secs(), "Restart cooling down");
                MonitorVerdict::CoolingDown { remaining }
            }
            RestartDecision::Restart => MonitorVerdict::Restart,
            RestartDecision::Exhausted { restarts } => {
                warn!(role = %self.role, restarts, cap = %self.policy.max_restarts, "Restart cap reached");
                MonitorVerdict::Exhausted { restarts }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::config::RestartCap;

    struct Scripted(Mutex<Vec<Result<Activity, HealthError>>>);

    #[async_trait]
    impl ActivitySource for Scripted {
        async fn probe(&self) -> Result<Activity, HealthError> {
            let mut script = self.0.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    struct StaticVcs(bool);

    #[async_trait]
    impl SourceControl for StaticVcs {
        async fn has_uncommitted_changes(&self) -> bool {
            self.0
        }
        async fn last_change_time(&self) -> Option<DateTime<Utc>> {
            self.0.then(Utc::now)
        }
        async fn current_branch(&self) -> Option<String> {
            None
        }
    }

    fn policy() -> RestartPolicy {
        RestartPolicy {
            inactivity_threshold: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            max_restarts: RestartCap::Limited(1),
        }
    }

    fn supervised(script: Vec<Result<Activity, HealthError>>, now: Instant) -> HealthMonitor {
        HealthMonitor::supervised(
            Role::BackendEngineer,
            policy(),
            Arc::new(Scripted(Mutex::new(script))),
            now,
        )
    }

    #[tokio::test]
    async fn test_activity_keeps_worker_healthy() {
        let start = Instant::now();
        let mut monitor = supervised(vec![Ok(Activity::Active(ActivitySignal::ConversationLog))], start);

        let verdict = monitor.check(start + Duration::from_secs(120)).await;
        assert_eq!(verdict, MonitorVerdict::Active(ActivitySignal::ConversationLog));
        assert_eq!(monitor.state().last_activity(), start + Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_inactivity_leads_to_restart_then_exhaustion() {
        let start = Instant::now();
        let mut monitor = supervised(vec![Ok(Activity::Inactive)], start);

        assert!(matches!(
            monitor.check(start + Duration::from_secs(30)).await,
            MonitorVerdict::Idle { .. }
        ));

        let t1 = start + Duration::from_secs(61);
        assert_eq!(monitor.check(t1).await, MonitorVerdict::Restart);
        monitor.record_restart(t1);

        let t2 = t1 + Duration::from_secs(120);
        assert_eq!(monitor.check(t2).await, MonitorVerdict::Exhausted { restarts: 1 });
    }

    #[tokio::test]
    async fn test_escalation_is_reported_once() {
        let start = Instant::now();
        let err = HealthError::SubordinateHostCrashed {
            role: "reviewer".to_string(),
            branch: "main".to_string(),
            pid: 42,
        };
        let mut monitor = HealthMonitor::supervised(
            Role::Coordinator,
            policy(),
            Arc::new(Scripted(Mutex::new(vec![Err(err.clone())]))),
            start,
        );

        assert_eq!(monitor.check(start).await, MonitorVerdict::Escalate(err));
        assert!(matches!(monitor.check(start).await, MonitorVerdict::Idle { .. }));
    }

    #[tokio::test]
    async fn test_manual_session_is_preempted_only_when_idle_with_queued_task() {
        let temp = TempDir::new().unwrap();
        let task_file = temp.path().join("current-task.json");
        let start = Instant::now();

        let mut quiet = HealthMonitor::manual(
            Role::PairProgrammer,
            policy(),
            Some(Preemption::new(&task_file, Arc::new(StaticVcs(false)), Duration::from_secs(300))),
            start,
        );
        // No descriptor yet
        assert_eq!(quiet.check(start).await, MonitorVerdict::Unmonitored);

        std::fs::write(&task_file, "{}").unwrap();
        assert_eq!(quiet.check(start).await, MonitorVerdict::Preempt);

        let mut editing = HealthMonitor::manual(
            Role::PairProgrammer,
            policy(),
            Some(Preemption::new(&task_file, Arc::new(StaticVcs(true)), Duration::from_secs(300))),
            start,
        );
        assert_eq!(editing.check(start).await, MonitorVerdict::Unmonitored);
        assert_eq!(editing.on_crash(start), MonitorVerdict::Unmonitored);
    }
}
