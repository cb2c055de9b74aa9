// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker supervision: owns the running process, applies monitor verdicts
//! and relaunches with a recovery message.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::{HealthError, HostError};
use crate::process::{ExitInfo, LaunchSpec, LivenessMarker, ProcessLauncher, StopOutcome, WorkerProcess};
use crate::workspace::SessionMode;

use super::monitor::{HealthMonitor, MonitorVerdict};

/// What a supervision step did.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// Nothing to do.
    Healthy,
    /// The worker was stopped and relaunched.
    Restarted { restarts: u32, pid: Option<u32> },
    /// A restart is due once the cooldown elapses.
    CoolingDown { remaining: Duration },
    /// The session failed; no further restart will be attempted.
    Exhausted(HealthError),
    /// The manual session was stopped to make room for queued work.
    Preempted,
    Escalated(HealthError),
    /// A manual session ended on its own.
    Finished(ExitInfo),
}

/// Settings for one supervised worker.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Command used to relaunch after a restart.
    pub recovery: LaunchSpec,
    /// Interrupt-to-kill grace period.
    pub grace: Duration,
    /// Worker liveness marker kept in sync with the current pid.
    pub marker: LivenessMarker,
}

pub struct Supervisor {
    monitor: HealthMonitor,
    launcher: Arc<dyn ProcessLauncher>,
    options: SupervisorOptions,
    process: Box<dyn WorkerProcess>,
    /// Exit of the current process, once observed.
    exited: Option<ExitInfo>,
}

impl Supervisor {
    /// Attach to a freshly launched worker and record its pid.
    pub fn attach(
        process: Box<dyn WorkerProcess>,
        launcher: Arc<dyn ProcessLauncher>,
        monitor: HealthMonitor,
        options: SupervisorOptions,
    ) -> Self {
        let supervisor = Self {
            monitor,
            launcher,
            options,
            process,
            exited: None,
        };
        supervisor.write_marker();
        supervisor
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    pub fn restarts(&self) -> u32 {
        self.monitor.restarts()
    }

    pub fn mode(&self) -> SessionMode {
        self.monitor.mode()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_some()
    }

    /// Exit of the current process if it has already ended, without
    /// waiting and without recording it.
    pub fn peek_exit(&mut self) -> std::io::Result<Option<ExitInfo>> {
        match self.exited {
            Some(exit) => Ok(Some(exit)),
            None => self.process.try_wait(),
        }
    }

    /// Wait for the current process to exit.
    ///
    /// Once an exit has been observed this never resolves, so it can sit in
    /// a `select!` while the supervisor waits out a cooldown.
    pub async fn wait_exit(&mut self) -> std::io::Result<ExitInfo> {
        if self.exited.is_some() {
            return std::future::pending().await;
        }
        let exit = self.process.wait().await?;
        self.exited = Some(exit);
        Ok(exit)
    }

    /// Periodic health check.
    pub async fn check(&mut self, now: Instant) -> Result<SupervisorEvent, HostError> {
        let verdict = if self.exited.is_some() {
            self.monitor.on_crash(now)
        } else {
            self.monitor.check(now).await
        };
        self.apply(verdict, now).await
    }

    /// React to the worker exiting before a response was observed.
    pub async fn on_exit(&mut self, exit: ExitInfo, now: Instant) -> Result<SupervisorEvent, HostError> {
        self.exited = Some(exit);
        if self.monitor.mode() == SessionMode::Manual {
            self.release_marker();
            return Ok(SupervisorEvent::Finished(exit));
        }
        warn!(
            role = %self.monitor.role(),
            code = ?exit.code,
            restarts = self.restarts(),
            "Worker exited without a response"
        );
        let verdict = self.monitor.on_crash(now);
        self.apply(verdict, now).await
    }

    /// Stop the worker (interrupt first) and drop its marker.
    pub async fn stop(&mut self) -> std::io::Result<StopOutcome> {
        let pid = self.pid();
        let outcome = if self.exited.is_some() {
            StopOutcome::AlreadyExited
        } else {
            self.process.terminate(self.options.grace).await?
        };
        self.exited.get_or_insert(ExitInfo { code: None });
        if let Some(pid) = pid {
            info!(pid, ?outcome, "Worker stopped");
        }
        self.release_marker();
        Ok(outcome)
    }

    async fn apply(&mut self, verdict: MonitorVerdict, now: Instant) -> Result<SupervisorEvent, HostError> {
        match verdict {
            MonitorVerdict::Active(_) | MonitorVerdict::Idle { .. } | MonitorVerdict::Unmonitored => {
                Ok(SupervisorEvent::Healthy)
            }
            MonitorVerdict::CoolingDown { remaining } => Ok(SupervisorEvent::CoolingDown { remaining }),
            MonitorVerdict::Restart => self.restart(now).await,
            MonitorVerdict::Exhausted { restarts } => {
                let err = HealthError::WorkerExhaustedRestarts {
                    role: self.monitor.role().to_string(),
                    restarts,
                };
                error!(error = %err, "Giving up on worker");
                self.stop().await?;
                Ok(SupervisorEvent::Exhausted(err))
            }
            MonitorVerdict::Preempt => {
                info!(role = %self.monitor.role(), "Preempting manual session for queued work");
                self.stop().await?;
                Ok(SupervisorEvent::Preempted)
            }
            MonitorVerdict::Escalate(err) => {
                error!(error = %err, "Escalating");
                Ok(SupervisorEvent::Escalated(err))
            }
        }
    }

    async fn restart(&mut self, now: Instant) -> Result<SupervisorEvent, HostError> {
        let role = self.monitor.role();
        warn!(role = %role, restarts = self.restarts(), "Restarting worker");

        self.stop().await?;
        self.monitor.record_restart(now);

        let process = self
            .launcher
            .launch(&self.options.recovery)
            .await
            .map_err(|e| HostError::Launch(format!("{}: {e}", self.options.recovery.program)))?;
        self.process = process;
        self.exited = None;
        self.write_marker();

        Ok(SupervisorEvent::Restarted {
            restarts: self.restarts(),
            pid: self.pid(),
        })
    }

    fn write_marker(&self) {
        if let Some(pid) = self.pid() {
            if let Err(e) = self.options.marker.write(pid) {
                warn!(path = %self.options.marker.path().display(), error = %e, "Failed to write worker marker");
            }
        }
    }

    fn release_marker(&self) {
        if let Err(e) = self.options.marker.remove() {
            warn!(path = %self.options.marker.path().display(), error = %e, "Failed to remove worker marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    use crate::config::RestartCap;
    use crate::health::activity::{Activity, ActivitySource};
    use crate::health::policy::RestartPolicy;
    use crate::workspace::Role;

    struct Idle;

    #[async_trait]
    impl ActivitySource for Idle {
        async fn probe(&self) -> Result<Activity, HealthError> {
            Ok(Activity::Inactive)
        }
    }

    struct Hung {
        pid: u32,
        exit: Option<ExitInfo>,
    }

    #[async_trait]
    impl WorkerProcess for Hung {
        fn id(&self) -> Option<u32> {
            Some(self.pid)
        }
        fn try_wait(&mut self) -> std::io::Result<Option<ExitInfo>> {
            Ok(self.exit)
        }
        async fn wait(&mut self) -> std::io::Result<ExitInfo> {
            match self.exit {
                Some(exit) => Ok(exit),
                None => std::future::pending().await,
            }
        }
        async fn terminate(&mut self, _grace: Duration) -> std::io::Result<StopOutcome> {
            self.exit = Some(ExitInfo { code: None });
            Ok(StopOutcome::Graceful)
        }
    }

    #[derive(Default)]
    struct CountingLauncher {
        launches: AtomicU32,
    }

    #[async_trait]
    impl ProcessLauncher for CountingLauncher {
        async fn launch(&self, _spec: &LaunchSpec) -> std::io::Result<Box<dyn WorkerProcess>> {
            let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Box::new(Hung { pid: 1000 + n, exit: None }))
        }
    }

    fn supervisor(cap: RestartCap, dir: &TempDir, launcher: Arc<CountingLauncher>, start: Instant) -> Supervisor {
        let policy = RestartPolicy {
            inactivity_threshold: Duration::from_secs(900),
            cooldown: Duration::from_secs(600),
            max_restarts: cap,
        };
        let monitor = HealthMonitor::supervised(Role::BackendEngineer, policy, Arc::new(Idle), start);
        Supervisor::attach(
            Box::new(Hung { pid: 1000, exit: None }),
            launcher,
            monitor,
            SupervisorOptions {
                recovery: LaunchSpec::new("worker").arg("resume"),
                grace: Duration::from_millis(10),
                marker: LivenessMarker::new(dir.path().join(".worker-pid")),
            },
        )
    }

    #[tokio::test]
    async fn test_restart_attaches_new_process() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(CountingLauncher::default());
        let start = Instant::now();
        let mut sup = supervisor(RestartCap::Limited(3), &dir, launcher.clone(), start);
        assert_eq!(LivenessMarker::new(dir.path().join(".worker-pid")).read(), Some(1000));

        let event = sup.check(start + Duration::from_secs(901)).await.unwrap();
        assert_eq!(
            event,
            SupervisorEvent::Restarted {
                restarts: 1,
                pid: Some(1001)
            }
        );
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(sup.pid(), Some(1001));
        assert_eq!(LivenessMarker::new(dir.path().join(".worker-pid")).read(), Some(1001));
    }

    #[tokio::test]
    async fn test_cap_reached_fails_without_restart() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(CountingLauncher::default());
        let start = Instant::now();
        let mut sup = supervisor(RestartCap::Limited(1), &dir, launcher.clone(), start);

        let t1 = start + Duration::from_secs(901);
        assert!(matches!(sup.check(t1).await.unwrap(), SupervisorEvent::Restarted { .. }));

        let t2 = t1 + Duration::from_secs(1800);
        let event = sup.check(t2).await.unwrap();
        assert_eq!(
            event,
            SupervisorEvent::Exhausted(HealthError::WorkerExhaustedRestarts {
                role: "backend-engineer".to_string(),
                restarts: 1
            })
        );
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join(".worker-pid").exists());
    }

    #[tokio::test]
    async fn test_crash_honours_cooldown() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(CountingLauncher::default());
        let start = Instant::now();
        let mut sup = supervisor(RestartCap::Limited(3), &dir, launcher.clone(), start);

        // First crash restarts immediately
        let event = sup.on_exit(ExitInfo { code: Some(1) }, start).await.unwrap();
        assert!(matches!(event, SupervisorEvent::Restarted { restarts: 1, .. }));

        // Second crash inside the cooldown waits
        let t1 = start + Duration::from_secs(60);
        let event = sup.on_exit(ExitInfo { code: Some(1) }, t1).await.unwrap();
        assert_eq!(
            event,
            SupervisorEvent::CoolingDown {
                remaining: Duration::from_secs(540)
            }
        );
        assert!(sup.has_exited());

        // The next periodic check after the cooldown relaunches
        let event = sup.check(start + Duration::from_secs(601)).await.unwrap();
        assert!(matches!(event, SupervisorEvent::Restarted { restarts: 2, .. }));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }
}
