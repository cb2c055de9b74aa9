// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Keep-alive for idle workspaces.
//!
//! While a host is idle, a resumable conversation may expire on the worker
//! side. When configured, the host periodically resumes it with a short
//! message and waits a bounded time for the worker to answer.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::process::{ExitInfo, LaunchSpec, ProcessLauncher};

/// When the next heartbeat is due.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    last: Instant,
}

impl Heartbeat {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self { interval, last: now }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last) >= self.interval
    }

    /// Restart the interval, e.g. after a heartbeat or real work.
    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Answered(ExitInfo),
    /// The worker did not finish within the bound and was stopped.
    TimedOut,
}

/// Run one heartbeat and wait at most `bound` for it to finish.
pub async fn send_heartbeat(
    launcher: &dyn ProcessLauncher,
    spec: &LaunchSpec,
    bound: Duration,
    grace: Duration,
) -> std::io::Result<HeartbeatOutcome> {
    let mut process = launcher.launch(spec).await?;
    match process.wait_timeout(bound).await? {
        Some(exit) => {
            debug!(code = ?exit.code, "Heartbeat answered");
            Ok(HeartbeatOutcome::Answered(exit))
        }
        None => {
            warn!(bound_secs = bound.as_secs(), "Heartbeat did not finish in time; stopping it");
            process.terminate(grace).await?;
            Ok(HeartbeatOutcome::TimedOut)
        }
    }
}
