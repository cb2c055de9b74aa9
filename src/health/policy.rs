// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Restart policy.
//!
//! Pure decision logic: given the in-memory restart state and the current
//! instant, decide whether a worker should be left alone, restarted, or
//! given up on. No I/O happens here so every branch is testable with
//! synthetic instants.

use std::time::{Duration, Instant};

use crate::config::{HealthSettings, RestartCap, TimingSettings};
use crate::workspace::Role;

/// Thresholds that apply to one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Inactivity that triggers a restart.
    pub inactivity_threshold: Duration,
    /// Minimum time between two restarts.
    pub cooldown: Duration,
    pub max_restarts: RestartCap,
}

impl RestartPolicy {
    pub fn for_role(role: Role, health: &HealthSettings, timing: &TimingSettings) -> Self {
        let family = role.family();
        Self {
            inactivity_threshold: Duration::from_secs(health.inactivity_threshold_secs.get(family)),
            cooldown: timing.restart_cooldown(),
            max_restarts: health.max_restarts.get(family),
        }
    }

    /// Decide what to do after a probe found no activity.
    pub fn on_inactivity(&self, state: &RestartState, now: Instant) -> RestartDecision {
        let idle = state.idle_for(now);
        if idle < self.inactivity_threshold {
            return RestartDecision::Wait;
        }
        self.gate(state, now)
    }

    /// Decide what to do after the worker exited without answering.
    ///
    /// A crash skips the inactivity threshold but still honours the cap and
    /// the cooldown.
    pub fn on_crash(&self, state: &RestartState, now: Instant) -> RestartDecision {
        self.gate(state, now)
    }

    fn gate(&self, state: &RestartState, now: Instant) -> RestartDecision {
        if !self.max_restarts.allows(state.restarts) {
            return RestartDecision::Exhausted {
                restarts: state.restarts,
            };
        }
        if let Some(last) = state.last_restart {
            let since = now.saturating_duration_since(last);
            if since < self.cooldown {
                return RestartDecision::CoolingDown {
                    remaining: self.cooldown - since,
                };
            }
        }
        RestartDecision::Restart
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Inactive, but not for long enough to act.
    Wait,
    /// A restart is due but the previous one was too recent.
    CoolingDown { remaining: Duration },
    Restart,
    /// The cap is reached; the session must fail.
    Exhausted { restarts: u32 },
}

/// Transient restart bookkeeping for one monitoring session.
///
/// Reset whenever a host attaches to a new worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartState {
    restarts: u32,
    last_restart: Option<Instant>,
    last_activity: Instant,
}

impl RestartState {
    pub fn new(now: Instant) -> Self {
        Self {
            restarts: 0,
            last_restart: None,
            last_activity: now,
        }
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn last_restart(&self) -> Option<Instant> {
        self.last_restart
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// A relaunch counts as fresh activity.
    pub fn record_restart(&mut self, now: Instant) {
        self.restarts += 1;
        self.last_restart = Some(now);
        self.last_activity = now;
    }
}
