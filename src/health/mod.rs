// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Health monitoring and restart engine.
//!
//! - [`activity`]: per-family activity probes
//! - [`policy`]: pure restart decisions (threshold, cooldown, cap)
//! - [`monitor`]: supervised vs manual session evaluation
//! - [`supervisor`]: owns the worker process and applies verdicts

pub mod activity;
pub mod monitor;
pub mod policy;
pub mod supervisor;

pub use activity::{
    is_delegation_tool, subordinates_of, Activity, ActivitySignal, ActivitySource, ActivityWindows,
    RoleActivity,
};
pub use monitor::{HealthMonitor, MonitorVerdict, Preemption};
pub use policy::{RestartDecision, RestartPolicy, RestartState};
pub use supervisor::{Supervisor, SupervisorEvent, SupervisorOptions};
