// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Signals and liveness checks for processes known only by pid.
//!
//! Children spawned by this host are stopped through
//! [`WorkerProcess::terminate`](super::WorkerProcess::terminate), which can
//! reap them. These helpers cover pids read from liveness markers.

use std::time::Duration;

use tracing::debug;

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process was already gone.
    AlreadyExited,
    /// The process exited within the grace period after an interrupt.
    Graceful,
    /// The process had to be killed.
    Forced,
}

/// Interval between liveness checks while waiting out a grace period.
const EXIT_POLL: Duration = Duration::from_millis(200);

/// Whether a process with this pid exists.
///
/// A process owned by another user still counts as alive.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Without signals only this process can be vouched for. Every other pid
/// reads as gone, so a stale marker is reclaimed rather than blocking a new
/// host forever.
#[cfg(not(unix))]
pub fn is_alive(pid: u32) -> bool {
    pid != 0 && pid == std::process::id()
}

/// Send an interrupt. Returns `false` if the process does not exist.
#[cfg(unix)]
pub fn interrupt(pid: u32) -> std::io::Result<bool> {
    send(pid, nix::sys::signal::Signal::SIGINT)
}

/// Send a kill. Returns `false` if the process does not exist.
#[cfg(unix)]
pub fn force_kill(pid: u32) -> std::io::Result<bool> {
    send(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn send(pid: u32, signal: nix::sys::signal::Signal) -> std::io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(std::io::Error::from(e)),
    }
}

#[cfg(not(unix))]
pub fn interrupt(_pid: u32) -> std::io::Result<bool> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signals are only supported on Unix",
    ))
}

#[cfg(not(unix))]
pub fn force_kill(_pid: u32) -> std::io::Result<bool> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signals are only supported on Unix",
    ))
}

/// Interrupt, wait up to `grace`, then kill.
///
/// The interrupt is always sent first so the process can flush partial
/// state before it is killed.
pub async fn terminate_pid(pid: u32, grace: Duration) -> std::io::Result<StopOutcome> {
    if !is_alive(pid) || !interrupt(pid)? {
        return Ok(StopOutcome::AlreadyExited);
    }
    debug!(pid, grace_secs = grace.as_secs(), "Sent interrupt, waiting for exit");

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(EXIT_POLL).await;
        if !is_alive(pid) {
            return Ok(StopOutcome::Graceful);
        }
    }

    if force_kill(pid)? {
        debug!(pid, "Grace period elapsed, killed");
        Ok(StopOutcome::Forced)
    } else {
        Ok(StopOutcome::Graceful)
    }
}


#[cfg(all(test, not(unix)))]
mod fallback_tests {
    use super::*;

    #[test]
    fn test_only_own_pid_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(std::process::id().wrapping_add(1)));
        assert!(!is_alive(0));
    }
}
