// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OS-facing collaborators: processes, signals, pid markers, filesystem
//! events, source control and conversation logs.

pub mod conversation_log;
pub mod launcher;
pub mod liveness;
pub mod signal;
pub mod vcs;
pub mod watcher;

pub use conversation_log::{ConversationLog, LogTail};
pub use launcher::{ExitInfo, LaunchSpec, ProcessLauncher, TokioLauncher, WorkerProcess};
pub use liveness::{LivenessMarker, LivenessState};
pub use signal::{is_alive, terminate_pid, StopOutcome};
pub use vcs::{GitProbe, SourceControl};
pub use watcher::FileWatcher;
