// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Terminal commands for a running host.
//!
//! A blocking reader thread turns stdin lines into [`InputCommand`]s. After
//! each recognised command the thread parks until the host calls
//! [`InputListener::resume`], so it never reads stdin while an interactive
//! worker owns the terminal.

use std::io::{BufRead, IsTerminal, Write};
use std::sync::mpsc as std_mpsc;

use tokio::sync::mpsc;
use tracing::debug;

/// A command typed into the host's terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCommand {
    /// Hand the worker to the human at the terminal.
    Manual,
    /// Toggle printing of every activity check.
    ToggleActivity,
    /// Print the current session table.
    Status,
}

/// Parse one line of terminal input.
pub fn parse_command(line: &str) -> Option<InputCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "m" | "manual" => Some(InputCommand::Manual),
        "a" | "activity" => Some(InputCommand::ToggleActivity),
        "s" | "status" => Some(InputCommand::Status),
        _ => None,
    }
}

pub struct InputListener {
    commands: mpsc::UnboundedReceiver<InputCommand>,
    resume: std_mpsc::Sender<()>,
}

impl InputListener {
    /// Start listening on stdin. `None` when stdin is not a terminal.
    pub fn spawn() -> Option<Self> {
        if !std::io::stdin().is_terminal() {
            return None;
        }

        let (tx, commands) = mpsc::unbounded_channel();
        let (resume, parked) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("taskrelay-input".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut line = String::new();
                loop {
                    line.clear();
                    match stdin.lock().read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    let Some(command) = parse_command(&line) else {
                        continue;
                    };
                    if tx.send(command).is_err() || parked.recv().is_err() {
                        break;
                    }
                }
                debug!("Input listener stopped");
            })
            .ok()?;

        Some(Self { commands, resume })
    }

    /// Next command. `None` once stdin is closed.
    pub async fn next(&mut self) -> Option<InputCommand> {
        self.commands.recv().await
    }

    /// Let the reader thread take the next line.
    pub fn resume(&self) {
        let _ = self.resume.send(());
    }
}

/// Next command from an optional listener; pending forever without one.
pub async fn next_command(listener: &mut Option<InputListener>) -> Option<InputCommand> {
    match listener {
        Some(l) => l.next().await,
        None => std::future::pending().await,
    }
}

/// Ask a yes/no question on the terminal. Defaults to no, and to no
/// without asking when stdin is not a terminal.
pub fn confirm(question: &str) -> bool {
    if !std::io::stdin().is_terminal() {
        return false;
    }
    print!("{question} [y/N] ");
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
