// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup for hosts, the MCP server and CLI commands.
//!
//! Logs always go to stderr. A host's stdout carries its status lines and
//! the MCP server's stdout carries JSON-RPC, so neither may be interleaved
//! with log output.

use std::io::{self, IsTerminal};

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Crate name used to scope the default filter.
const CRATE_TARGET: &str = "taskrelay";

/// How log lines are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One short line per event, no module path.
    Compact,
    /// Module path, file and line, plus span close events with timings.
    Verbose,
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Level for this crate when `RUST_LOG` is unset. Dependencies stay at
    /// `warn`.
    pub level: Level,
    pub format: LogFormat,
    pub ansi: bool,
    /// Full filter directive; overrides `level` but not `RUST_LOG`.
    pub directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            ansi: io::stderr().is_terminal(),
            directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Settings for the configured `logLevel`. Unknown names mean `warn`.
    pub fn from_level_name(name: &str) -> Self {
        let level = name.trim().parse::<Level>().unwrap_or(Level::WARN);
        Self {
            level,
            ..Self::default()
        }
    }

    /// `--debug`: debug level with file/line and span timings.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Verbose,
            ..Self::default()
        }
    }

    /// The MCP server's stderr is usually captured by the agent into a log
    /// file, so colours only add noise there.
    pub fn for_mcp(self) -> Self {
        self.with_ansi(false)
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = Some(directive.into());
        self
    }

    /// Directive used when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> String {
        match self.directive {
            Some(ref directive) => directive.clone(),
            None => format!("warn,{CRATE_TARGET}={}", self.level.as_str().to_lowercase()),
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.default_directive()))
            .unwrap_or_else(|_| EnvFilter::new(Level::WARN.as_str()))
    }
}

/// Keeps the subscriber installed; hold it for the life of the process.
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let verbose = config.format == LogFormat::Verbose;
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi)
        .with_target(verbose)
        .with_file(verbose)
        .with_line_number(verbose)
        .with_span_events(if verbose { FmtSpan::CLOSE } else { FmtSpan::NONE });

    let registry = tracing_subscriber::registry().with(config.filter());
    let installed = match config.format {
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Verbose => registry.with(layer).try_init(),
    };
    installed.map_err(|e| io::Error::other(e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_name_scopes_to_crate() {
        let config = TelemetryConfig::from_level_name("info");
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.default_directive(), "warn,taskrelay=info");
    }

    #[test]
    fn test_unknown_level_name_falls_back_to_warn() {
        assert_eq!(TelemetryConfig::from_level_name("chatty").level, Level::WARN);
        assert_eq!(TelemetryConfig::from_level_name(" DEBUG ").level, Level::DEBUG);
    }

    #[test]
    fn test_development_is_verbose() {
        let config = TelemetryConfig::development();
        assert_eq!(config.format, LogFormat::Verbose);
        assert_eq!(config.default_directive(), "warn,taskrelay=debug");
    }

    #[test]
    fn test_mcp_disables_colour_and_directive_overrides_level() {
        let config = TelemetryConfig::development()
            .with_ansi(true)
            .for_mcp()
            .with_directive("taskrelay::host=trace");
        assert!(!config.ansi);
        assert_eq!(config.default_directive(), "taskrelay::host=trace");
    }
}
