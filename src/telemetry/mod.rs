// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics infrastructure.
//!
//! - **Tracing**: structured logging to stderr, filtered by `RUST_LOG` or
//!   the configured level
//! - **Metrics**: event counters and duration histograms, owned by the
//!   session registry and passed by handle
//!
//! ```rust,ignore
//! use taskrelay::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Public async entry points carry `#[instrument]` behind the `telemetry`
//! feature; record roles, branches and task numbers as fields, never
//! message bodies.

mod init;
pub mod metrics;

pub use init::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard};
pub use metrics::{Counter, Histogram, Metrics, MetricsSnapshot, OperationMetrics};
