// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for delegation and supervision.
//!
//! Lightweight in-process counters and latency histograms. A [`Metrics`]
//! value is owned by the session registry and handed out as an
//! `Arc<Metrics>`; there is no process-wide instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Event counters tracked by [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Delegations,
    RequestsCreated,
    Responses,
    Restarts,
    Exhausted,
    Timeouts,
}

impl Counter {
    pub const ALL: [Counter; 6] = [
        Counter::Delegations,
        Counter::RequestsCreated,
        Counter::Responses,
        Counter::Restarts,
        Counter::Exhausted,
        Counter::Timeouts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::Delegations => "delegations",
            Counter::RequestsCreated => "requests_created",
            Counter::Responses => "responses",
            Counter::Restarts => "restarts",
            Counter::Exhausted => "exhausted",
            Counter::Timeouts => "timeouts",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    counters: [AtomicU64; 6],

    /// Operation durations by name.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            operations: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Bump a counter by one.
    pub fn increment(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of a counter.
    pub fn count(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Record a named operation duration.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.write_ops();
        let metrics = ops.entry(name.to_string()).or_insert_with(OperationMetrics::new);
        metrics.record(duration);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.read_ops().get(name).cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: Counter::ALL.iter().map(|c| (*c, self.count(*c))).collect(),
            operations: self.read_ops().clone(),
            uptime: self.uptime(),
        }
    }

    fn read_ops(&self) -> RwLockReadGuard<'_, HashMap<String, OperationMetrics>> {
        self.operations.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_ops(&self) -> RwLockWriteGuard<'_, HashMap<String, OperationMetrics>> {
        self.operations.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Durations recorded under one operation name (`delegate`,
/// `tool.complete_work`, `worker.session`, ...).
#[derive(Debug, Clone, Default)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
            Err(_) => self.total_duration.div_f64(self.count as f64),
        }
    }
}

/// Upper bounds of the histogram buckets. Delegations and worker sessions
/// run from seconds to hours.
const BUCKETS: [Duration; 7] = [
    Duration::from_secs(1),
    Duration::from_secs(10),
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(4 * 60 * 60),
];

/// Fixed-bucket duration histogram; the last slot counts overflows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    counts: [u64; BUCKETS.len() + 1],
}

impl Histogram {
    pub fn record(&mut self, duration: Duration) {
        let slot = BUCKETS
            .iter()
            .position(|bound| duration <= *bound)
            .unwrap_or(BUCKETS.len());
        self.counts[slot] += 1;
    }

    /// Number of recordings at or below `bound`'s bucket.
    pub fn count_within(&self, bound: Duration) -> u64 {
        BUCKETS
            .iter()
            .zip(self.counts.iter())
            .take_while(|(b, _)| **b <= bound)
            .map(|(_, c)| c)
            .sum()
    }

    /// Upper bound of the bucket holding the `p`th percentile, or `None`
    /// when it falls into the overflow slot or nothing was recorded.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return None;
        }
        let target = ((total as f64) * p / 100.0).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (slot, count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                return BUCKETS.get(slot).copied();
            }
        }
        None
    }
}

/// Point-in-time copy of a [`Metrics`].
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: Vec<(Counter, u64)>,
    pub operations: HashMap<String, OperationMetrics>,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Multi-line report printed by a host's `s` command.
    pub fn format_report(&self) -> String {
        let mut report = format!("up {}\n", format_duration(self.uptime));
        for (counter, value) in &self.counters {
            report.push_str(&format!("  {counter}: {value}\n"));
        }

        let mut names: Vec<_> = self.operations.keys().collect();
        names.sort();
        for name in names {
            let op = &self.operations[name];
            let p90 = op
                .histogram
                .percentile(90.0)
                .map_or_else(|| "> 4h".to_string(), |d| format!("<= {}", format_duration(d)));
            report.push_str(&format!(
                "  {name}: {} runs, avg {}, max {}, p90 {p90}\n",
                op.count,
                format_duration(op.avg_duration()),
                format_duration(op.max_duration),
            ));
        }
        report
    }
}

/// `45s`, `12m05s`, `3h20m`.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.increment(Counter::Delegations);
        metrics.increment(Counter::Delegations);
        metrics.increment(Counter::Restarts);

        assert_eq!(metrics.count(Counter::Delegations), 2);
        assert_eq!(metrics.count(Counter::Restarts), 1);
        assert_eq!(metrics.count(Counter::Timeouts), 0);
    }

    #[test]
    fn test_operation_metrics() {
        let mut metrics = OperationMetrics::new();
        metrics.record(Duration::from_secs(10));
        metrics.record(Duration::from_secs(20));
        metrics.record(Duration::from_secs(30));

        assert_eq!(metrics.count, 3);
        assert_eq!(metrics.avg_duration(), Duration::from_secs(20));
        assert_eq!(metrics.max_duration, Duration::from_secs(30));
        assert_eq!(OperationMetrics::new().avg_duration(), Duration::ZERO);
    }

    #[test]
    fn test_histogram_buckets() {
        let mut hist = Histogram::default();
        hist.record(Duration::from_millis(500));
        hist.record(Duration::from_secs(5));
        hist.record(Duration::from_secs(120));
        hist.record(Duration::from_secs(20_000));

        assert_eq!(hist.count_within(Duration::from_secs(1)), 1);
        assert_eq!(hist.count_within(Duration::from_secs(5 * 60)), 3);
        assert_eq!(hist.percentile(50.0), Some(Duration::from_secs(10)));
        // The slowest run overflows the last bucket.
        assert_eq!(hist.percentile(100.0), None);
        assert_eq!(Histogram::default().percentile(50.0), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(725)), "12m05s");
        assert_eq!(format_duration(Duration::from_secs(12_000)), "3h20m");
    }

    #[test]
    fn test_snapshot_report() {
        let metrics = Metrics::new();
        metrics.increment(Counter::Responses);
        metrics.record_operation("delegate", Duration::from_secs(90));

        let snapshot = metrics.snapshot();
        assert!(snapshot.operations.contains_key("delegate"));
        let report = snapshot.format_report();
        assert!(report.contains("responses: 1"));
        assert!(report.contains("delegate: 1 runs, avg 1m30s, max 1m30s, p90 <= 5m00s"));
    }
}
