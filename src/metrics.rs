//! Prometheus metrics
//!
//! Lock-free counters and fixed-bucket histograms rendered straight into
//! the Prometheus text exposition format on `/metrics`. Shared by the
//! dispatcher (ingest/decision metrics) and the discovery FSM.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::types::ActionStatus;

const ACTION_STATUSES: [ActionStatus; 5] = [
    ActionStatus::Queued,
    ActionStatus::PendingManual,
    ActionStatus::Sent,
    ActionStatus::Applied,
    ActionStatus::Rejected,
];

/// Fixed-bucket histogram with atomic counters. The float sum is kept as
/// bit-cast `u64` and accumulated with a CAS loop.
pub struct Histogram {
    bounds: &'static [f64],
    counts: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    total: AtomicU64,
}

impl Histogram {
    fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            counts: (0..bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_bits: AtomicU64::new(0.0_f64.to_bits()),
            total: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut current = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.sum_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    fn render_into(&self, body: &mut String, name: &str, help: &str) {
        use std::fmt::Write;
        let _ = writeln!(body, "# HELP {name} {help}");
        let _ = writeln!(body, "# TYPE {name} histogram");
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            let _ = writeln!(
                body,
                "{name}_bucket{{le=\"{bound}\"}} {}",
                count.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(body, "{name}_bucket{{le=\"+Inf\"}} {}", self.count());
        let _ = writeln!(body, "{name}_sum {}", self.sum());
        let _ = writeln!(body, "{name}_count {}", self.count());
    }
}

/// All exported metrics. One instance per process, shared via `Arc`.
pub struct Metrics {
    started_at: Instant,
    discover_scans_total: AtomicU64,
    discover_devices_found_total: AtomicU64,
    discover_devices_approved_total: AtomicU64,
    telemetry_ingest_total: AtomicU64,
    actions_total: [AtomicU64; 5],
    pub discover_duration_seconds: Histogram,
    pub engine_decision_latency_seconds: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            discover_scans_total: AtomicU64::new(0),
            discover_devices_found_total: AtomicU64::new(0),
            discover_devices_approved_total: AtomicU64::new(0),
            telemetry_ingest_total: AtomicU64::new(0),
            actions_total: Default::default(),
            discover_duration_seconds: Histogram::new(&[1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            engine_decision_latency_seconds: Histogram::new(&[
                0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]),
        }
    }

    pub fn inc_discover_scans(&self) {
        self.discover_scans_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_devices_found(&self, count: u64) {
        self.discover_devices_found_total
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_devices_approved(&self) {
        self.discover_devices_approved_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_telemetry_ingest(&self) {
        self.telemetry_ingest_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transition *into* a status (including the initial insert).
    pub fn inc_action(&self, status: ActionStatus) {
        let idx = ACTION_STATUSES
            .iter()
            .position(|s| *s == status)
            .unwrap_or(0);
        self.actions_total[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn devices_found_total(&self) -> u64 {
        self.discover_devices_found_total.load(Ordering::Relaxed)
    }

    pub fn scans_total(&self) -> u64 {
        self.discover_scans_total.load(Ordering::Relaxed)
    }

    /// Render the full exposition body.
    pub fn render(&self) -> String {
        use std::fmt::Write;
        let mut body = String::with_capacity(2048);

        let counters = [
            (
                "discover_scans_total",
                "Number of discovery scans triggered",
                &self.discover_scans_total,
            ),
            (
                "discover_devices_found_total",
                "Total devices identified via discovery",
                &self.discover_devices_found_total,
            ),
            (
                "discover_devices_approved_total",
                "Devices approved into the registry",
                &self.discover_devices_approved_total,
            ),
            (
                "telemetry_ingest_total",
                "Telemetry points ingested from the bus",
                &self.telemetry_ingest_total,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(body, "# HELP {name} {help}");
            let _ = writeln!(body, "# TYPE {name} counter");
            let _ = writeln!(body, "{name} {}", counter.load(Ordering::Relaxed));
        }

        let _ = writeln!(body, "# HELP actions_total Actions by lifecycle status");
        let _ = writeln!(body, "# TYPE actions_total counter");
        for (status, counter) in ACTION_STATUSES.iter().zip(&self.actions_total) {
            let _ = writeln!(
                body,
                "actions_total{{status=\"{status}\"}} {}",
                counter.load(Ordering::Relaxed)
            );
        }

        self.discover_duration_seconds.render_into(
            &mut body,
            "discover_duration_seconds",
            "Duration of discovery scans in seconds",
        );
        self.engine_decision_latency_seconds.render_into(
            &mut body,
            "engine_decision_latency_seconds",
            "Telemetry-to-decision latency in seconds",
        );

        let _ = writeln!(body, "# HELP uptime_seconds Process uptime in seconds");
        let _ = writeln!(body, "# TYPE uptime_seconds gauge");
        let _ = writeln!(body, "uptime_seconds {}", self.started_at.elapsed().as_secs());

        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_appear_in_exposition() {
        let metrics = Metrics::new();
        metrics.inc_discover_scans();
        metrics.add_devices_found(3);
        metrics.inc_telemetry_ingest();
        metrics.inc_action(ActionStatus::PendingManual);

        let body = metrics.render();
        assert!(body.contains("discover_scans_total 1"));
        assert!(body.contains("discover_devices_found_total 3"));
        assert!(body.contains("telemetry_ingest_total 1"));
        assert!(body.contains("actions_total{status=\"pending_manual\"} 1"));
        assert!(body.contains("# TYPE discover_duration_seconds histogram"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let metrics = Metrics::new();
        metrics.discover_duration_seconds.observe(4.2);
        metrics.discover_duration_seconds.observe(0.5);

        assert_eq!(metrics.discover_duration_seconds.count(), 2);
        assert!((metrics.discover_duration_seconds.sum() - 4.7).abs() < 1e-9);

        let body = metrics.render();
        assert!(body.contains("discover_duration_seconds_bucket{le=\"1\"} 1"));
        assert!(body.contains("discover_duration_seconds_bucket{le=\"5\"} 2"));
        assert!(body.contains("discover_duration_seconds_bucket{le=\"+Inf\"} 2"));
        assert!(body.contains("discover_duration_seconds_count 2"));
    }
}
