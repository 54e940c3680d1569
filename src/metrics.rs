//! Observability metrics for the controller.
//!
//! Metrics go through the `metrics` crate facade; installing a recorder and
//! exporter is left to the embedding process. Without a recorder every call
//! here is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `cadence_scheduling_decision_invoke_total` | Counter | `namespace`, `schedule` |
//! | `cadence_scheduling_decision_skip_total` | Counter | `namespace`, `schedule`, `reason` |
//! | `cadence_job_succeeded_total` | Counter | `namespace`, `schedule` |
//! | `cadence_job_failed_total` | Counter | `namespace`, `schedule` |
//! | `cadence_sync_one_wall_time_gauge_seconds` | Gauge | - |
//! | `cadence_sync_one_wall_time_histogram_seconds` | Histogram | - |
//! | `cadence_sync_all_wall_time_gauge_seconds` | Gauge | - |
//! | `cadence_sync_all_wall_time_histogram_seconds` | Histogram | - |
//!
//! ## Histogram buckets
//!
//! The facade records raw samples; bucket boundaries belong to the exporter.
//! Configure the two wall-time histograms with [`sync_one_buckets`] and
//! [`sync_all_buckets`] (for a Prometheus exporter, per-metric bucket
//! overrides keyed by the names in [`names`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cadence::events::EventBus;
//! use cadence::metrics::MetricsHandler;
//!
//! # async fn wire() {
//! let bus = EventBus::new();
//! bus.register(Arc::new(MetricsHandler::new())).await;
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::core::object::JobOutcome;
use crate::core::policy::SkipReason;
use crate::core::types::ObjectKey;
use crate::events::{Event, EventHandler};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: firings that launched a child.
    pub const SCHEDULING_DECISION_INVOKE_TOTAL: &str = "cadence_scheduling_decision_invoke_total";
    /// Counter: firings that were skipped, by reason.
    pub const SCHEDULING_DECISION_SKIP_TOTAL: &str = "cadence_scheduling_decision_skip_total";
    /// Counter: children observed to have succeeded.
    pub const JOB_SUCCEEDED_TOTAL: &str = "cadence_job_succeeded_total";
    /// Counter: children observed to have failed.
    pub const JOB_FAILED_TOTAL: &str = "cadence_job_failed_total";
    /// Gauge: wall time of the latest single-object reconciliation.
    pub const SYNC_ONE_WALL_TIME_SECONDS: &str = "cadence_sync_one_wall_time_gauge_seconds";
    /// Histogram: wall time of single-object reconciliations.
    pub const SYNC_ONE_WALL_TIME_HISTOGRAM_SECONDS: &str =
        "cadence_sync_one_wall_time_histogram_seconds";
    /// Gauge: wall time of the latest full pass.
    pub const SYNC_ALL_WALL_TIME_SECONDS: &str = "cadence_sync_all_wall_time_gauge_seconds";
    /// Histogram: wall time of full passes.
    pub const SYNC_ALL_WALL_TIME_HISTOGRAM_SECONDS: &str =
        "cadence_sync_all_wall_time_histogram_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Namespace of the schedule object.
    pub const NAMESPACE: &str = "namespace";
    /// Name of the schedule object.
    pub const SCHEDULE: &str = "schedule";
    /// Skip reason (concurrencyPolicy, missedDeadline, error).
    pub const REASON: &str = "reason";
}

/// Exporter buckets for
/// [`SYNC_ONE_WALL_TIME_HISTOGRAM_SECONDS`](names::SYNC_ONE_WALL_TIME_HISTOGRAM_SECONDS):
/// 1µs to 1s, ×10.
pub fn sync_one_buckets() -> Vec<f64> {
    exponential_buckets(1e-6, 10.0, 7)
}

/// Exporter buckets for
/// [`SYNC_ALL_WALL_TIME_HISTOGRAM_SECONDS`](names::SYNC_ALL_WALL_TIME_HISTOGRAM_SECONDS):
/// 1s to 59s in steps of 2s.
pub fn sync_all_buckets() -> Vec<f64> {
    linear_buckets(1.0, 2.0, 30)
}

fn exponential_buckets(start: f64, factor: f64, count: usize) -> Vec<f64> {
    std::iter::successors(Some(start), |b| Some(b * factor))
        .take(count)
        .collect()
}

fn linear_buckets(start: f64, width: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start + width * i as f64).collect()
}

/// Register descriptions for every controller metric with the installed
/// recorder. Call once after installing it.
pub fn describe_metrics() {
    describe_counter!(
        names::SCHEDULING_DECISION_INVOKE_TOTAL,
        "Firings that launched a child job"
    );
    describe_counter!(
        names::SCHEDULING_DECISION_SKIP_TOTAL,
        "Firings that were skipped, labelled by reason"
    );
    describe_counter!(names::JOB_SUCCEEDED_TOTAL, "Child jobs observed to succeed");
    describe_counter!(names::JOB_FAILED_TOTAL, "Child jobs observed to fail");
    describe_gauge!(
        names::SYNC_ONE_WALL_TIME_SECONDS,
        Unit::Seconds,
        "Wall time of the latest single schedule reconciliation"
    );
    describe_histogram!(
        names::SYNC_ONE_WALL_TIME_HISTOGRAM_SECONDS,
        Unit::Seconds,
        "Wall time of single schedule reconciliations"
    );
    describe_gauge!(
        names::SYNC_ALL_WALL_TIME_SECONDS,
        Unit::Seconds,
        "Wall time of the latest pass over all schedules"
    );
    describe_histogram!(
        names::SYNC_ALL_WALL_TIME_HISTOGRAM_SECONDS,
        Unit::Seconds,
        "Wall time of passes over all schedules"
    );
}

/// High-level interface for recording controller metrics.
///
/// Stateless and cheap to clone; every method goes straight to the facade.
#[derive(Debug, Clone, Default)]
pub struct ControllerMetrics;

impl ControllerMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Increments the invoke counter for `schedule`.
    pub fn record_invoke(&self, schedule: &ObjectKey) {
        counter!(
            names::SCHEDULING_DECISION_INVOKE_TOTAL,
            labels::NAMESPACE => schedule.namespace.clone(),
            labels::SCHEDULE => schedule.name.clone(),
        )
        .increment(1);
    }

    /// Increments the skip counter for `schedule` with the reason label.
    pub fn record_skip(&self, schedule: &ObjectKey, reason: SkipReason) {
        counter!(
            names::SCHEDULING_DECISION_SKIP_TOTAL,
            labels::NAMESPACE => schedule.namespace.clone(),
            labels::SCHEDULE => schedule.name.clone(),
            labels::REASON => reason.as_str(),
        )
        .increment(1);
    }

    /// Increments the succeeded or failed counter for `schedule`.
    pub fn record_job_finished(&self, schedule: &ObjectKey, outcome: JobOutcome) {
        let name = match outcome {
            JobOutcome::Succeeded => names::JOB_SUCCEEDED_TOTAL,
            JobOutcome::Failed => names::JOB_FAILED_TOTAL,
        };
        counter!(
            name,
            labels::NAMESPACE => schedule.namespace.clone(),
            labels::SCHEDULE => schedule.name.clone(),
        )
        .increment(1);
    }

    /// Records the wall time of one schedule reconciliation.
    pub fn observe_sync_one(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        gauge!(names::SYNC_ONE_WALL_TIME_SECONDS).set(secs);
        histogram!(names::SYNC_ONE_WALL_TIME_HISTOGRAM_SECONDS).record(secs);
    }

    /// Records the wall time of a full pass.
    pub fn observe_sync_all(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        gauge!(names::SYNC_ALL_WALL_TIME_SECONDS).set(secs);
        histogram!(names::SYNC_ALL_WALL_TIME_HISTOGRAM_SECONDS).record(secs);
    }
}

/// Event handler that maps controller events onto metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandler {
    metrics: ControllerMetrics,
}

impl MetricsHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventHandler for MetricsHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::FiringInvoked { schedule, .. } => self.metrics.record_invoke(schedule),
            Event::FiringSkipped {
                schedule, reason, ..
            } => self.metrics.record_skip(schedule, *reason),
            Event::ChildFinished {
                schedule, outcome, ..
            } => self.metrics.record_job_finished(schedule, *outcome),
            Event::SyncOneCompleted { duration, .. } => self.metrics.observe_sync_one(*duration),
            Event::SyncAllCompleted { duration, .. } => self.metrics.observe_sync_all(*duration),
        }
    }
}
