//! Process-local observability metrics (SPEC_FULL.md's ambient stack
//! section), distinct from the Redis `stat:` counters in [`crate::stats`].
//! These never touch Redis; they exist for whatever Prometheus exporter the
//! embedder wires up via the `metrics` crate's recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

pub mod names {
    pub const JOBS_RESERVED_TOTAL: &str = "resqueue_jobs_reserved_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "resqueue_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "resqueue_jobs_failed_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "resqueue_jobs_skipped_total";

    pub const JOB_DURATION_SECONDS: &str = "resqueue_job_duration_seconds";
    pub const RESERVE_DURATION_SECONDS: &str = "resqueue_reserve_duration_seconds";

    pub const WORKERS_ACTIVE: &str = "resqueue_workers_active";
    pub const WORKERS_PRUNED_TOTAL: &str = "resqueue_workers_pruned_total";

    pub const DELAYED_JOBS_PROMOTED_TOTAL: &str = "resqueue_delayed_jobs_promoted_total";
}

/// Registers human-readable descriptions with whatever global recorder the
/// embedder has installed. Safe to call more than once.
pub fn register_metrics() {
    describe_counter!(names::JOBS_RESERVED_TOTAL, "Total jobs reserved from a queue");
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total jobs that ran to completion");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total jobs that failed");
    describe_counter!(names::JOBS_SKIPPED_TOTAL, "Total jobs that declined to perform");

    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");
    describe_histogram!(names::RESERVE_DURATION_SECONDS, "Time spent waiting on a reservation");

    describe_gauge!(names::WORKERS_ACTIVE, "Currently registered workers on this host");
    describe_counter!(names::WORKERS_PRUNED_TOTAL, "Total dead workers removed by the pruner");

    describe_counter!(
        names::DELAYED_JOBS_PROMOTED_TOTAL,
        "Total delayed jobs promoted into a live queue"
    );
}

pub fn record_reserved() {
    counter!(names::JOBS_RESERVED_TOTAL).increment(1);
}

pub fn record_completed(duration: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_failed(duration: Duration) {
    counter!(names::JOBS_FAILED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_skipped() {
    counter!(names::JOBS_SKIPPED_TOTAL).increment(1);
}

pub fn record_reserve_duration(duration: Duration) {
    histogram!(names::RESERVE_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn set_workers_active(count: usize) {
    gauge!(names::WORKERS_ACTIVE).set(count as f64);
}

pub fn record_workers_pruned(count: usize) {
    counter!(names::WORKERS_PRUNED_TOTAL).increment(count as u64);
}

pub fn record_delayed_promoted(count: usize) {
    counter!(names::DELAYED_JOBS_PROMOTED_TOTAL).increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_namespaced() {
        assert!(names::JOBS_RESERVED_TOTAL.starts_with("resqueue_"));
        assert!(names::JOB_DURATION_SECONDS.ends_with("_seconds"));
    }
}
