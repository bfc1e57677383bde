//! Queue metrics.
//!
//! Thin counters around the lifecycle transitions the worker loop and
//! producer already compute; no separate aggregation pass is needed.

use metrics::{counter, describe_counter};

/// Metric names.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "bq_jobs_enqueued_total";
    pub const JOBS_CLAIMED_TOTAL: &str = "bq_jobs_claimed_total";
    pub const JOBS_SUCCEEDED_TOTAL: &str = "bq_jobs_succeeded_total";
    pub const JOBS_FAILED_TOTAL: &str = "bq_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "bq_jobs_retried_total";
    pub const JOBS_REAPED_TOTAL: &str = "bq_jobs_reaped_total";
}

/// Register metric descriptions once at startup.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total jobs enqueued");
    describe_counter!(names::JOBS_CLAIMED_TOTAL, "Total jobs claimed by a worker");
    describe_counter!(names::JOBS_SUCCEEDED_TOTAL, "Total jobs that completed without error");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total jobs that exhausted their retries");
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total job attempts that ended in a retry");
    describe_counter!(names::JOBS_REAPED_TOTAL, "Total jobs returned to waiting by the stalled-job reaper");
}

/// Queue-scoped metrics recorder.
#[derive(Clone)]
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn job_enqueued(queue: &str) {
        counter!(names::JOBS_ENQUEUED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_claimed(queue: &str) {
        counter!(names::JOBS_CLAIMED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_succeeded(queue: &str) {
        counter!(names::JOBS_SUCCEEDED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_failed(queue: &str) {
        counter!(names::JOBS_FAILED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn job_retried(queue: &str) {
        counter!(names::JOBS_RETRIED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    pub fn jobs_reaped(queue: &str, count: u64) {
        counter!(names::JOBS_REAPED_TOTAL, "queue" => queue.to_string()).increment(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_does_not_panic() {
        register_metrics();
    }

    #[test]
    fn recording_does_not_panic() {
        QueueMetrics::job_enqueued("default");
        QueueMetrics::job_claimed("default");
        QueueMetrics::job_succeeded("default");
        QueueMetrics::job_failed("default");
        QueueMetrics::job_retried("default");
        QueueMetrics::jobs_reaped("default", 2);
    }
}
