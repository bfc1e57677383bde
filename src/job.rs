//! The job model: identity, payload, options, status, and the retry
//! decision function.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobResult, QueueError};

/// A job id, assigned by the server when the job is first saved.
pub type JobId = String;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Built locally, not yet saved.
    Created,
    /// Saved and sitting in `waiting`, eligible to be claimed.
    Waiting,
    /// Saved and sitting in `delayed`, not yet eligible.
    Delayed,
    /// Claimed by a worker and currently executing.
    Active,
    /// Finished without error.
    Succeeded,
    /// Exhausted its retries.
    Failed,
    /// Finished with an error and will be requeued.
    Retrying,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// Backoff strategy selected for a job's retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Retry right away.
    Immediate,
    /// Retry after a constant delay.
    Fixed,
    /// Retry after a delay that doubles on every failed attempt.
    Exponential,
}

/// Backoff configuration: which strategy, and its base delay in
/// milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffOptions {
    pub strategy: BackoffStrategy,
    /// Milliseconds. For `exponential`, this is mutated in place by
    /// [`JobOptions::get_delay`] as attempts fail, so the persisted job
    /// record carries its own growth without external retry-count
    /// bookkeeping.
    pub delay: i64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Immediate,
            delay: 0,
        }
    }
}

/// Per-job options, mirroring bee-queue's `JobOptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// When the job was created, ms since epoch.
    #[serde(default)]
    pub timestamp: i64,
    /// Delay before the job becomes eligible, ms. Zero means eligible
    /// immediately.
    #[serde(default)]
    pub delay: i64,
    /// Handler timeout, ms. Zero means no timeout.
    #[serde(default)]
    pub timeout: i64,
    /// Remaining retry attempts.
    #[serde(default)]
    pub retries: i64,
    /// Backoff strategy used to compute the delay before the next retry.
    #[serde(default)]
    pub backoff: BackoffOptions,
    /// Error messages from failed attempts, newest first.
    #[serde(default)]
    pub stacktraces: Vec<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            timestamp: 0,
            delay: 0,
            timeout: 0,
            retries: 0,
            backoff: BackoffOptions::default(),
            stacktraces: Vec::new(),
        }
    }
}

impl JobOptions {
    /// Prepend an error's message to `stacktraces`.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.stacktraces.insert(0, message.into());
    }

    /// One less attempt remaining. Only meaningful when `retries > 0`.
    pub fn decrement_retries(&mut self) {
        self.retries -= 1;
    }

    /// The retry decision: how long to wait before the next attempt, in
    /// milliseconds, or a negative value if no retry should happen.
    ///
    /// - `retries == 0` -> `-1` (no more attempts).
    /// - `fixed` -> `backoff.delay`, unchanged.
    /// - `exponential` -> `backoff.delay` is doubled in place and the new
    ///   value is returned, so the growth compounds across calls without
    ///   any state beyond the job record itself.
    /// - `immediate` (or anything unrecognized) -> `0`.
    pub fn get_delay(&mut self) -> i64 {
        if self.retries == 0 {
            return -1;
        }
        match self.backoff.strategy {
            BackoffStrategy::Fixed => self.backoff.delay,
            BackoffStrategy::Exponential => {
                self.backoff.delay *= 2;
                self.backoff.delay
            }
            BackoffStrategy::Immediate => 0,
        }
    }
}

/// A job: identity, payload, options, and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Assigned on save; absent (empty) for a freshly created job.
    #[serde(default)]
    pub id: JobId,
    pub status: JobStatus,
    pub data: Value,
    pub options: JobOptions,
}

/// The wire form stored at `jobs[id]`: status, data, and options, without
/// the id (the id is the hash field, not part of the value).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobData {
    status: JobStatus,
    data: Value,
    options: JobOptions,
}

impl Job {
    /// Build a freshly-created, not-yet-saved job. If `options.timestamp`
    /// is zero it is set to the current wall-clock time; `stacktraces` is
    /// reset to empty.
    pub fn create(data: Value, mut options: JobOptions, now_ms: i64) -> Self {
        if options.timestamp == 0 {
            options.timestamp = now_ms;
        }
        options.stacktraces = Vec::new();
        Self {
            id: String::new(),
            status: JobStatus::Created,
            data,
            options,
        }
    }

    /// Serialize `{status, data, options}` to JSON.
    pub fn to_data(&self) -> JobResult<String> {
        let data = JobData {
            status: self.status,
            data: self.data.clone(),
            options: self.options.clone(),
        };
        serde_json::to_string(&data).map_err(QueueError::BadJob)
    }

    /// Decode a `jobs[id]` entry, attaching the id that indexed it.
    pub fn from_data(id: JobId, raw: &str) -> JobResult<Self> {
        let data: JobData = serde_json::from_str(raw).map_err(QueueError::BadJob)?;
        Ok(Self {
            id,
            status: data.status,
            data: data.data,
            options: data.options,
        })
    }

    /// Prepend an error's message to this job's stacktraces.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.options.add_error(message);
    }

    /// One less attempt remaining.
    pub fn decrement_retries(&mut self) {
        self.options.decrement_retries();
    }

    /// See [`JobOptions::get_delay`].
    pub fn get_delay(&mut self) -> i64 {
        self.options.get_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(retries: i64, strategy: BackoffStrategy, delay: i64) -> Job {
        Job::create(
            serde_json::json!({"foo": 4}),
            JobOptions {
                retries,
                backoff: BackoffOptions { strategy, delay },
                ..Default::default()
            },
            1_700_000_000_000,
        )
    }

    #[test]
    fn no_retries_left_returns_negative_one() {
        let mut job = job_with(0, BackoffStrategy::Fixed, 1000);
        assert_eq!(job.get_delay(), -1);
    }

    #[test]
    fn fixed_backoff_is_unchanged_across_calls() {
        let mut job = job_with(3, BackoffStrategy::Fixed, 500);
        assert_eq!(job.get_delay(), 500);
        assert_eq!(job.get_delay(), 500);
        assert_eq!(job.options.backoff.delay, 500);
    }

    #[test]
    fn exponential_backoff_doubles_and_compounds() {
        let mut job = job_with(4, BackoffStrategy::Exponential, 100);
        assert_eq!(job.get_delay(), 200);
        assert_eq!(job.get_delay(), 400);
        assert_eq!(job.get_delay(), 800);
        assert_eq!(job.options.backoff.delay, 800);
    }

    #[test]
    fn immediate_backoff_is_always_zero() {
        let mut job = job_with(2, BackoffStrategy::Immediate, 999);
        assert_eq!(job.get_delay(), 0);
        assert_eq!(job.options.backoff.delay, 999, "immediate never mutates delay");
    }

    #[test]
    fn add_error_prepends_newest_first() {
        let mut job = job_with(1, BackoffStrategy::Fixed, 0);
        job.add_error("first failure");
        job.add_error("second failure");
        assert_eq!(job.options.stacktraces, vec!["second failure", "first failure"]);
    }

    #[test]
    fn decrement_retries_counts_down() {
        let mut job = job_with(3, BackoffStrategy::Fixed, 0);
        job.decrement_retries();
        assert_eq!(job.options.retries, 2);
    }

    #[test]
    fn round_trips_through_serialized_form() {
        let mut job = job_with(2, BackoffStrategy::Exponential, 50);
        job.id = "7".to_string();
        job.status = JobStatus::Waiting;
        let raw = job.to_data().unwrap();
        let decoded = Job::from_data(job.id.clone(), &raw).unwrap();
        assert_eq!(decoded.status, job.status);
        assert_eq!(decoded.data, job.data);
        assert_eq!(decoded.options.retries, job.options.retries);
        assert_eq!(decoded.options.backoff.delay, job.options.backoff.delay);
    }

    #[test]
    fn create_sets_timestamp_when_zero() {
        let job = Job::create(serde_json::json!(null), JobOptions::default(), 42);
        assert_eq!(job.options.timestamp, 42);
        assert_eq!(job.status, JobStatus::Created);
    }

    #[test]
    fn create_preserves_explicit_timestamp() {
        let job = Job::create(
            serde_json::json!(null),
            JobOptions {
                timestamp: 10,
                ..Default::default()
            },
            42,
        );
        assert_eq!(job.options.timestamp, 10);
    }
}
