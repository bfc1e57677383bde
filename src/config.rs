//! Queue configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Store connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Terminal-job retention policy.
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            worker: WorkerConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

/// Store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Store URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for every key this queue touches.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "bq".to_string()
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrently-executing handlers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Handler timeout in seconds; zero disables the per-job timeout. Can
    /// be overridden per job via `JobOptions::timeout`.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// How often the stalled-job reaper invokes `checkStalledJobs`.
    #[serde(default = "default_stall_interval")]
    pub stall_interval_secs: u64,

    /// How often delayed jobs are raised into `waiting`.
    #[serde(default = "default_raise_interval")]
    pub raise_interval_ms: u64,

    /// Whether this queue instance runs the delayed-job raising loop at
    /// all. When several consumers share a queue, only one of them needs
    /// to run it; the rest can set this to `false` to save the repeated
    /// `ZRANGEBYSCORE` poll. Mirrors bee-queue's `activateDelayedJobs`.
    #[serde(default = "default_activation_delay")]
    pub activation_delay: bool,

    /// How long `stop()` waits for in-flight handlers to finish before
    /// giving up and returning `QueueError::ShutdownTimeout`.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            job_timeout_secs: default_job_timeout(),
            stall_interval_secs: default_stall_interval(),
            raise_interval_ms: default_raise_interval(),
            activation_delay: default_activation_delay(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .max(4)
}

fn default_job_timeout() -> u64 {
    0
}

fn default_stall_interval() -> u64 {
    5
}

fn default_raise_interval() -> u64 {
    500
}

fn default_activation_delay() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    pub fn stall_interval(&self) -> Duration {
        Duration::from_secs(self.stall_interval_secs)
    }

    pub fn raise_interval(&self) -> Duration {
        Duration::from_millis(self.raise_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Retention policy for jobs that reach a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Delete `jobs[id]` as soon as a job succeeds, instead of moving it
    /// into `succeeded`.
    #[serde(default)]
    pub remove_on_success: bool,

    /// Delete `jobs[id]` as soon as a job's retries are exhausted, instead
    /// of moving it into `failed`.
    #[serde(default)]
    pub remove_on_failure: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            remove_on_success: false,
            remove_on_failure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bee_queue_prefix() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.redis.key_prefix, "bq");
        assert!(!cfg.retention.remove_on_success);
        assert!(!cfg.retention.remove_on_failure);
        assert!(cfg.worker.activation_delay, "a lone consumer must raise its own delayed jobs by default");
    }

    #[test]
    fn zero_job_timeout_secs_disables_timeout() {
        let cfg = WorkerConfig {
            job_timeout_secs: 0,
            ..Default::default()
        };
        assert!(cfg.job_timeout().is_none());
    }
}
