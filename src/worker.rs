//! The worker loop: claim, hydrate, run, commit. This is the hard core of
//! the crate — the only place a job's state is allowed to change.

use std::sync::Arc;

use futures::future::BoxFuture;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::WorkerConfig;
use crate::error::{JobResult, QueueError};
use crate::job::{Job, JobStatus};
use crate::metrics::QueueMetrics;
use crate::queue::Queue;
use crate::reaper;
use crate::subscriber;

/// A handler invoked once per claimed job. `Ok` means success; `Err`
/// feeds into the retry/backoff decision exactly like any other failure.
pub type JobHandler = Arc<dyn Fn(Job) -> BoxFuture<'static, JobResult<Value>> + Send + Sync>;

/// A running worker pool, returned by [`Queue::process`](crate::queue::Queue::process).
pub struct ProcessHandle {
    pub(crate) queue: Queue,
    pub(crate) join: tokio::task::JoinHandle<()>,
    pub(crate) shutdown_timeout: std::time::Duration,
}

impl ProcessHandle {
    /// Signal every worker/reaper/subscriber task to stop, and wait up to
    /// the configured grace period for in-flight handlers to finish.
    pub async fn stop(self) -> JobResult<()> {
        self.queue.signal_shutdown();
        match tokio::time::timeout(self.shutdown_timeout, self.join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(QueueError::Internal(format!("worker pool task panicked: {e}"))),
            Err(_) => Err(QueueError::ShutdownTimeout(self.shutdown_timeout.as_millis() as u64)),
        }
    }
}

/// Runs `concurrency` worker units plus the stalled-job reaper and the
/// event subscriber, and blocks until every one of them has stopped.
///
/// Started from [`Queue::process`]; a caller typically races this against
/// a shutdown signal of their own and calls [`Queue::signal_shutdown`] to
/// stop it.
pub async fn run(queue: Queue, config: WorkerConfig, handler: JobHandler) {
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut shutdown = queue.subscribe_shutdown();

    let reaper_queue = queue.clone();
    let reaper_config = config.clone();
    let reaper_handle = tokio::spawn(async move { reaper::run(reaper_queue, reaper_config).await });

    let subscriber_queue = queue.clone();
    let subscriber_handle = tokio::spawn(async move { subscriber::run(subscriber_queue).await });

    let mut units = Vec::new();
    for unit in 0..config.concurrency {
        let queue = queue.clone();
        let handler = handler.clone();
        let semaphore = semaphore.clone();
        let job_timeout = config.job_timeout();
        let mut unit_shutdown = queue.subscribe_shutdown();
        units.push(tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = unit_shutdown.recv() => break,
                    permit = semaphore.clone().acquire_owned() => permit.expect("semaphore never closed"),
                };

                let claimed = tokio::select! {
                    _ = unit_shutdown.recv() => { drop(permit); break; },
                    claimed = claim(&queue) => claimed,
                };

                let id = match claimed {
                    Ok(Some(id)) => id,
                    Ok(None) => {
                        drop(permit);
                        continue;
                    }
                    Err(e) => {
                        warn!(unit, error = %e, "worker unit failed to claim a job, backing off");
                        drop(permit);
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        continue;
                    }
                };

                QueueMetrics::job_claimed(queue.name());
                let queue = queue.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    process_one(&queue, id, handler, job_timeout).await;
                });
            }
        }));
    }

    let _ = shutdown.recv().await;
    for unit in units {
        let _ = unit.await;
    }
    let _ = reaper_handle.await;
    let _ = subscriber_handle.await;
}

/// Atomically pop the head of `waiting` and push it onto the head of
/// `active` (`BLMOVE ... LEFT LEFT`), blocking until a job is available.
/// Returns `Ok(None)` only if the pool connection could not be obtained at
/// all (treated as a transient failure by the caller).
async fn claim(queue: &Queue) -> JobResult<Option<String>> {
    let mut conn = queue.inner.pool.get().await?;
    let waiting = queue.inner.keys.waiting();
    let active = queue.inner.keys.active();

    let id: Option<String> = conn
        .blmove(&waiting, &active, redis::Direction::Left, redis::Direction::Left, 0.0)
        .await
        .map_err(QueueError::StoreUnavailable)?;

    if let Some(id) = &id {
        let stalling = queue.inner.keys.stalling();
        let _: () = conn.sadd(&stalling, id).await.map_err(QueueError::StoreUnavailable)?;
    }

    Ok(id)
}

async fn process_one(queue: &Queue, id: String, handler: JobHandler, default_timeout: Option<std::time::Duration>) {
    let mut job = match hydrate(queue, &id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            // Phantom claim: the job hash entry is gone (e.g. retention
            // already cleaned it up). Still have to clear active/stalling.
            if let Err(e) = settle_phantom(queue, &id).await {
                error!(job_id = %id, error = %e, "failed to settle phantom claim");
            }
            return;
        }
        Err(QueueError::BadJob(e)) => {
            error!(job_id = %id, error = %e, "claimed job is malformed, committing as failed");
            if let Err(e) = commit_malformed(queue, &id).await {
                error!(job_id = %id, error = %e, "failed to commit malformed job, leaving for the reaper");
            }
            return;
        }
        Err(e) => {
            error!(job_id = %id, error = %e, "failed to hydrate claimed job");
            return;
        }
    };
    job.status = JobStatus::Active;

    // `options.timeout`, when set, overrides the worker pool's default for
    // this one job.
    let timeout = if job.options.timeout > 0 {
        Some(std::time::Duration::from_millis(job.options.timeout as u64))
    } else {
        default_timeout
    };

    let outcome = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, (handler)(job.clone())).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout(timeout.as_millis() as u64)),
        },
        None => (handler)(job.clone()).await,
    };

    if let Err(e) = commit_outcome(queue, &mut job, outcome).await {
        error!(job_id = %id, error = %e, "failed to commit job outcome, leaving for the reaper");
    }
}

async fn hydrate(queue: &Queue, id: &str) -> JobResult<Option<Job>> {
    let mut conn = queue.inner.pool.get().await?;
    let raw: Option<String> = conn
        .hget(queue.inner.keys.jobs(), id)
        .await
        .map_err(QueueError::StoreUnavailable)?;
    match raw {
        Some(raw) => Ok(Some(Job::from_data(id.to_string(), &raw)?)),
        None => Ok(None),
    }
}

async fn settle_phantom(queue: &Queue, id: &str) -> JobResult<()> {
    let mut conn = queue.inner.pool.get().await?;
    let _: () = redis::pipe()
        .atomic()
        .lrem(queue.inner.keys.active(), 0, id)
        .srem(queue.inner.keys.stalling(), id)
        .query_async(&mut *conn)
        .await
        .map_err(|e| QueueError::Commit(e.to_string()))?;
    Ok(())
}

/// A claimed job whose `jobs[id]` entry could not be decoded. Committed as
/// a terminal failure with message `"malformed job"`, same as any other
/// non-retryable handler error, since the original record can't be
/// recovered or retried.
async fn commit_malformed(queue: &Queue, id: &str) -> JobResult<()> {
    let keys = &queue.inner.keys;
    let mut conn = queue.inner.pool.get().await?;

    let job = Job {
        id: id.to_string(),
        status: JobStatus::Failed,
        data: Value::Null,
        options: crate::job::JobOptions {
            stacktraces: vec!["malformed job".to_string()],
            ..Default::default()
        },
    };

    let mut pipe = redis::pipe();
    pipe.atomic().lrem(keys.active(), 0, id).srem(keys.stalling(), id);

    if queue.inner.options.retention.remove_on_failure {
        pipe.hdel(keys.jobs(), id);
    } else {
        let raw = job.to_data()?;
        pipe.hset(keys.jobs(), id, raw).sadd(keys.failed(), id);
    }

    let event = serde_json::json!({
        "event": job.status.to_string(),
        "id": job.id,
        "data": "malformed job",
    });
    pipe.publish(keys.events(), event.to_string());

    let _: () = pipe
        .query_async(&mut *conn)
        .await
        .map_err(|e| QueueError::Commit(e.to_string()))?;

    QueueMetrics::job_failed(queue.name());
    debug!(job_id = %id, "committed malformed job as failed");
    Ok(())
}

/// The transactional commit pipeline: always remove the claimed id from
/// `active`/`stalling` first, then branch on the handler's outcome, then
/// publish exactly one event. Removal happens unconditionally so a crash
/// mid-commit can never leave the id double-claimable; bundling every
/// mutation into one pipeline makes the whole step atomic to observers.
async fn commit_outcome(queue: &Queue, job: &mut Job, outcome: JobResult<Value>) -> JobResult<()> {
    let keys = &queue.inner.keys;
    let mut conn = queue.inner.pool.get().await?;

    let mut pipe = redis::pipe();
    pipe.atomic().lrem(keys.active(), 0, &job.id).srem(keys.stalling(), &job.id);

    let event_data;
    match outcome {
        Ok(result) => {
            job.status = JobStatus::Succeeded;
            if queue.inner.options.retention.remove_on_success {
                pipe.hdel(keys.jobs(), &job.id);
            } else {
                let raw = job.to_data()?;
                pipe.hset(keys.jobs(), &job.id, raw).sadd(keys.succeeded(), &job.id);
            }
            event_data = result;
            QueueMetrics::job_succeeded(queue.name());
        }
        Err(e) => {
            job.add_error(e.to_string());
            let delay = job.get_delay();
            if delay < 0 {
                job.status = JobStatus::Failed;
                if queue.inner.options.retention.remove_on_failure {
                    pipe.hdel(keys.jobs(), &job.id);
                } else {
                    let raw = job.to_data()?;
                    pipe.hset(keys.jobs(), &job.id, raw).sadd(keys.failed(), &job.id);
                }
                event_data = Value::String(job.options.stacktraces.first().cloned().unwrap_or_default());
                QueueMetrics::job_failed(queue.name());
            } else {
                job.decrement_retries();
                job.status = JobStatus::Retrying;
                let raw = job.to_data()?;
                pipe.hset(keys.jobs(), &job.id, raw);
                if delay == 0 {
                    pipe.lpush(keys.waiting(), &job.id);
                } else {
                    let score = crate::queue::now_ms() + delay;
                    pipe.zadd(keys.delayed(), &job.id, score);
                }
                event_data = Value::String(job.options.stacktraces.first().cloned().unwrap_or_default());
                QueueMetrics::job_retried(queue.name());
            }
        }
    }

    let event = serde_json::json!({
        "event": job.status.to_string(),
        "id": job.id,
        "data": event_data,
    });
    pipe.publish(keys.events(), event.to_string());

    let _: () = pipe
        .query_async(&mut *conn)
        .await
        .map_err(|e| QueueError::Commit(e.to_string()))?;

    debug!(job_id = %job.id, status = %job.status, "commit applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BackoffOptions, BackoffStrategy, JobOptions};

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
    fn terminal_failure_event_data_is_latest_error() {
        let mut job = job_with(0, BackoffStrategy::Fixed, 0);
        job.add_error("boom");
        let data = job.options.stacktraces.first().cloned().unwrap_or_default();
        assert_eq!(data, "boom");
    }

    #[test]
    fn retry_chain_keeps_growing_stacktraces() {
        let mut job = job_with(2, BackoffStrategy::Exponential, 100);
        job.add_error("first");
        assert_eq!(job.get_delay(), 200);
        job.decrement_retries();
        job.add_error("second");
        assert_eq!(job.options.stacktraces, vec!["second", "first"]);
        assert_eq!(job.options.retries, 1);
    }

    #[test]
    fn malformed_job_synthesizes_a_terminal_failure_record() {
        let job = Job {
            id: "7".to_string(),
            status: JobStatus::Failed,
            data: serde_json::Value::Null,
            options: JobOptions {
                stacktraces: vec!["malformed job".to_string()],
                ..Default::default()
            },
        };
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.options.stacktraces, vec!["malformed job"]);
        let raw = job.to_data().unwrap();
        let decoded = Job::from_data(job.id.clone(), &raw).unwrap();
        assert_eq!(decoded.status, JobStatus::Failed);
        assert_eq!(decoded.options.stacktraces, vec!["malformed job"]);
    }
}
