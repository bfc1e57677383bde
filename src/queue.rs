//! The queue producer: builds jobs and enqueues them, and owns the shared
//! state that workers, the subscriber, and the reaper all run against.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use deadpool_redis::Pool;
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::config::{QueueConfig, RetentionConfig};
use crate::error::{JobResult, QueueError};
use crate::job::{Job, JobId, JobOptions, JobStatus};
use crate::keys::KeyNamer;
use crate::metrics::QueueMetrics;
use crate::scripts::ScriptRegistry;
use crate::subscriber::{JobOutcome, TrackedJobs};

/// Construction-time options for a [`Queue`], mirroring bee-queue's
/// `QueueOptions`.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Key prefix; defaults to `bq`.
    pub prefix: String,
    pub retention: RetentionConfig,
    pub worker: crate::config::WorkerConfig,
}

impl Default for QueueOptions {
    fn default() -> Self {
        let cfg = QueueConfig::default();
        Self {
            prefix: cfg.redis.key_prefix,
            retention: cfg.retention,
            worker: cfg.worker,
        }
    }
}

pub(crate) struct Inner {
    pub(crate) pool: Pool,
    pub(crate) keys: KeyNamer,
    pub(crate) scripts: ScriptRegistry,
    pub(crate) options: QueueOptions,
    pub(crate) tracked: Mutex<TrackedJobs>,
    pub(crate) shutdown: broadcast::Sender<()>,
    /// Kept alongside the pool so the event subscriber can open a
    /// dedicated (non-pooled) connection for its blocking subscribe loop.
    pub(crate) redis_url: String,
}

/// A handle to one named queue. Cheap to clone; all clones share the same
/// underlying connection pool and in-flight state.
#[derive(Clone)]
pub struct Queue {
    pub(crate) inner: Arc<Inner>,
}

impl Queue {
    /// Build a queue named `name` against an already-constructed pool.
    /// `redis_url` is kept so the event subscriber can open its own
    /// dedicated (non-pooled) connection.
    pub fn new(name: impl Into<String>, pool: Pool, redis_url: impl Into<String>, options: QueueOptions) -> JobResult<Self> {
        let keys = KeyNamer::new(options.prefix.clone(), name)?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                keys,
                scripts: ScriptRegistry::new(),
                options,
                tracked: Mutex::new(TrackedJobs::default()),
                shutdown,
                redis_url: redis_url.into(),
            }),
        })
    }

    /// The queue's name.
    pub fn name(&self) -> &str {
        self.inner.keys.queue_name()
    }

    /// Build a fresh, unsaved job. If `options.timestamp` is zero it is set
    /// to the current wall-clock time.
    pub fn create_job(&self, data: Value, options: JobOptions) -> Job {
        Job::create(data, options, now_ms())
    }

    /// Save a job: picks `addJob` or `addDelayedJob` depending on whether
    /// `options.delay` is positive, and populates the job's id and status
    /// from the result.
    pub async fn save(&self, job: &mut Job) -> JobResult<JobId> {
        let raw = job.to_data()?;
        let mut conn = self.inner.pool.get().await?;

        let id: String = if job.options.delay > 0 {
            let score = job.options.timestamp + job.options.delay;
            let keys = vec![
                self.inner.keys.id(),
                self.inner.keys.jobs(),
                self.inner.keys.delayed(),
                self.inner.keys.to_key("earlyDelayed"),
            ];
            let args = vec![String::new(), raw, score.to_string()];
            self.inner
                .scripts
                .invoke(&mut *conn, "addDelayedJob", &keys, &args)
                .await
                .map_err(|e| QueueError::Enqueue(e.to_string()))?
        } else {
            let keys = vec![self.inner.keys.id(), self.inner.keys.jobs(), self.inner.keys.waiting()];
            let args = vec![String::new(), raw];
            self.inner
                .scripts
                .invoke(&mut *conn, "addJob", &keys, &args)
                .await
                .map_err(|e| QueueError::Enqueue(e.to_string()))?
        };

        job.id = id.clone();
        job.status = if job.options.delay > 0 {
            JobStatus::Delayed
        } else {
            JobStatus::Waiting
        };

        debug!(queue = self.name(), job_id = %id, "job saved");
        QueueMetrics::job_enqueued(self.name());
        Ok(id)
    }

    /// Remove a job from every structure it could be in (manual
    /// cancellation/cleanup).
    pub async fn remove(&self, id: &str) -> JobResult<()> {
        let mut conn = self.inner.pool.get().await?;
        let keys = vec![
            self.inner.keys.jobs(),
            self.inner.keys.waiting(),
            self.inner.keys.active(),
            self.inner.keys.delayed(),
            self.inner.keys.stalling(),
            self.inner.keys.succeeded(),
            self.inner.keys.failed(),
        ];
        let args = vec![id.to_string()];
        let _: i64 = self.inner.scripts.invoke(&mut *conn, "removeJob", &keys, &args).await?;
        Ok(())
    }

    /// Fetch and decode a job by id, if it still exists.
    pub async fn get_job(&self, id: &str) -> JobResult<Option<Job>> {
        let mut conn = self.inner.pool.get().await?;
        let raw: Option<String> = conn.hget(self.inner.keys.jobs(), id).await.map_err(QueueError::StoreUnavailable)?;
        match raw {
            Some(raw) => Ok(Some(Job::from_data(id.to_string(), &raw)?)),
            None => Ok(None),
        }
    }

    /// Opt into being notified when `id` reaches a terminal state.
    /// Fire-and-forget is the default (`save` alone does not block); this
    /// is the explicit opt-in path, requiring the event subscriber to be
    /// running (started automatically by [`Queue::process`]).
    pub fn await_completion(&self, id: &str) -> oneshot::Receiver<JobOutcome> {
        let (tx, rx) = oneshot::channel();
        self.inner.tracked.lock().track(id.to_string(), tx);
        rx
    }

    /// Start `concurrency` worker units, the stalled-job reaper, and the
    /// event subscriber. The returned handle's `stop()` performs graceful
    /// shutdown with the configured grace period.
    pub fn process(&self, handler: crate::worker::JobHandler) -> crate::worker::ProcessHandle {
        let config = self.inner.options.worker.clone();
        let shutdown_timeout = config.shutdown_timeout();
        let queue = self.clone();
        let join = tokio::spawn(async move { crate::worker::run(queue, config, handler).await });
        crate::worker::ProcessHandle {
            queue: self.clone(),
            join,
            shutdown_timeout,
        }
    }

    /// Signal every running worker/reaper/subscriber task on this queue to
    /// stop; does not block for them to finish (see
    /// [`crate::worker::ProcessHandle::stop`] for the blocking variant).
    pub fn signal_shutdown(&self) {
        let _ = self.inner.shutdown.send(());
    }

    /// Release this queue's pooled connections. Also signals shutdown, so
    /// any running `process()` handle should be stopped first.
    pub fn close(&self) {
        self.signal_shutdown();
        self.inner.pool.close();
    }

    pub(crate) fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.inner.shutdown.subscribe()
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_options_default_prefix_is_bq() {
        assert_eq!(QueueOptions::default().prefix, "bq");
    }

    #[test]
    fn now_ms_is_positive_and_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(a > 0);
        assert!(b >= a);
    }
}
