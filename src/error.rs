//! Queue error types.

use thiserror::Error;

/// Result type for queue operations.
pub type JobResult<T> = Result<T, QueueError>;

/// Errors produced by the queue client.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The underlying store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    /// Acquiring a pooled connection failed.
    #[error("store pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// A script reload was attempted and failed, or the script is missing
    /// from the registry.
    #[error("script failed: {0}")]
    ScriptFailed(String),

    /// A job's serialized form could not be decoded.
    #[error("malformed job: {0}")]
    BadJob(#[from] serde_json::Error),

    /// `addJob`/`addDelayedJob` returned an error.
    #[error("enqueue failed: {0}")]
    Enqueue(String),

    /// The commit pipeline failed after a job was claimed. The job is left
    /// in `active`; the stalled-job reaper is the recovery path.
    #[error("commit failed: {0}")]
    Commit(String),

    /// The handler exceeded `options.timeout`.
    #[error("job timed out after {0}ms")]
    Timeout(u64),

    /// Graceful shutdown did not complete within the configured grace
    /// period.
    #[error("shutdown timed out after {0}ms")]
    ShutdownTimeout(u64),

    /// A queue or key-suffix name contained a `:`.
    #[error("invalid name: {0:?} must not contain ':'")]
    InvalidName(String),

    /// Any other internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// True for errors that the worker loop recovers from on its own
    /// (reconnect, reload script, let the reaper clean up) rather than
    /// surfacing to the handler's caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QueueError::StoreUnavailable(_) | QueueError::Pool(_) | QueueError::Commit(_)
        )
    }
}
