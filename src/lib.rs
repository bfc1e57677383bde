//! A Redis-backed job queue client, compatible at the key and wire level
//! with the bee-queue convention: a prefix-namespaced set of lists, sets,
//! a sorted set, a hash, and a pub/sub channel under `prefix:queue:*`.
//!
//! # Example
//!
//! ```rust,ignore
//! use arcana_jobs::{Queue, QueueOptions, JobOptions};
//! use std::sync::Arc;
//!
//! let pool = arcana_jobs::create_pool(&redis_config).await?;
//! let queue = Queue::new("emails", pool, "redis://localhost:6379", QueueOptions::default())?;
//!
//! let mut job = queue.create_job(serde_json::json!({"to": "a@example.com"}), JobOptions::default());
//! queue.save(&mut job).await?;
//!
//! let handle = queue.process(Arc::new(|job| Box::pin(async move {
//!     println!("handling {}", job.id);
//!     Ok(serde_json::json!({"ok": true}))
//! })));
//! // ... later
//! handle.stop().await?;
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod keys;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod reaper;
pub mod scripts;
pub mod subscriber;
pub mod worker;

pub use config::{QueueConfig, RedisConfig, RetentionConfig, WorkerConfig};
pub use error::{JobResult, QueueError};
pub use job::{BackoffOptions, BackoffStrategy, Job, JobId, JobOptions, JobStatus};
pub use keys::KeyNamer;
pub use metrics::{register_metrics, QueueMetrics};
pub use pool::create_pool;
pub use queue::{Queue, QueueOptions};
pub use subscriber::JobOutcome;
pub use worker::{JobHandler, ProcessHandle};

/// Re-export of the most commonly used types.
pub mod prelude {
    pub use crate::config::QueueConfig;
    pub use crate::error::{JobResult, QueueError};
    pub use crate::job::{Job, JobId, JobOptions, JobStatus};
    pub use crate::queue::{Queue, QueueOptions};
    pub use crate::worker::JobHandler;
}
