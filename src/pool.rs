//! Store connection pooling.

use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

use crate::config::RedisConfig;
use crate::error::{JobResult, QueueError};

/// Build and validate a pooled connection to the store.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!(url = %config.url, "creating store connection pool");

    let cfg = Config::from_url(&config.url);
    let pool = cfg
        .builder()
        .map_err(|e| QueueError::Internal(format!("invalid store config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueueError::Internal(format!("failed to build pool: {e}")))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("store connection pool ready");
    Ok(pool)
}
