//! Background maintenance: the stalled-job reaper (recovers jobs whose
//! worker died between claim and commit) and the delayed-job raiser
//! (moves eligible delayed jobs into `waiting`). Both are periodic,
//! low-stakes tasks, so they share one background task.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::error::JobResult;
use crate::metrics::QueueMetrics;
use crate::queue::{now_ms, Queue};

const MAX_RAISE_PER_TICK: i64 = 1000;

/// Runs until the queue's shutdown signal fires.
pub async fn run(queue: Queue, config: WorkerConfig) {
    let mut shutdown = queue.subscribe_shutdown();
    let mut stall_ticker = tokio::time::interval(config.stall_interval());
    // Skip the immediate first tick so reaping doesn't race the very first
    // worker's check-in.
    stall_ticker.tick().await;

    // `activation_delay` off means this queue instance leaves raising
    // delayed jobs to another consumer sharing the same keys.
    let mut raise_ticker = config.activation_delay.then(|| tokio::time::interval(config.raise_interval()));
    if let Some(t) = raise_ticker.as_mut() {
        t.tick().await;
    }

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = stall_ticker.tick() => {
                if let Err(e) = reap_stalled(&queue, config.stall_interval()).await {
                    warn!(error = %e, "stalled-job reap failed");
                }
            }
            _ = raise_tick(raise_ticker.as_mut()) => {
                if let Err(e) = raise_delayed(&queue).await {
                    warn!(error = %e, "delayed-job raise failed");
                }
            }
        }
    }
}

/// Awaits the next raise tick, or never resolves when raising is disabled
/// for this queue instance.
async fn raise_tick(ticker: Option<&mut tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn reap_stalled(queue: &Queue, interval: Duration) -> JobResult<()> {
    let keys = &queue.inner.keys;
    let mut conn = queue.inner.pool.get().await?;

    let script_keys = vec![
        keys.to_key("stallBlock"),
        keys.stalling(),
        keys.waiting(),
        keys.active(),
    ];
    let ttl_ms = (interval.as_millis() as i64).max(1);
    let args = vec![ttl_ms.to_string()];

    let reaped: i64 = queue
        .inner
        .scripts
        .invoke(&mut *conn, "checkStalledJobs", &script_keys, &args)
        .await?;

    if reaped > 0 {
        debug!(queue = queue.name(), reaped, "reaped stalled jobs");
        QueueMetrics::jobs_reaped(queue.name(), reaped as u64);
    }
    Ok(())
}

async fn raise_delayed(queue: &Queue) -> JobResult<()> {
    let keys = &queue.inner.keys;
    let mut conn = queue.inner.pool.get().await?;

    let script_keys = vec![keys.delayed(), keys.waiting()];
    let args = vec![now_ms().to_string(), MAX_RAISE_PER_TICK.to_string()];

    let raised: i64 = queue
        .inner
        .scripts
        .invoke(&mut *conn, "raiseDelayedJobs", &script_keys, &args)
        .await?;

    if raised > 0 {
        debug!(queue = queue.name(), raised, "raised delayed jobs into waiting");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raise_tick_never_resolves_when_disabled() {
        let resolved = tokio::time::timeout(Duration::from_millis(50), raise_tick(None)).await;
        assert!(resolved.is_err(), "a disabled raise ticker must never fire");
    }
}
