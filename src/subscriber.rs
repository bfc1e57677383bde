//! Event subscriber: mirrors remote lifecycle transitions, published on the
//! `events` pub/sub channel, into locally tracked jobs.

use std::collections::HashMap;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::queue::Queue;

/// Outcome delivered to a caller that opted into awaiting a job's
/// completion via [`Queue::await_completion`](crate::queue::Queue).
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Succeeded(Value),
    Failed(String),
}

#[derive(Debug, Default)]
pub(crate) struct TrackedJobs {
    waiters: HashMap<String, oneshot::Sender<JobOutcome>>,
    retry_counts: HashMap<String, i64>,
}

impl TrackedJobs {
    pub(crate) fn track(&mut self, id: String, waiter: oneshot::Sender<JobOutcome>) {
        self.waiters.insert(id, waiter);
    }
}

#[derive(Debug, Deserialize)]
struct QueueEvent {
    event: String,
    id: String,
    #[serde(default)]
    data: Value,
}

/// Runs until the queue's shutdown signal fires. Subscribes to the `events`
/// channel and dispatches each message per the table in the `events`
/// component design: `progress` updates a counter, `retrying` decrements
/// it, `succeeded`/`failed` resolve and remove the tracked waiter.
pub async fn run(queue: Queue) {
    let mut shutdown = queue.subscribe_shutdown();
    let channel = queue.inner.keys.events();

    let client = match connect_dedicated_client(&queue) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "event subscriber could not connect, not starting");
            return;
        }
    };

    let mut pubsub = match client.get_async_pubsub().await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "event subscriber could not open pub/sub connection");
            return;
        }
    };
    if let Err(e) = pubsub.subscribe(&channel).await {
        warn!(error = %e, channel = %channel, "event subscriber could not subscribe");
        return;
    }
    let mut stream = pubsub.on_message();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            msg = stream.next() => {
                let Some(msg) = msg else { break };
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "event subscriber got a non-string payload");
                        continue;
                    }
                };
                handle_message(&queue, &payload);
            }
        }
    }
}

fn handle_message(queue: &Queue, payload: &str) {
    let event: QueueEvent = match serde_json::from_str(payload) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "event subscriber could not decode message");
            return;
        }
    };

    let mut tracked = queue.inner.tracked.lock();
    match event.event.as_str() {
        "progress" => {
            // Progress has no dedicated storage slot in this client; the
            // data is available to a caller polling `get_job` instead.
        }
        "retrying" => {
            let counter = tracked.retry_counts.entry(event.id.clone()).or_insert(0);
            *counter -= 1;
        }
        "succeeded" => {
            if let Some(waiter) = tracked.waiters.remove(&event.id) {
                let _ = waiter.send(JobOutcome::Succeeded(event.data));
            }
        }
        "failed" => {
            if let Some(waiter) = tracked.waiters.remove(&event.id) {
                let message = event.data.as_str().map(str::to_string).unwrap_or_else(|| event.data.to_string());
                let _ = waiter.send(JobOutcome::Failed(message));
            }
        }
        other => {
            warn!(event = other, "event subscriber ignoring unknown event");
        }
    }
}

/// A pub/sub subscribe blocks the connection for its whole lifetime, so it
/// cannot share the pool's short-lived command connections; this opens its
/// own.
fn connect_dedicated_client(queue: &Queue) -> Result<redis::Client, redis::RedisError> {
    redis::Client::open(queue.inner.redis_url.clone())
}
