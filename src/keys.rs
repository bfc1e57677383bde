//! Key naming for a single queue's namespace.
//!
//! Every key a queue touches is `prefix:queue_name:suffix`, matching the
//! layout an external bee-queue-compatible producer or consumer expects.

use crate::error::QueueError;

/// Builds the namespaced Redis keys for one queue.
#[derive(Debug, Clone)]
pub struct KeyNamer {
    prefix: String,
    queue_name: String,
}

impl KeyNamer {
    /// Construct a namer for `queue_name` under `prefix`. Fails if either
    /// contains a `:`, which would make keys ambiguous to split.
    pub fn new(prefix: impl Into<String>, queue_name: impl Into<String>) -> Result<Self, QueueError> {
        let prefix = prefix.into();
        let queue_name = queue_name.into();
        if prefix.contains(':') {
            return Err(QueueError::InvalidName(prefix));
        }
        if queue_name.contains(':') {
            return Err(QueueError::InvalidName(queue_name));
        }
        Ok(Self { prefix, queue_name })
    }

    /// The queue name this namer was built for.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// `prefix:queue_name:suffix`.
    pub fn to_key(&self, suffix: &str) -> String {
        format!("{}:{}:{}", self.prefix, self.queue_name, suffix)
    }

    /// Counter key assigning job ids.
    pub fn id(&self) -> String {
        self.to_key("id")
    }

    /// Hash of `id -> serialized job`.
    pub fn jobs(&self) -> String {
        self.to_key("jobs")
    }

    /// List of ids ready to be claimed.
    pub fn waiting(&self) -> String {
        self.to_key("waiting")
    }

    /// List of ids currently claimed by a worker.
    pub fn active(&self) -> String {
        self.to_key("active")
    }

    /// Heartbeat set of ids checked in by active workers.
    pub fn stalling(&self) -> String {
        self.to_key("stalling")
    }

    /// Sorted set of not-yet-eligible ids, scored by eligible time (ms).
    pub fn delayed(&self) -> String {
        self.to_key("delayed")
    }

    /// Set of ids that completed successfully (when retained).
    pub fn succeeded(&self) -> String {
        self.to_key("succeeded")
    }

    /// Set of ids that exhausted their retries (when retained).
    pub fn failed(&self) -> String {
        self.to_key("failed")
    }

    /// Pub/sub channel carrying lifecycle events.
    pub fn events(&self) -> String {
        self.to_key("events")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefix_queue_suffix() {
        let keys = KeyNamer::new("bq", "emails").unwrap();
        assert_eq!(keys.waiting(), "bq:emails:waiting");
        assert_eq!(keys.jobs(), "bq:emails:jobs");
        assert_eq!(keys.events(), "bq:emails:events");
    }

    #[test]
    fn rejects_colon_in_queue_name() {
        assert!(KeyNamer::new("bq", "bad:name").is_err());
    }

    #[test]
    fn rejects_colon_in_prefix() {
        assert!(KeyNamer::new("bad:prefix", "emails").is_err());
    }
}
