//! The five server-side atomic scripts the queue relies on, and a registry
//! that invokes them by name while transparently reloading on `NOSCRIPT`.

use std::collections::HashMap;

use redis::{aio::ConnectionLike, Script};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{JobResult, QueueError};

const ADD_JOB: &str = include_str!("../scripts/addJob.lua");
const ADD_DELAYED_JOB: &str = include_str!("../scripts/addDelayedJob.lua");
const CHECK_STALLED_JOBS: &str = include_str!("../scripts/checkStalledJobs.lua");
const RAISE_DELAYED_JOBS: &str = include_str!("../scripts/raiseDelayedJobs.lua");
const REMOVE_JOB: &str = include_str!("../scripts/removeJob.lua");

/// Declared key-count contract for a registered script, kept alongside the
/// script itself so callers can be debug-asserted against mistakes.
#[derive(Debug, Clone, Copy)]
pub struct ScriptInfo {
    pub num_keys: usize,
}

/// Holds the opaque script bodies and caches their server-side SHA hashes.
///
/// `invoke` is the only entry point callers need: it loads the script on
/// first use and reloads it exactly once if the server reports the hash is
/// unknown (e.g. after a `SCRIPT FLUSH` or a failover to a fresh replica).
pub struct ScriptRegistry {
    scripts: HashMap<&'static str, (Script, ScriptInfo)>,
    // Guards against two callers racing to reload the same script.
    reload_lock: Mutex<()>,
}

impl ScriptRegistry {
    /// Build the registry with all five bee-queue scripts pre-loaded (in
    /// memory; nothing touches the network until `invoke` is called).
    pub fn new() -> Self {
        let mut scripts = HashMap::new();
        scripts.insert("addJob", (Script::new(ADD_JOB), ScriptInfo { num_keys: 3 }));
        scripts.insert(
            "addDelayedJob",
            (Script::new(ADD_DELAYED_JOB), ScriptInfo { num_keys: 4 }),
        );
        scripts.insert(
            "checkStalledJobs",
            (Script::new(CHECK_STALLED_JOBS), ScriptInfo { num_keys: 4 }),
        );
        scripts.insert(
            "raiseDelayedJobs",
            (Script::new(RAISE_DELAYED_JOBS), ScriptInfo { num_keys: 2 }),
        );
        scripts.insert(
            "removeJob",
            (Script::new(REMOVE_JOB), ScriptInfo { num_keys: 7 }),
        );
        Self {
            scripts,
            reload_lock: Mutex::new(()),
        }
    }

    /// Invoke the named script against `conn`, retrying once on `NOSCRIPT`.
    pub async fn invoke<C, T>(&self, conn: &mut C, name: &str, keys: &[String], args: &[String]) -> JobResult<T>
    where
        C: ConnectionLike + Send,
        T: redis::FromRedisValue,
    {
        let (script, info) = self
            .scripts
            .get(name)
            .ok_or_else(|| QueueError::ScriptFailed(format!("unknown script {name:?}")))?;
        debug_assert_eq!(keys.len(), info.num_keys, "key-count mismatch for {name}");

        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        match invocation.invoke_async(conn).await {
            Ok(value) => Ok(value),
            Err(e) if is_noscript(&e) => {
                let _guard = self.reload_lock.lock().await;
                warn!(script = name, "script missing on server, reloading");
                script
                    .load_async(conn)
                    .await
                    .map_err(|e| QueueError::ScriptFailed(format!("{name} reload failed: {e}")))?;

                let mut retry = script.prepare_invoke();
                for key in keys {
                    retry.key(key);
                }
                for arg in args {
                    retry.arg(arg);
                }
                retry
                    .invoke_async(conn)
                    .await
                    .map_err(|e| QueueError::ScriptFailed(format!("{name} failed after reload: {e}")))
            }
            Err(e) => Err(QueueError::StoreUnavailable(e)),
        }
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_noscript(err: &redis::RedisError) -> bool {
    err.code() == Some("NOSCRIPT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_five_scripts_registered_with_correct_key_counts() {
        let registry = ScriptRegistry::new();
        let expected: &[(&str, usize)] = &[
            ("addJob", 3),
            ("addDelayedJob", 4),
            ("checkStalledJobs", 4),
            ("raiseDelayedJobs", 2),
            ("removeJob", 7),
        ];
        for (name, num_keys) in expected {
            let (_, info) = registry.scripts.get(name).expect("script registered");
            assert_eq!(info.num_keys, *num_keys, "{name} key count");
        }
    }
}
