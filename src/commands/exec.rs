//! EXEC pipeline.
//!
//! One EXEC runs as a detached task that owns the drained queue and the
//! connection's watchers:
//!
//! 1. Abort with a null array if the watch registry is poisoned or dirty
//! 2. Begin a local transaction and bind the live cache to it
//! 3. Run every queued command in order against the bound cache
//! 4. Commit
//!
//! The watchers are dropped, and so deregistered, on every path. A task
//! whose connection went away still runs to commit, and a handle dropped
//! early rolls itself back.

use super::CommandEnvelope;
use crate::error::Error;
use crate::protocol::Frame;
use crate::server::WatchRegistry;
use crate::storage::{Cache, TransactionHandle};
use crate::Result;
use std::sync::atomic::Ordering;
use tracing::{debug, trace, warn};

/// Run a queued transaction for connection `origin` and build the EXEC reply.
pub async fn execute_transaction(
    cache: Cache,
    origin: u64,
    queue: Vec<CommandEnvelope>,
    watches: WatchRegistry,
) -> Result<Frame> {
    let task = tokio::spawn(run(cache, origin, queue, watches));
    task.await
        .map_err(|e| Error::Internal(format!("EXEC task failed: {}", e)))?
}

async fn run(
    cache: Cache,
    origin: u64,
    queue: Vec<CommandEnvelope>,
    watches: WatchRegistry,
) -> Result<Frame> {
    if watches.should_abort() {
        cache
            .engine()
            .transactions()
            .stats()
            .aborted_execs
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            client = origin,
            queued = queue.len(),
            "EXEC aborted, watched key changed"
        );
        return Ok(Frame::NullArray);
    }

    let handle = match TransactionHandle::begin(&cache, origin) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(client = origin, error = %e, "Failed to begin transaction");
            return Err(e);
        }
    };

    let bound = handle.cache().clone();
    let mut replies = Vec::with_capacity(queue.len());
    for envelope in queue {
        trace!(tx = handle.id(), command = envelope.name(), "Executing queued command");
        let reply = match envelope.execute(bound.clone()).await {
            Ok(frame) => frame,
            Err(e) => Frame::error(e.to_resp_error()),
        };
        replies.push(reply);
    }
    drop(bound);

    if let Err(e) = handle.commit() {
        warn!(client = origin, error = %e, "Transaction commit failed");
        return Err(e);
    }

    drop(watches);
    Ok(Frame::Array(replies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Command, CommandFlags, CommandRegistry, ParsedCommand};
    use crate::server::ClientSession;
    use crate::storage::{CacheEngine, ListenerBus, TransactionLimits};
    use crate::types::{Expiry, Key};
    use bytes::Bytes;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    /// Times out every stale transaction on the engine, including the one
    /// running this command.
    fn reap_now(
        _cmd: ParsedCommand,
        cache: Cache,
    ) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
        Box::pin(async move {
            let reaped = cache.engine().transactions().reap_timed_out();
            Ok(Frame::Integer(reaped as i64))
        })
    }

    const REAP: Command = Command::new(
        "REAP",
        0,
        0,
        CommandFlags::empty(),
        reap_now,
        "Reap stale transactions",
    );

    fn cache_with(limits: TransactionLimits) -> Cache {
        let engine = CacheEngine::with_limits(1, Arc::new(ListenerBus::default()), limits);
        Cache::new(Arc::new(engine))
    }

    fn envelope(registry: &CommandRegistry, parts: &[&str]) -> CommandEnvelope {
        let command = registry.get(parts[0]).unwrap();
        let args = parts[1..]
            .iter()
            .map(|a| Bytes::copy_from_slice(a.as_bytes()))
            .collect();
        CommandEnvelope::new(command, ParsedCommand::new(parts[0], args)).unwrap()
    }

    #[tokio::test]
    async fn test_reads_see_earlier_writes() {
        let registry = CommandRegistry::new();
        let cache = cache_with(TransactionLimits::default());
        let queue = vec![
            envelope(&registry, &["SET", "k", "1"]),
            envelope(&registry, &["INCR", "k"]),
            envelope(&registry, &["GET", "k"]),
        ];

        let reply = execute_transaction(cache.clone(), 7, queue, WatchRegistry::default())
            .await
            .unwrap();
        assert_eq!(
            reply,
            Frame::Array(vec![Frame::ok(), Frame::Integer(2), Frame::bulk("2")])
        );
        assert_eq!(cache.get(&Key::from("k")).await.unwrap(), Some(Bytes::from("2")));
        assert_eq!(cache.engine().transactions().active_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_command_does_not_stop_the_rest() {
        let registry = CommandRegistry::new();
        let cache = cache_with(TransactionLimits::default());
        cache
            .put(Key::from("s"), Bytes::from("abc"), Expiry::Never)
            .await
            .unwrap();
        let queue = vec![
            envelope(&registry, &["INCR", "s"]),
            envelope(&registry, &["SET", "t", "v"]),
        ];

        let reply = execute_transaction(cache.clone(), 1, queue, WatchRegistry::default())
            .await
            .unwrap();
        let items = reply.as_array().unwrap();
        assert!(items[0].is_error());
        assert_eq!(items[1], Frame::ok());
        assert_eq!(cache.get(&Key::from("t")).await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_empty_queue_commits_empty_array() {
        let cache = cache_with(TransactionLimits::default());
        let reply = execute_transaction(cache.clone(), 1, Vec::new(), WatchRegistry::default())
            .await
            .unwrap();
        assert_eq!(reply, Frame::empty_array());
        assert_eq!(
            cache
                .engine()
                .transactions()
                .stats()
                .committed
                .load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_start_failure_applies_nothing() {
        let registry = CommandRegistry::new();
        let cache = cache_with(TransactionLimits {
            max_active: 0,
            timeout: None,
        });
        let queue = vec![envelope(&registry, &["SET", "k", "v"])];

        let err = execute_transaction(cache.clone(), 1, queue, WatchRegistry::default())
            .await
            .unwrap_err();
        assert!(err.to_resp_error().starts_with("ERR"));
        assert_eq!(cache.get(&Key::from("k")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dirty_watch_aborts_without_running() {
        let registry = CommandRegistry::new();
        let cache = cache_with(TransactionLimits::default());
        let mut watches = WatchRegistry::default();
        watches.watch(&cache, vec![Key::from("k")]).unwrap();
        cache
            .put(Key::from("k"), Bytes::from("other"), Expiry::Never)
            .await
            .unwrap();

        let queue = vec![envelope(&registry, &["SET", "k", "mine"])];
        let reply = execute_transaction(cache.clone(), 1, queue, watches).await.unwrap();

        assert!(reply.is_null_array());
        assert_eq!(cache.get(&Key::from("k")).await.unwrap(), Some(Bytes::from("other")));
        assert_eq!(cache.engine().bus().listener_count(), 0);
        assert_eq!(cache.engine().transactions().stats().started.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_commit_after_timeout_fails() {
        let registry = CommandRegistry::new();
        let cache = cache_with(TransactionLimits {
            max_active: usize::MAX,
            timeout: Some(Duration::ZERO),
        });

        let handle = TransactionHandle::begin(&cache, 1).unwrap();
        let bound = handle.cache().clone();
        envelope(&registry, &["SET", "k", "v"])
            .execute(bound)
            .await
            .unwrap();
        assert_eq!(cache.engine().transactions().reap_timed_out(), 1);

        assert!(handle.commit().is_err());
        assert_eq!(cache.get(&Key::from("k")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_failure_during_exec() {
        let registry = CommandRegistry::new();
        let cache = cache_with(TransactionLimits {
            max_active: usize::MAX,
            timeout: Some(Duration::ZERO),
        });
        let mut session = ClientSession::new(3, cache.clone());
        session.watch(vec![Key::from("w")]).unwrap();
        session.begin_transaction().unwrap();
        session
            .enqueue(
                registry.get("SET").unwrap(),
                ParsedCommand::new("SET", vec![Bytes::from("k"), Bytes::from("v")]),
            )
            .unwrap();
        session
            .enqueue(&REAP, ParsedCommand::new("REAP", vec![]))
            .unwrap();

        let err = session.exec().await.unwrap_err();
        assert!(err.to_resp_error().starts_with("ERR failed to commit transaction"));

        let engine = cache.engine();
        assert_eq!(cache.get(&Key::from("k")).await.unwrap(), None);
        assert_eq!(engine.bus().listener_count(), 0);
        assert_eq!(engine.transactions().active_count(), 0);
        assert_eq!(
            engine.transactions().stats().commit_failures.load(Ordering::Relaxed),
            1
        );
        assert!(!session.is_queueing());
        assert_eq!(session.watch_count(), 0);
    }

    #[tokio::test]
    async fn test_exec_finishes_after_caller_drops() {
        let registry = CommandRegistry::new();
        let cache = cache_with(TransactionLimits::default());
        let mut session = ClientSession::new(4, cache.clone());
        session.watch(vec![Key::from("w")]).unwrap();
        session.begin_transaction().unwrap();
        session
            .enqueue(
                registry.get("SET").unwrap(),
                ParsedCommand::new("SET", vec![Bytes::from("k"), Bytes::from("v")]),
            )
            .unwrap();

        // Poll EXEC once so its task is spawned, then drop the caller.
        tokio::select! {
            biased;
            _ = session.exec() => {}
            _ = std::future::ready(()) => {}
        }
        assert!(!session.is_queueing());

        let stats = cache.engine().transactions().stats();
        for _ in 0..100 {
            if stats.committed.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(stats.committed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.rolled_back.load(Ordering::Relaxed), 0);
        assert_eq!(cache.engine().transactions().active_count(), 0);
        assert_eq!(cache.engine().bus().listener_count(), 0);
        assert_eq!(cache.get(&Key::from("k")).await.unwrap(), Some(Bytes::from("v")));
    }
}
