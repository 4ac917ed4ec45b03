//! Server command implementations.

use super::ParsedCommand;
use crate::protocol::Frame;
use crate::storage::{Cache, Decorator};
use crate::Result;
use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;

/// DBSIZE
pub fn cmd_dbsize(
    _cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { Ok(Frame::Integer(cache.size() as i64)) })
}

/// INFO [section]
///
/// Sections: server, stats, listeners, transactions, keyspace.
pub fn cmd_info(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let section = match cmd.args.first() {
            Some(_) => cmd.get_str(0)?.to_lowercase(),
            None => "all".to_string(),
        };
        Ok(Frame::Bulk(render_info(&cache, &section).into()))
    })
}

fn render_info(cache: &Cache, section: &str) -> String {
    let include = |name: &str| matches!(section, "all" | "everything" | "default") || section == name;
    let engine = cache.engine();
    let mut info = String::new();

    if include("server") {
        info.push_str("# Server\r\n");
        let _ = write!(info, "cachewire_version:{}\r\n", crate::VERSION);
        let _ = write!(info, "node_id:{}\r\n", engine.node_id());
        let _ = write!(info, "os:{}\r\n", std::env::consts::OS);
        info.push_str("\r\n");
    }

    if include("stats") {
        info.push_str("# Stats\r\n");
        let stats = cache.decorators().into_iter().find_map(|d| match d {
            Decorator::Stats(stats) => Some(stats.clone()),
            _ => None,
        });
        if let Some(stats) = stats {
            let _ = write!(info, "keyspace_hits:{}\r\n", stats.hits.load(Ordering::Relaxed));
            let _ = write!(info, "keyspace_misses:{}\r\n", stats.misses.load(Ordering::Relaxed));
            let _ = write!(info, "keyspace_writes:{}\r\n", stats.writes.load(Ordering::Relaxed));
            let _ = write!(info, "keyspace_removals:{}\r\n", stats.removals.load(Ordering::Relaxed));
            let _ = write!(info, "hit_ratio:{:.4}\r\n", stats.hit_ratio());
        }
        info.push_str("\r\n");
    }

    if include("listeners") {
        let bus = engine.bus();
        let stats = bus.stats();
        info.push_str("# Listeners\r\n");
        let _ = write!(info, "active_listeners:{}\r\n", bus.listener_count());
        let _ = write!(info, "watched_keys:{}\r\n", bus.watched_key_count());
        let _ = write!(info, "total_registrations:{}\r\n", stats.registrations.load(Ordering::Relaxed));
        let _ = write!(info, "rejected_registrations:{}\r\n", stats.rejected.load(Ordering::Relaxed));
        let _ = write!(info, "events_published:{}\r\n", stats.events_published.load(Ordering::Relaxed));
        let _ = write!(info, "listener_deliveries:{}\r\n", stats.deliveries.load(Ordering::Relaxed));
        info.push_str("\r\n");
    }

    if include("transactions") {
        let table = engine.transactions();
        let stats = table.stats();
        info.push_str("# Transactions\r\n");
        let _ = write!(info, "active_transactions:{}\r\n", table.active_count());
        let _ = write!(info, "started:{}\r\n", stats.started.load(Ordering::Relaxed));
        let _ = write!(info, "committed:{}\r\n", stats.committed.load(Ordering::Relaxed));
        let _ = write!(info, "rolled_back:{}\r\n", stats.rolled_back.load(Ordering::Relaxed));
        let _ = write!(info, "timed_out:{}\r\n", stats.timed_out.load(Ordering::Relaxed));
        let _ = write!(info, "start_failures:{}\r\n", stats.start_failures.load(Ordering::Relaxed));
        let _ = write!(info, "commit_failures:{}\r\n", stats.commit_failures.load(Ordering::Relaxed));
        let _ = write!(info, "aborted_execs:{}\r\n", stats.aborted_execs.load(Ordering::Relaxed));
        info.push_str("\r\n");
    }

    if include("keyspace") {
        info.push_str("# Keyspace\r\n");
        if !engine.is_empty() {
            let _ = write!(info, "keys:{}\r\n", engine.len());
        }
        info.push_str("\r\n");
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CacheEngine, CacheStats, ListenerBus};
    use crate::types::{Expiry, Key};
    use bytes::Bytes;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_info_sections() {
        let engine = Arc::new(CacheEngine::new(3, Arc::new(ListenerBus::default())));
        let cache = Cache::new(engine).decorate(Decorator::Stats(Arc::new(CacheStats::default())));
        cache
            .put(Key::from("k"), Bytes::from("v"), Expiry::Never)
            .await
            .unwrap();
        cache.get(&Key::from("k")).await.unwrap();

        let all = render_info(&cache, "all");
        assert!(all.contains("node_id:3\r\n"));
        assert!(all.contains("keyspace_hits:1\r\n"));
        assert!(all.contains("# Transactions\r\n"));
        assert!(all.contains("keys:1\r\n"));

        let tx = render_info(&cache, "transactions");
        assert!(tx.contains("active_transactions:0\r\n"));
        assert!(!tx.contains("# Server"));
    }

    #[tokio::test]
    async fn test_dbsize() {
        let engine = Arc::new(CacheEngine::new(1, Arc::new(ListenerBus::default())));
        let cache = Cache::new(engine);
        cache
            .put(Key::from("a"), Bytes::from("1"), Expiry::Never)
            .await
            .unwrap();
        assert_eq!(
            cmd_dbsize(ParsedCommand::new("DBSIZE", vec![]), cache).await.unwrap(),
            Frame::Integer(1)
        );
    }
}
