//! Key command implementations.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::storage::Cache;
use crate::types::{current_timestamp_ms, Expiry, Key};
use crate::Result;
use std::future::Future;
use std::pin::Pin;

/// DEL key [key ...]
pub fn cmd_del(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let mut count = 0;
        for arg in &cmd.args {
            if cache.remove(Key::from(arg)).await?.is_some() {
                count += 1;
            }
        }
        Ok(Frame::Integer(count))
    })
}

/// EXISTS key [key ...]
pub fn cmd_exists(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let mut count = 0;
        for arg in &cmd.args {
            if cache.get_entry(&Key::from(arg)).await?.is_some() {
                count += 1;
            }
        }
        Ok(Frame::Integer(count))
    })
}

/// EXPIRE key seconds
pub fn cmd_expire(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let millis = cmd
            .get_i64(1)?
            .checked_mul(1000)
            .ok_or_else(|| CommandError::InvalidExpireTime("expire".to_string()))?;
        expire_in(&cache, Key::from(&cmd.args[0]), millis).await
    })
}

/// PEXPIRE key milliseconds
pub fn cmd_pexpire(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let millis = cmd.get_i64(1)?;
        expire_in(&cache, Key::from(&cmd.args[0]), millis).await
    })
}

/// A non-positive timeout deletes the key.
async fn expire_in(cache: &Cache, key: Key, millis: i64) -> Result<Frame> {
    if millis <= 0 {
        let removed = cache.remove(key).await?;
        return Ok(Frame::Integer(i64::from(removed.is_some())));
    }
    let deadline = current_timestamp_ms().saturating_add(millis);
    let applied = cache.set_expiry(key, Expiry::At(deadline)).await?;
    Ok(Frame::Integer(i64::from(applied)))
}

/// PERSIST key
pub fn cmd_persist(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(&cmd.args[0]);
        match cache.get_entry(&key).await? {
            Some(entry) if entry.expiry != Expiry::Never => {
                let applied = cache.set_expiry(key, Expiry::Never).await?;
                Ok(Frame::Integer(i64::from(applied)))
            }
            _ => Ok(Frame::Integer(0)),
        }
    })
}

/// TTL key
pub fn cmd_ttl(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let ttl = remaining_ms(&cache, &Key::from(&cmd.args[0])).await?;
        Ok(Frame::Integer(if ttl < 0 { ttl } else { (ttl + 500) / 1000 }))
    })
}

/// PTTL key
pub fn cmd_pttl(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let ttl = remaining_ms(&cache, &Key::from(&cmd.args[0])).await?;
        Ok(Frame::Integer(ttl))
    })
}

/// Remaining time to live, -2 if the key is missing and -1 if it never expires.
async fn remaining_ms(cache: &Cache, key: &Key) -> Result<i64> {
    let Some(entry) = cache.get_entry(key).await? else {
        return Ok(-2);
    };
    Ok(entry
        .expiry
        .remaining_ms(current_timestamp_ms())
        .unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CacheEngine, ListenerBus};
    use bytes::Bytes;
    use std::sync::Arc;

    fn cache() -> Cache {
        Cache::new(Arc::new(CacheEngine::new(1, Arc::new(ListenerBus::default()))))
    }

    fn cmd(name: &str, args: &[&str]) -> ParsedCommand {
        ParsedCommand::new(
            name,
            args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
        )
    }

    async fn seed(cache: &Cache, key: &str) {
        cache
            .put(Key::from(key), Bytes::from("v"), Expiry::Never)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_del_and_exists() {
        let cache = cache();
        seed(&cache, "a").await;
        seed(&cache, "b").await;

        assert_eq!(
            cmd_exists(cmd("EXISTS", &["a", "b", "c", "a"]), cache.clone()).await.unwrap(),
            Frame::Integer(3)
        );
        assert_eq!(
            cmd_del(cmd("DEL", &["a", "c"]), cache.clone()).await.unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            cmd_exists(cmd("EXISTS", &["a"]), cache).await.unwrap(),
            Frame::Integer(0)
        );
    }

    #[tokio::test]
    async fn test_ttl_lifecycle() {
        let cache = cache();
        assert_eq!(
            cmd_ttl(cmd("TTL", &["k"]), cache.clone()).await.unwrap(),
            Frame::Integer(-2)
        );

        seed(&cache, "k").await;
        assert_eq!(
            cmd_ttl(cmd("TTL", &["k"]), cache.clone()).await.unwrap(),
            Frame::Integer(-1)
        );

        assert_eq!(
            cmd_expire(cmd("EXPIRE", &["k", "100"]), cache.clone()).await.unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            cmd_ttl(cmd("TTL", &["k"]), cache.clone()).await.unwrap(),
            Frame::Integer(100)
        );
        let pttl = cmd_pttl(cmd("PTTL", &["k"]), cache.clone())
            .await
            .unwrap()
            .as_integer()
            .unwrap();
        assert!(pttl > 99_000 && pttl <= 100_000);

        assert_eq!(
            cmd_persist(cmd("PERSIST", &["k"]), cache.clone()).await.unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            cmd_persist(cmd("PERSIST", &["k"]), cache.clone()).await.unwrap(),
            Frame::Integer(0)
        );
        assert_eq!(
            cmd_ttl(cmd("TTL", &["k"]), cache).await.unwrap(),
            Frame::Integer(-1)
        );
    }

    #[tokio::test]
    async fn test_expire_missing_and_negative() {
        let cache = cache();
        assert_eq!(
            cmd_pexpire(cmd("PEXPIRE", &["k", "500"]), cache.clone()).await.unwrap(),
            Frame::Integer(0)
        );

        seed(&cache, "k").await;
        assert_eq!(
            cmd_expire(cmd("EXPIRE", &["k", "-1"]), cache.clone()).await.unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(cache.get(&Key::from("k")).await.unwrap(), None);

        assert!(cmd_expire(cmd("EXPIRE", &["k", "abc"]), cache).await.is_err());
    }
}
