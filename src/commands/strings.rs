//! String command implementations.

use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::storage::{Cache, CacheFlags};
use crate::types::{Expiry, Key};
use crate::Result;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::pin::Pin;

/// Write condition of a SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetCondition {
    Always,
    /// NX
    IfAbsent,
    /// XX
    IfPresent,
}

#[derive(Debug)]
struct SetOptions {
    condition: SetCondition,
    expiry: Expiry,
    get: bool,
}

impl SetOptions {
    fn parse(cmd: &ParsedCommand) -> Result<Self> {
        let mut opts = Self {
            condition: SetCondition::Always,
            expiry: Expiry::Never,
            get: false,
        };
        let mut has_expiry = false;

        let mut i = 2;
        while i < cmd.args.len() {
            let opt = cmd.get_str(i)?.to_uppercase();
            match opt.as_str() {
                "NX" if opts.condition == SetCondition::Always => {
                    opts.condition = SetCondition::IfAbsent;
                }
                "XX" if opts.condition == SetCondition::Always => {
                    opts.condition = SetCondition::IfPresent;
                }
                "GET" => opts.get = true,
                "EX" | "PX" if !has_expiry => {
                    i += 1;
                    if i >= cmd.args.len() {
                        return Err(CommandError::SyntaxError.into());
                    }
                    let amount = cmd.get_i64(i)?;
                    if amount <= 0 {
                        return Err(CommandError::InvalidExpireTime("set".to_string()).into());
                    }
                    opts.expiry = if opt == "EX" {
                        Expiry::from_seconds(amount)
                    } else {
                        Expiry::from_millis(amount)
                    };
                    has_expiry = true;
                }
                _ => return Err(CommandError::SyntaxError.into()),
            }
            i += 1;
        }

        Ok(opts)
    }
}

/// GET key
pub fn cmd_get(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(&cmd.args[0]);
        Ok(Frame::bulk_or_null(cache.get(&key).await?))
    })
}

/// SET key value [NX | XX] [GET] [EX seconds | PX milliseconds]
pub fn cmd_set(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let opts = SetOptions::parse(&cmd)?;
        let key = Key::from(&cmd.args[0]);
        let value = cmd.args[1].clone();

        let (previous, applied) = match opts.condition {
            SetCondition::Always if !opts.get => {
                cache
                    .with_flags(CacheFlags::IGNORE_RETURN_VALUES)
                    .put(key, value, opts.expiry)
                    .await?;
                return Ok(Frame::ok());
            }
            SetCondition::Always => (cache.put(key, value, opts.expiry).await?, true),
            SetCondition::IfAbsent => {
                let existing = cache.put_if_absent(key, value, opts.expiry).await?;
                let applied = existing.is_none();
                (existing, applied)
            }
            SetCondition::IfPresent => {
                let replaced = cache.replace(key, value, opts.expiry).await?;
                let applied = replaced.is_some();
                (replaced, applied)
            }
        };

        if opts.get {
            Ok(Frame::bulk_or_null(previous))
        } else if applied {
            Ok(Frame::ok())
        } else {
            Ok(Frame::Null)
        }
    })
}

/// SETNX key value
pub fn cmd_setnx(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(&cmd.args[0]);
        let existing = cache
            .put_if_absent(key, cmd.args[1].clone(), Expiry::Never)
            .await?;
        Ok(Frame::Integer(i64::from(existing.is_none())))
    })
}

/// GETSET key value
pub fn cmd_getset(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let key = Key::from(&cmd.args[0]);
        let previous = cache.put(key, cmd.args[1].clone(), Expiry::Never).await?;
        Ok(Frame::bulk_or_null(previous))
    })
}

/// MGET key [key ...]
pub fn cmd_mget(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let mut values = Vec::with_capacity(cmd.args.len());
        for arg in &cmd.args {
            values.push(Frame::bulk_or_null(cache.get(&Key::from(arg)).await?));
        }
        Ok(Frame::Array(values))
    })
}

/// MSET key value [key value ...]
pub fn cmd_mset(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        if cmd.args.len() % 2 != 0 {
            return Err(CommandError::WrongArity {
                command: "mset".to_string(),
            }
            .into());
        }

        let quiet = cache.with_flags(CacheFlags::IGNORE_RETURN_VALUES);
        for pair in cmd.args.chunks_exact(2) {
            quiet
                .put(Key::from(&pair[0]), pair[1].clone(), Expiry::Never)
                .await?;
        }
        Ok(Frame::ok())
    })
}

/// INCR key
pub fn cmd_incr(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { incr_by(&cache, Key::from(&cmd.args[0]), 1).await })
}

/// DECR key
pub fn cmd_decr(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { incr_by(&cache, Key::from(&cmd.args[0]), -1).await })
}

/// INCRBY key increment
pub fn cmd_incrby(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let increment = cmd.get_i64(1)?;
        incr_by(&cache, Key::from(&cmd.args[0]), increment).await
    })
}

/// DECRBY key decrement
pub fn cmd_decrby(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let decrement = cmd.get_i64(1)?;
        let delta = decrement.checked_neg().ok_or(CommandError::Overflow)?;
        incr_by(&cache, Key::from(&cmd.args[0]), delta).await
    })
}

async fn incr_by(cache: &Cache, key: Key, delta: i64) -> Result<Frame> {
    let mut result = 0;
    cache
        .compute(key, |current| {
            let n = match current {
                Some(v) => parse_integer(v)?,
                None => 0,
            };
            result = n.checked_add(delta).ok_or(CommandError::Overflow)?;
            Ok(Bytes::from(result.to_string()))
        })
        .await?;
    Ok(Frame::Integer(result))
}

fn parse_integer(value: &[u8]) -> Result<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CommandError::NotInteger.into())
}

/// APPEND key value
pub fn cmd_append(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let suffix = cmd.args[1].clone();
        let value = cache
            .compute(Key::from(&cmd.args[0]), |current| {
                let current: &[u8] = current.map_or(&[], |v| &v[..]);
                let mut buf = BytesMut::with_capacity(current.len() + suffix.len());
                buf.extend_from_slice(current);
                buf.extend_from_slice(&suffix);
                Ok(buf.freeze())
            })
            .await?;
        Ok(Frame::Integer(value.len() as i64))
    })
}

/// STRLEN key
pub fn cmd_strlen(
    cmd: ParsedCommand,
    cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        let len = cache
            .get(&Key::from(&cmd.args[0]))
            .await?
            .map_or(0, |v| v.len());
        Ok(Frame::Integer(len as i64))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CacheEngine, ListenerBus};
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

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = cache();
        assert_eq!(cmd_set(cmd("SET", &["k", "v"]), cache.clone()).await.unwrap(), Frame::ok());
        assert_eq!(
            cmd_get(cmd("GET", &["k"]), cache.clone()).await.unwrap(),
            Frame::bulk("v")
        );
        assert_eq!(cmd_get(cmd("GET", &["nope"]), cache).await.unwrap(), Frame::Null);
    }

    #[tokio::test]
    async fn test_set_conditions() {
        let cache = cache();
        assert_eq!(
            cmd_set(cmd("SET", &["k", "v", "XX"]), cache.clone()).await.unwrap(),
            Frame::Null
        );
        assert_eq!(
            cmd_set(cmd("SET", &["k", "v", "NX"]), cache.clone()).await.unwrap(),
            Frame::ok()
        );
        assert_eq!(
            cmd_set(cmd("SET", &["k", "w", "NX"]), cache.clone()).await.unwrap(),
            Frame::Null
        );
        assert_eq!(
            cmd_set(cmd("SET", &["k", "w", "XX", "GET"]), cache).await.unwrap(),
            Frame::bulk("v")
        );
    }

    #[tokio::test]
    async fn test_set_option_errors() {
        let cache = cache();
        let err = cmd_set(cmd("SET", &["k", "v", "NX", "XX"]), cache.clone())
            .await
            .unwrap_err();
        assert_eq!(err.to_resp_error(), "ERR syntax error");

        let err = cmd_set(cmd("SET", &["k", "v", "EX", "0"]), cache.clone())
            .await
            .unwrap_err();
        assert_eq!(err.to_resp_error(), "ERR invalid expire time in 'set' command");

        let err = cmd_set(cmd("SET", &["k", "v", "PX"]), cache).await.unwrap_err();
        assert_eq!(err.to_resp_error(), "ERR syntax error");
    }

    #[tokio::test]
    async fn test_incr_family() {
        let cache = cache();
        assert_eq!(cmd_incr(cmd("INCR", &["n"]), cache.clone()).await.unwrap(), Frame::Integer(1));
        assert_eq!(
            cmd_incrby(cmd("INCRBY", &["n", "10"]), cache.clone()).await.unwrap(),
            Frame::Integer(11)
        );
        assert_eq!(
            cmd_decrby(cmd("DECRBY", &["n", "20"]), cache.clone()).await.unwrap(),
            Frame::Integer(-9)
        );
        assert_eq!(cmd_decr(cmd("DECR", &["n"]), cache.clone()).await.unwrap(), Frame::Integer(-10));

        cmd_set(cmd("SET", &["s", "abc"]), cache.clone()).await.unwrap();
        let err = cmd_incr(cmd("INCR", &["s"]), cache.clone()).await.unwrap_err();
        assert_eq!(err.to_resp_error(), "ERR value is not an integer or out of range");

        let max = i64::MAX.to_string();
        cmd_set(cmd("SET", &["max", max.as_str()]), cache.clone())
            .await
            .unwrap();
        let err = cmd_incr(cmd("INCR", &["max"]), cache).await.unwrap_err();
        assert_eq!(err.to_resp_error(), "ERR increment or decrement would overflow");
    }

    #[tokio::test]
    async fn test_append_and_strlen() {
        let cache = cache();
        assert_eq!(
            cmd_append(cmd("APPEND", &["k", "Hello"]), cache.clone()).await.unwrap(),
            Frame::Integer(5)
        );
        assert_eq!(
            cmd_append(cmd("APPEND", &["k", " World"]), cache.clone()).await.unwrap(),
            Frame::Integer(11)
        );
        assert_eq!(
            cmd_strlen(cmd("STRLEN", &["k"]), cache).await.unwrap(),
            Frame::Integer(11)
        );
    }

    #[tokio::test]
    async fn test_mset_mget() {
        let cache = cache();
        assert_eq!(
            cmd_mset(cmd("MSET", &["a", "1", "b", "2"]), cache.clone()).await.unwrap(),
            Frame::ok()
        );
        assert_eq!(
            cmd_mget(cmd("MGET", &["a", "x", "b"]), cache.clone()).await.unwrap(),
            Frame::Array(vec![Frame::bulk("1"), Frame::Null, Frame::bulk("2")])
        );
        assert!(cmd_mset(cmd("MSET", &["a", "1", "b"]), cache).await.is_err());
    }

    #[tokio::test]
    async fn test_setnx_getset() {
        let cache = cache();
        assert_eq!(
            cmd_setnx(cmd("SETNX", &["k", "1"]), cache.clone()).await.unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            cmd_setnx(cmd("SETNX", &["k", "2"]), cache.clone()).await.unwrap(),
            Frame::Integer(0)
        );
        assert_eq!(
            cmd_getset(cmd("GETSET", &["k", "3"]), cache).await.unwrap(),
            Frame::bulk("1")
        );
    }
}
