//! Transaction command implementations (MULTI, EXEC, DISCARD, WATCH, UNWATCH).
//!
//! These commands drive the connection state machine held by
//! [`ClientSession`]. The executor runs them immediately even while the
//! session is queueing; UNWATCH then queues itself.

use super::ParsedCommand;
use crate::protocol::Frame;
use crate::server::ClientSession;
use crate::storage::Cache;
use crate::types::Key;
use crate::Result;
use std::future::Future;
use std::pin::Pin;

/// MULTI - Start a transaction block.
///
/// A nested MULTI is an error and leaves the current queue intact.
pub fn cmd_multi(
    _cmd: ParsedCommand,
    session: &mut ClientSession,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send + '_>> {
    Box::pin(async move { session.begin_transaction() })
}

/// EXEC - Execute all commands issued after MULTI.
///
/// Replies with one entry per queued command, or a null array when a
/// watched key changed since WATCH.
pub fn cmd_exec(
    _cmd: ParsedCommand,
    session: &mut ClientSession,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send + '_>> {
    Box::pin(async move { session.exec().await })
}

/// DISCARD - Discard all commands issued after MULTI.
pub fn cmd_discard(
    _cmd: ParsedCommand,
    session: &mut ClientSession,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send + '_>> {
    Box::pin(async move { session.discard() })
}

/// WATCH key [key ...] - Watch the given keys for conditional execution.
pub fn cmd_watch(
    cmd: ParsedCommand,
    session: &mut ClientSession,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send + '_>> {
    Box::pin(async move {
        let keys: Vec<Key> = cmd.args.into_iter().map(Key::from).collect();
        session.watch(keys)
    })
}

/// UNWATCH - Forget about all watched keys.
///
/// Always succeeds, whether or not anything was watched. Inside MULTI it is
/// queued like any other command and the watchers stay armed until EXEC.
pub fn cmd_unwatch(
    cmd: ParsedCommand,
    session: &mut ClientSession,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send + '_>> {
    Box::pin(async move { Ok(session.unwatch(cmd)) })
}

/// Queued UNWATCH, run by EXEC.
pub(super) fn cmd_unwatch_queued(
    _cmd: ParsedCommand,
    _cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async { Ok(Frame::ok()) })
}
