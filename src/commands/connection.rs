//! Connection command implementations.

use super::ParsedCommand;
use crate::protocol::Frame;
use crate::server::ClientSession;
use crate::storage::Cache;
use crate::Result;
use std::future::Future;
use std::pin::Pin;

/// PING [message]
pub fn cmd_ping(
    cmd: ParsedCommand,
    _cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move {
        match cmd.args.into_iter().next() {
            Some(message) => Ok(Frame::Bulk(message)),
            None => Ok(Frame::pong()),
        }
    })
}

/// ECHO message
pub fn cmd_echo(
    cmd: ParsedCommand,
    _cache: Cache,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>> {
    Box::pin(async move { Ok(Frame::Bulk(cmd.args[0].clone())) })
}

/// QUIT
///
/// The reply is flushed before the connection closes.
pub fn cmd_quit(
    _cmd: ParsedCommand,
    session: &mut ClientSession,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send + '_>> {
    Box::pin(async move {
        session.request_close();
        Ok(Frame::ok())
    })
}
