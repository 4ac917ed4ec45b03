//! Command implementation.
//!
//! This module provides the command parsing, routing, queueing and
//! execution layer, including the MULTI/EXEC transaction engine.

mod connection;
mod exec;
mod executor;
mod keys;
mod registry;
mod server_cmds;
mod strings;
mod transactions;

pub use exec::execute_transaction;
pub use executor::CommandExecutor;
pub use registry::{Command, CommandHandler, CommandRegistry, Handler, SessionHandler};

use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::storage::Cache;
use bytes::Bytes;
use std::fmt;

/// Parsed command with name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Command name (uppercase)
    pub name: String,
    /// Command arguments
    pub args: Vec<Bytes>,
}

impl ParsedCommand {
    /// Build a command from its name and arguments.
    pub fn new(name: &str, args: Vec<Bytes>) -> Self {
        Self {
            name: name.to_uppercase(),
            args,
        }
    }

    /// Parse a command from a RESP frame.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let frames = match frame {
            Frame::Array(arr) if !arr.is_empty() => arr,
            _ => return Err(CommandError::SyntaxError.into()),
        };

        let mut iter = frames.into_iter();

        // First element is the command name
        let name_frame = iter.next().ok_or(CommandError::SyntaxError)?;
        let name_bytes = name_frame.to_bytes().ok_or(CommandError::SyntaxError)?;
        let name = std::str::from_utf8(&name_bytes)
            .map_err(|_| CommandError::SyntaxError)?
            .to_uppercase();

        let args: Vec<Bytes> = iter.map(|f| f.to_bytes().unwrap_or_default()).collect();

        Ok(Self { name, args })
    }

    /// Get the number of arguments (excluding command name).
    #[inline]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Get an argument as a string.
    pub fn get_str(&self, index: usize) -> Result<&str> {
        let bytes = self.args.get(index).ok_or_else(|| CommandError::WrongArity {
            command: self.name.to_lowercase(),
        })?;
        std::str::from_utf8(bytes).map_err(|_| CommandError::SyntaxError.into())
    }

    /// Get an argument as an i64.
    pub fn get_i64(&self, index: usize) -> Result<i64> {
        let s = self.get_str(index)?;
        s.parse().map_err(|_| CommandError::NotInteger.into())
    }
}

bitflags::bitflags! {
    /// Command flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u8 {
        /// Command is read-only
        const READONLY    = 1 << 0;
        /// Command modifies data
        const WRITE       = 1 << 1;
        /// Command is fast (O(1))
        const FAST        = 1 << 2;
        /// Command uses no keys
        const NO_KEYS     = 1 << 3;
        /// Transaction control, run by the session and never queued
        const TRANSACTION = 1 << 4;
        /// Refused while a transaction is being queued
        const NO_MULTI    = 1 << 5;
    }
}

impl CommandFlags {
    /// Flags for read-only commands (readonly + fast).
    #[inline]
    pub const fn readonly() -> Self {
        Self::READONLY.union(Self::FAST)
    }

    /// Flags for write commands.
    #[inline]
    pub const fn write() -> Self {
        Self::WRITE
    }

    /// Flags for transaction control commands.
    #[inline]
    pub const fn transaction() -> Self {
        Self::TRANSACTION.union(Self::NO_KEYS).union(Self::FAST)
    }

    /// Check if the command may sit in a transaction queue.
    #[inline]
    pub const fn queueable(self) -> bool {
        !self.intersects(Self::TRANSACTION.union(Self::NO_MULTI))
    }
}

/// A validated command waiting in a transaction queue.
///
/// Envelopes are immutable once built; EXEC consumes them in order.
#[derive(Clone)]
pub struct CommandEnvelope {
    name: &'static str,
    flags: CommandFlags,
    handler: CommandHandler,
    cmd: ParsedCommand,
}

impl CommandEnvelope {
    /// Validate `cmd` against `command` and wrap it for queueing.
    pub fn new(command: &Command, cmd: ParsedCommand) -> Result<Self> {
        if !command.flags.queueable() {
            return Err(CommandError::NotAllowedInMulti.into());
        }
        command.check_arity(&cmd)?;

        let Handler::Cache(handler) = command.handler else {
            return Err(CommandError::NotAllowedInMulti.into());
        };

        Ok(Self {
            name: command.name,
            flags: command.flags,
            handler,
            cmd,
        })
    }

    /// UNWATCH issued while queueing. EXEC drops every watcher after its
    /// guard check, so inside the transaction it only acknowledges.
    pub(crate) fn unwatch(cmd: ParsedCommand) -> Self {
        Self {
            name: "UNWATCH",
            flags: CommandFlags::transaction(),
            handler: transactions::cmd_unwatch_queued,
            cmd,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn args(&self) -> &[Bytes] {
        &self.cmd.args
    }

    #[inline]
    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    /// Run the command against `cache`, which is the bound chain during EXEC.
    pub async fn execute(self, cache: Cache) -> Result<Frame> {
        (self.handler)(self.cmd, cache).await
    }
}

impl fmt::Debug for CommandEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEnvelope")
            .field("name", &self.name)
            .field("args", &self.cmd.args.len())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame_uppercases_name() {
        let frame = Frame::Array(vec![Frame::bulk("set"), Frame::bulk("k"), Frame::bulk("v")]);
        let cmd = ParsedCommand::from_frame(frame).unwrap();
        assert_eq!(cmd.name, "SET");
        assert_eq!(cmd.arg_count(), 2);
    }

    #[test]
    fn test_from_frame_rejects_non_array() {
        assert!(ParsedCommand::from_frame(Frame::simple("GET")).is_err());
        assert!(ParsedCommand::from_frame(Frame::Array(vec![])).is_err());
    }

    #[test]
    fn test_queueable_flags() {
        assert!(CommandFlags::readonly().queueable());
        assert!(CommandFlags::write().queueable());
        assert!(!CommandFlags::transaction().queueable());
        assert!(!(CommandFlags::FAST | CommandFlags::NO_MULTI).queueable());
    }

    #[test]
    fn test_envelope_validates_arity() {
        let registry = CommandRegistry::new();
        let get = registry.get("GET").unwrap();

        let err = CommandEnvelope::new(get, ParsedCommand::new("get", vec![])).unwrap_err();
        assert_eq!(
            err.to_resp_error(),
            "ERR wrong number of arguments for 'get' command"
        );

        let envelope =
            CommandEnvelope::new(get, ParsedCommand::new("get", vec![Bytes::from("k")])).unwrap();
        assert_eq!(envelope.name(), "GET");
        assert_eq!(envelope.args().len(), 1);
    }

    #[test]
    fn test_envelope_rejects_session_commands() {
        let registry = CommandRegistry::new();
        for name in ["MULTI", "EXEC", "WATCH", "QUIT"] {
            let command = registry.get(name).unwrap();
            let err = CommandEnvelope::new(command, ParsedCommand::new(name, vec![Bytes::from("k")]))
                .unwrap_err();
            assert_eq!(err.to_resp_error(), "ERR Command not allowed inside a transaction");
        }
    }
}
