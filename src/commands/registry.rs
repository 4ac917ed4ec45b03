//! Command registry for looking up commands and their metadata.

use super::{CommandFlags, ParsedCommand};
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientSession;
use crate::storage::Cache;
use crate::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Async handler for commands that only need a cache.
///
/// The same handler runs against the live chain in normal mode and against
/// the transaction-bound chain during EXEC.
pub type CommandHandler =
    fn(ParsedCommand, Cache) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>>;

/// Async handler for commands that act on the connection's session.
pub type SessionHandler = for<'a> fn(
    ParsedCommand,
    &'a mut ClientSession,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send + 'a>>;

/// How a command is run.
#[derive(Clone, Copy)]
pub enum Handler {
    Cache(CommandHandler),
    Session(SessionHandler),
}

/// Command definition.
#[derive(Clone)]
pub struct Command {
    /// Command name
    pub name: &'static str,
    /// Minimum argument count
    pub min_args: i32,
    /// Maximum argument count (-1 for unlimited)
    pub max_args: i32,
    /// Command flags
    pub flags: CommandFlags,
    /// Handler function
    pub handler: Handler,
    /// Help text
    pub summary: &'static str,
}

impl Command {
    /// Create a new cache command definition.
    pub const fn new(
        name: &'static str,
        min_args: i32,
        max_args: i32,
        flags: CommandFlags,
        handler: CommandHandler,
        summary: &'static str,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            flags,
            handler: Handler::Cache(handler),
            summary,
        }
    }

    /// Create a new session command definition.
    pub const fn session(
        name: &'static str,
        min_args: i32,
        max_args: i32,
        flags: CommandFlags,
        handler: SessionHandler,
        summary: &'static str,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            flags,
            handler: Handler::Session(handler),
            summary,
        }
    }

    /// Check the argument count of `cmd`.
    pub fn check_arity(&self, cmd: &ParsedCommand) -> Result<()> {
        let argc = cmd.arg_count() as i64;
        let too_few = argc < i64::from(self.min_args);
        let too_many = self.max_args >= 0 && argc > i64::from(self.max_args);
        if too_few || too_many {
            return Err(CommandError::WrongArity {
                command: self.name.to_lowercase(),
            }
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("flags", &self.flags)
            .field("summary", &self.summary)
            .finish()
    }
}

/// Registry of all available commands.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    /// Create a new command registry with all built-in commands.
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        registry.register_all();
        registry
    }

    /// Register a command.
    pub fn register(&mut self, cmd: Command) {
        self.commands.insert(cmd.name.to_uppercase(), cmd);
    }

    /// Look up a command by name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        match self.commands.get(name) {
            Some(cmd) => Some(cmd),
            None => self.commands.get(&name.to_uppercase()),
        }
    }

    /// Get all registered commands.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    /// Get command count.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn register_all(&mut self) {
        self.register_string_commands();
        self.register_key_commands();
        self.register_server_commands();
        self.register_connection_commands();
        self.register_transaction_commands();
    }

    fn register_string_commands(&mut self) {
        use super::strings::*;

        self.register(Command::new(
            "GET",
            1,
            1,
            CommandFlags::readonly(),
            cmd_get,
            "Get the value of a key",
        ));
        self.register(Command::new(
            "SET",
            2,
            -1,
            CommandFlags::write(),
            cmd_set,
            "Set the string value of a key",
        ));
        self.register(Command::new(
            "SETNX",
            2,
            2,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_setnx,
            "Set the value of a key, only if the key does not exist",
        ));
        self.register(Command::new(
            "GETSET",
            2,
            2,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_getset,
            "Set the string value of a key and return its old value",
        ));
        self.register(Command::new(
            "MGET",
            1,
            -1,
            CommandFlags::READONLY,
            cmd_mget,
            "Get the values of all the given keys",
        ));
        self.register(Command::new(
            "MSET",
            2,
            -1,
            CommandFlags::write(),
            cmd_mset,
            "Set multiple keys to multiple values",
        ));
        self.register(Command::new(
            "INCR",
            1,
            1,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_incr,
            "Increment the integer value of a key by one",
        ));
        self.register(Command::new(
            "DECR",
            1,
            1,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_decr,
            "Decrement the integer value of a key by one",
        ));
        self.register(Command::new(
            "INCRBY",
            2,
            2,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_incrby,
            "Increment the integer value of a key by the given amount",
        ));
        self.register(Command::new(
            "DECRBY",
            2,
            2,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_decrby,
            "Decrement the integer value of a key by the given number",
        ));
        self.register(Command::new(
            "APPEND",
            2,
            2,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_append,
            "Append a value to a key",
        ));
        self.register(Command::new(
            "STRLEN",
            1,
            1,
            CommandFlags::readonly(),
            cmd_strlen,
            "Get the length of the value stored in a key",
        ));
    }

    fn register_key_commands(&mut self) {
        use super::keys::*;

        self.register(Command::new(
            "DEL",
            1,
            -1,
            CommandFlags::write(),
            cmd_del,
            "Delete a key",
        ));
        self.register(Command::new(
            "EXISTS",
            1,
            -1,
            CommandFlags::readonly(),
            cmd_exists,
            "Determine if a key exists",
        ));
        self.register(Command::new(
            "EXPIRE",
            2,
            2,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_expire,
            "Set a key's time to live in seconds",
        ));
        self.register(Command::new(
            "PEXPIRE",
            2,
            2,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_pexpire,
            "Set a key's time to live in milliseconds",
        ));
        self.register(Command::new(
            "PERSIST",
            1,
            1,
            CommandFlags::write().union(CommandFlags::FAST),
            cmd_persist,
            "Remove the expiration from a key",
        ));
        self.register(Command::new(
            "TTL",
            1,
            1,
            CommandFlags::readonly(),
            cmd_ttl,
            "Get the time to live for a key in seconds",
        ));
        self.register(Command::new(
            "PTTL",
            1,
            1,
            CommandFlags::readonly(),
            cmd_pttl,
            "Get the time to live for a key in milliseconds",
        ));
    }

    fn register_server_commands(&mut self) {
        use super::server_cmds::*;

        self.register(Command::new(
            "DBSIZE",
            0,
            0,
            CommandFlags::readonly().union(CommandFlags::NO_KEYS),
            cmd_dbsize,
            "Return the number of keys in the cache",
        ));
        self.register(Command::new(
            "INFO",
            0,
            1,
            CommandFlags::READONLY.union(CommandFlags::NO_KEYS),
            cmd_info,
            "Get information and statistics about the server",
        ));
    }

    fn register_connection_commands(&mut self) {
        use super::connection::*;

        self.register(Command::new(
            "PING",
            0,
            1,
            CommandFlags::FAST.union(CommandFlags::NO_KEYS),
            cmd_ping,
            "Ping the server",
        ));
        self.register(Command::new(
            "ECHO",
            1,
            1,
            CommandFlags::FAST.union(CommandFlags::NO_KEYS),
            cmd_echo,
            "Echo the given string",
        ));
        self.register(Command::session(
            "QUIT",
            0,
            0,
            CommandFlags::FAST
                .union(CommandFlags::NO_KEYS)
                .union(CommandFlags::NO_MULTI),
            cmd_quit,
            "Close the connection",
        ));
    }

    fn register_transaction_commands(&mut self) {
        use super::transactions::*;

        self.register(Command::session(
            "MULTI",
            0,
            0,
            CommandFlags::transaction(),
            cmd_multi,
            "Mark the start of a transaction block",
        ));
        self.register(Command::session(
            "EXEC",
            0,
            0,
            CommandFlags::transaction(),
            cmd_exec,
            "Execute all commands issued after MULTI",
        ));
        self.register(Command::session(
            "DISCARD",
            0,
            0,
            CommandFlags::transaction(),
            cmd_discard,
            "Discard all commands issued after MULTI",
        ));
        self.register(Command::session(
            "WATCH",
            1,
            -1,
            CommandFlags::TRANSACTION.union(CommandFlags::FAST),
            cmd_watch,
            "Watch the given keys to determine execution of the MULTI/EXEC block",
        ));
        self.register(Command::session(
            "UNWATCH",
            0,
            0,
            CommandFlags::transaction(),
            cmd_unwatch,
            "Forget about all watched keys",
        ));
    }
}
