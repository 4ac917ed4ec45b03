//! Command executor - the main entry point for command processing.

use super::ParsedCommand;
use super::registry::{CommandRegistry, Handler};
use crate::Result;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientSession;
use std::sync::Arc;
use tracing::trace;

/// Command executor responsible for routing commands to their handlers
/// or into the session's transaction queue.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Command registry
    registry: Arc<CommandRegistry>,
}

impl CommandExecutor {
    /// Create a new command executor with all built-in commands.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(CommandRegistry::new()))
    }

    /// Create an executor over an existing registry.
    pub fn with_registry(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Get the command registry.
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Execute a command on behalf of `session`.
    ///
    /// While the session is queueing, every command other than the
    /// transaction commands is validated and queued instead of run.
    pub async fn execute(&self, cmd: ParsedCommand, session: &mut ClientSession) -> Result<Frame> {
        trace!(
            client = session.id(),
            "Executing command: {} with {} args",
            cmd.name,
            cmd.arg_count()
        );

        let command = self
            .registry
            .get(&cmd.name)
            .ok_or_else(|| CommandError::UnknownCommand(cmd.name.to_lowercase()))?;

        if session.is_queueing() && !command.flags.contains(super::CommandFlags::TRANSACTION) {
            return session.enqueue(command, cmd);
        }

        command.check_arity(&cmd)?;

        match command.handler {
            Handler::Cache(handler) => handler(cmd, session.cache().clone()).await,
            Handler::Session(handler) => handler(cmd, session).await,
        }
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Cache, CacheEngine, ListenerBus};
    use bytes::Bytes;

    fn session() -> ClientSession {
        let engine = Arc::new(CacheEngine::new(1, Arc::new(ListenerBus::default())));
        ClientSession::new(1, Cache::new(engine))
    }

    fn cmd(parts: &[&str]) -> ParsedCommand {
        ParsedCommand::new(
            parts[0],
            parts[1..]
                .iter()
                .map(|a| Bytes::copy_from_slice(a.as_bytes()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let executor = CommandExecutor::new();
        let mut session = session();
        let err = executor.execute(cmd(&["NOPE"]), &mut session).await.unwrap_err();
        assert_eq!(err.to_resp_error(), "ERR unknown command 'nope'");
    }

    #[tokio::test]
    async fn test_normal_mode_runs_directly() {
        let executor = CommandExecutor::new();
        let mut session = session();
        assert_eq!(
            executor.execute(cmd(&["SET", "k", "v"]), &mut session).await.unwrap(),
            Frame::ok()
        );
        assert_eq!(
            executor.execute(cmd(&["GET", "k"]), &mut session).await.unwrap(),
            Frame::bulk("v")
        );
    }

    #[tokio::test]
    async fn test_queueing_mode_defers_execution() {
        let executor = CommandExecutor::new();
        let mut session = session();
        executor.execute(cmd(&["MULTI"]), &mut session).await.unwrap();

        assert_eq!(
            executor.execute(cmd(&["SET", "k", "v"]), &mut session).await.unwrap(),
            Frame::queued()
        );
        assert_eq!(session.queued_len(), 1);
        assert_eq!(session.cache().size(), 0);

        let err = executor.execute(cmd(&["QUIT"]), &mut session).await.unwrap_err();
        assert_eq!(err.to_resp_error(), "ERR Command not allowed inside a transaction");
        assert!(!session.is_closing());
        assert_eq!(session.queued_len(), 1);
    }
}
