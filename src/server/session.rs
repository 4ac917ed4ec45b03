//! Per-connection state machine.
//!
//! A session is owned by exactly one connection task and is only touched
//! between commands, so it needs no locking. It starts in normal mode;
//! MULTI switches it to queueing and EXEC or DISCARD switch it back.

use super::watch::WatchRegistry;
use crate::Result;
use crate::commands::{Command, CommandEnvelope, ParsedCommand, execute_transaction};
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::storage::Cache;
use crate::types::Key;
use std::mem;
use tracing::debug;

/// Transaction mode of a session.
#[derive(Debug, Default)]
enum Mode {
    #[default]
    Normal,
    Queueing(Vec<CommandEnvelope>),
}

/// State of one client connection.
#[derive(Debug)]
pub struct ClientSession {
    id: u64,
    cache: Cache,
    mode: Mode,
    watches: WatchRegistry,
    closing: bool,
}

impl ClientSession {
    /// Create a session for connection `id` over the live cache.
    pub fn new(id: u64, cache: Cache) -> Self {
        Self {
            id,
            cache,
            mode: Mode::Normal,
            watches: WatchRegistry::default(),
            closing: false,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The live cache chain used outside of EXEC.
    #[inline]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    #[inline]
    pub fn is_queueing(&self) -> bool {
        matches!(self.mode, Mode::Queueing(_))
    }

    /// Number of queued commands, zero in normal mode.
    pub fn queued_len(&self) -> usize {
        match &self.mode {
            Mode::Queueing(queue) => queue.len(),
            Mode::Normal => 0,
        }
    }

    /// Number of active watchers.
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// MULTI. A nested call fails and keeps the current queue.
    pub fn begin_transaction(&mut self) -> Result<Frame> {
        if self.is_queueing() {
            return Err(CommandError::NestedMulti.into());
        }
        self.mode = Mode::Queueing(Vec::new());
        debug!(client = self.id, "Entered MULTI");
        Ok(Frame::ok())
    }

    /// Validate `cmd` against `command` and append it to the queue.
    ///
    /// A rejected command replies with its error and leaves the queue and
    /// the transaction as they were.
    pub fn enqueue(&mut self, command: &Command, cmd: ParsedCommand) -> Result<Frame> {
        let Mode::Queueing(queue) = &mut self.mode else {
            return Err(CommandError::ExecWithoutMulti.into());
        };
        let envelope = CommandEnvelope::new(command, cmd)?;
        queue.push(envelope);
        Ok(Frame::queued())
    }

    /// DISCARD.
    pub fn discard(&mut self) -> Result<Frame> {
        let Mode::Queueing(queue) = mem::take(&mut self.mode) else {
            return Err(CommandError::DiscardWithoutMulti.into());
        };
        debug!(client = self.id, dropped = queue.len(), "Transaction discarded");
        self.watches.clear();
        Ok(Frame::ok())
    }

    /// EXEC. The session is back in normal mode with no watchers whatever
    /// the outcome.
    pub async fn exec(&mut self) -> Result<Frame> {
        let Mode::Queueing(queue) = mem::take(&mut self.mode) else {
            return Err(CommandError::ExecWithoutMulti.into());
        };
        let watches = self.watches.take();
        execute_transaction(self.cache.clone(), self.id, queue, watches).await
    }

    /// WATCH. Not allowed while queueing.
    pub fn watch(&mut self, keys: Vec<Key>) -> Result<Frame> {
        if self.is_queueing() {
            return Err(CommandError::WatchInsideMulti.into());
        }
        self.watches.watch(&self.cache, keys)?;
        Ok(Frame::ok())
    }

    /// UNWATCH. Always succeeds.
    ///
    /// While queueing it is appended as an acknowledging no-op: the watchers
    /// must still be checked when EXEC starts.
    pub fn unwatch(&mut self, cmd: ParsedCommand) -> Frame {
        if let Mode::Queueing(queue) = &mut self.mode {
            queue.push(CommandEnvelope::unwatch(cmd));
            return Frame::queued();
        }
        self.watches.clear();
        Frame::ok()
    }

    /// Ask the connection to close once the current reply is flushed.
    pub fn request_close(&mut self) {
        self.closing = true;
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Tear down transaction state when the connection goes away.
    pub fn close(&mut self) {
        if let Mode::Queueing(queue) = mem::take(&mut self.mode) {
            debug!(client = self.id, dropped = queue.len(), "Connection closed inside MULTI");
        }
        self.watches.clear();
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}
