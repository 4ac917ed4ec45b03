//! Connection handling for individual clients.

use super::ClientSession;
use crate::commands::{CommandExecutor, ParsedCommand};
use crate::protocol::{Frame, RespParser};
use crate::storage::Cache;
use crate::Result;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Buffer size for reading from socket.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Maximum number of responses to batch before flushing.
const WRITE_BATCH_SIZE: usize = 64;

/// Maximum bytes to buffer before forcing a flush.
const WRITE_BUFFER_HIGH_WATER: usize = 64 * 1024;

/// A connection to a single client.
pub struct Connection {
    /// TCP stream
    stream: BufWriter<TcpStream>,
    /// Peer address
    peer_addr: SocketAddr,
    /// RESP parser
    parser: RespParser,
    /// Transaction and watch state of this client
    session: ClientSession,
    /// Command executor
    executor: Arc<CommandExecutor>,
    /// Write buffer
    write_buffer: BytesMut,
    /// Number of pending writes (for batching)
    pending_writes: usize,
}

impl Connection {
    /// Create a new connection.
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        id: u64,
        executor: Arc<CommandExecutor>,
        cache: Cache,
    ) -> Self {
        debug!("New connection from {} (id={})", peer_addr, id);

        Self {
            stream: BufWriter::new(stream),
            peer_addr,
            parser: RespParser::new(),
            session: ClientSession::new(id, cache),
            executor,
            write_buffer: BytesMut::with_capacity(4096),
            pending_writes: 0,
        }
    }

    /// Run the connection handler until the peer disconnects or sends QUIT.
    ///
    /// Watchers and any queued transaction are released on every exit path.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve().await;
        self.session.close();
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = self.stream.get_mut().read(&mut read_buf).await?;
            if n == 0 {
                debug!("Connection closed by peer: {}", self.peer_addr);
                return Ok(());
            }

            trace!("Read {} bytes from {}", n, self.peer_addr);
            self.parser.extend(&read_buf[..n]);

            // Process all complete frames with write batching
            loop {
                match self.parser.parse() {
                    Ok(Some(frame)) => {
                        self.handle_frame(frame).await;

                        if self.session.is_closing() {
                            self.flush_writes().await?;
                            debug!("Client {} quit", self.session.id());
                            return Ok(());
                        }

                        if self.pending_writes >= WRITE_BATCH_SIZE
                            || self.write_buffer.len() >= WRITE_BUFFER_HIGH_WATER
                        {
                            self.flush_writes().await?;
                        }
                    }
                    Ok(None) => {
                        if self.pending_writes > 0 {
                            self.flush_writes().await?;
                        }
                        break;
                    }
                    Err(e) => {
                        // Protocol error - send error response and drop the buffered input
                        debug!("Protocol error from {}: {}", self.peer_addr, e);
                        self.queue_frame(&Frame::error(format!("ERR Protocol error: {e}")));
                        self.flush_writes().await?;
                        self.parser.clear();
                        break;
                    }
                }
            }
        }
    }

    /// Handle a complete frame (command).
    async fn handle_frame(&mut self, frame: Frame) {
        let cmd = match ParsedCommand::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.queue_frame(&Frame::error(e.to_resp_error()));
                return;
            }
        };

        let response = match self.executor.execute(cmd, &mut self.session).await {
            Ok(frame) => frame,
            Err(e) => Frame::error(e.to_resp_error()),
        };

        self.queue_frame(&response);
    }

    /// Queue a frame for writing (batched).
    fn queue_frame(&mut self, frame: &Frame) {
        frame.serialize(&mut self.write_buffer);
        self.pending_writes += 1;
    }

    /// Flush all pending writes to the socket.
    async fn flush_writes(&mut self) -> Result<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        self.write_buffer.clear();
        self.pending_writes = 0;

        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("session", &self.session)
            .finish()
    }
}
