//! cachewire server implementation.
//!
//! This module provides the async TCP server, connection handling,
//! per-connection transaction state and configuration.

pub mod config;
mod connection;
mod session;
pub mod watch;

pub use config::{Config, ConfigError, LogLevel};
pub use connection::Connection;
pub use session::ClientSession;
pub use watch::{WatchRegistry, Watcher};

use crate::Result;
use crate::commands::CommandExecutor;
use crate::storage::{Access, Cache, CacheEngine, CacheStats, Decorator, ExpiryManager, ListenerBus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

/// The main server.
#[derive(Debug)]
pub struct Server {
    /// Server configuration
    config: Config,
    /// This node's engine
    engine: Arc<CacheEngine>,
    /// Live cache chain handed to every connection
    cache: Cache,
    /// Keyspace statistics shown by INFO
    stats: Arc<CacheStats>,
    /// Command executor
    executor: Arc<CommandExecutor>,
    /// Expiry manager
    expiry_manager: Arc<ExpiryManager>,
    /// Running flag
    running: AtomicBool,
    /// Shutdown notification
    shutdown: Arc<Notify>,
    /// Connection counter
    connection_count: AtomicU64,
    /// Total connections
    total_connections: AtomicU64,
    /// Connection semaphore for backpressure (limits concurrent connections)
    connection_semaphore: Arc<Semaphore>,
}

impl Server {
    /// Create a server with its own listener bus.
    pub fn new(config: Config) -> Self {
        let bus = Arc::new(ListenerBus::new(config.max_watchers));
        Self::with_bus(config, bus)
    }

    /// Create a server whose engine joins an existing listener bus, so
    /// watchers on this node observe writes from every node on the bus.
    pub fn with_bus(config: Config, bus: Arc<ListenerBus>) -> Self {
        let engine = Arc::new(CacheEngine::with_limits(
            config.node_id,
            bus,
            config.transaction_limits(),
        ));
        let stats = Arc::new(CacheStats::default());

        let mut cache = Cache::new(engine.clone()).decorate(Decorator::Stats(stats.clone()));
        if config.read_only {
            cache = cache.decorate(Decorator::Authorization(Access::ReadOnly));
        }

        let executor = Arc::new(CommandExecutor::new());
        let expiry_manager = Arc::new(ExpiryManager::with_config(
            engine.clone(),
            config.expiry_config(),
        ));
        let connection_semaphore = Arc::new(Semaphore::new(config.max_clients));

        Self {
            config,
            engine,
            cache,
            stats,
            executor,
            expiry_manager,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            connection_count: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            connection_semaphore,
        }
    }

    /// Bind the configured address and run the server.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "Ready to accept connections on {} (node {})",
            listener.local_addr()?,
            self.engine.node_id()
        );

        self.running.store(true, Ordering::SeqCst);
        let expiry_handle = self.expiry_manager.clone().start();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            if let Err(e) = socket.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }

                            // Acquire connection permit (provides backpressure)
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("Max clients reached, rejecting connection from {}", peer_addr);
                                    continue;
                                }
                            };

                            self.connection_count.fetch_add(1, Ordering::Relaxed);
                            let conn_id = self.total_connections.fetch_add(1, Ordering::Relaxed) + 1;
                            let server = self.clone();

                            tokio::spawn(async move {
                                let _permit = permit;

                                let mut connection = Connection::new(
                                    socket,
                                    peer_addr,
                                    conn_id,
                                    server.executor.clone(),
                                    server.cache.clone(),
                                );

                                if let Err(e) = connection.run().await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }

                                server.connection_count.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!(
            "Waiting for {} active connections to close...",
            self.connection_count.load(Ordering::Relaxed)
        );

        let shutdown_timeout = Duration::from_secs(30);
        let start = Instant::now();
        while self.connection_count.load(Ordering::Relaxed) > 0 {
            if start.elapsed() > shutdown_timeout {
                warn!(
                    "Shutdown timeout reached, {} connections still active",
                    self.connection_count.load(Ordering::Relaxed)
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.expiry_manager.stop();
        expiry_handle.await.ok();

        self.running.store(false, Ordering::SeqCst);
        info!("cachewire is now ready to exit, bye bye...");

        Ok(())
    }

    /// Signal the server to shutdown.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Check if the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the current connection count.
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Get the total connections since startup.
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// The live cache chain.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
