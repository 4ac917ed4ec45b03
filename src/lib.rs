//! # cachewire
//!
//! A Redis-compatible wire server in front of a clustered in-memory cache,
//! built around optimistic MULTI/EXEC/WATCH transactions.
//!
//! - RESP2 protocol over TCP
//! - String and key commands (GET, SET, INCR, EXPIRE, TTL, ...)
//! - MULTI/EXEC/DISCARD with per-connection command queues
//! - WATCH/UNWATCH guarded by cluster-wide key listeners
//! - EXEC runs inside one local transaction of the cache engine
//!
//! ## Example
//!
//! ```no_run
//! use cachewire::{Config, Result, Server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default();
//!     let server = Arc::new(Server::new(config));
//!     server.run().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_qualifications
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::type_complexity,            // Boxed handler futures
    clippy::len_without_is_empty,
    missing_docs
)]

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Command parsing, dispatch and the EXEC engine.
pub mod commands;
/// Error types and result aliases.
pub mod error;
/// RESP2 protocol implementation.
pub mod protocol;
/// TCP server, sessions and configuration.
pub mod server;
/// Cache engine, decorator chain and local transactions.
pub mod storage;
/// Key and expiry types.
pub mod types;

// ─────────────────────────────────────────────────────────────────────────────
// Common Re-exports
// ─────────────────────────────────────────────────────────────────────────────

// Error handling
pub use error::{Error, Result};

// Protocol
pub use protocol::{Frame, RespParser};

// Server
pub use server::{ClientSession, Config, Server};

// Storage
pub use storage::{Cache, CacheEngine, ListenerBus};

// Types
pub use types::Key;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Crate version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Maximum inline request size (64 KiB).
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum bulk string size (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in a command.
pub const MAX_ARGUMENTS: usize = 1_000_000;
