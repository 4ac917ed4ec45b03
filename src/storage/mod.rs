//! Clustered in-memory cache.
//!
//! This module provides the storage layer including:
//! - Per-node cache engines sharing a cluster-wide listener bus
//! - The decorator chain every command goes through
//! - Local transactions and binding a chain to one
//! - TTL/expiration handling

mod binder;
mod chain;
mod engine;
mod expiry;
mod listener;
mod transaction;

pub use binder::bind;
pub use chain::{Access, Cache, CacheFlags, CacheStats, Decorator};
pub use engine::{CacheEngine, ContextSource, StoredEntry, WriteCondition, WriteOutcome};
pub use expiry::{ExpiryConfig, ExpiryManager};
pub use listener::{
    BusStats, CacheEvent, EventKind, EventKinds, KeyListener, ListenerBus, ListenerId, NodeId,
};
pub use transaction::{
    InvocationContext, LocalTransaction, TransactionHandle, TransactionLimits, TransactionStats,
    TransactionTable, TxId, TxStatus,
};
