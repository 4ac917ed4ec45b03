//! Local transactions.
//!
//! A [`LocalTransaction`] buffers every write issued through its
//! [`InvocationContext`] and hands the write set to the engine on commit.
//! Reads through the same context see the buffered writes.
//!
//! [`TransactionHandle`] is the lifecycle owner used by EXEC: it enlists the
//! transaction, binds a cache view to it and guarantees that the transaction
//! is finished exactly once, rolling back if the handle is dropped.

use super::binder;
use super::chain::Cache;
use super::engine::CacheEngine;
use crate::error::{Result, StorageError, TransactionError};
use crate::types::{Expiry, Key};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Transaction identifier, unique per engine.
pub type TxId = u64;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a local transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Active,
    Committed,
    RolledBack,
    TimedOut,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Active => "active",
            TxStatus::Committed => "committed",
            TxStatus::RolledBack => "rolled back",
            TxStatus::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// A buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWrite {
    Put { value: Bytes, expiry: Expiry },
    Remove,
    /// Change only the expiry of an existing entry
    Touch { expiry: Expiry },
}

#[derive(Debug, Default)]
struct WriteSet {
    /// first-write order, used when applying
    order: Vec<Key>,
    writes: HashMap<Key, PendingWrite>,
}

impl WriteSet {
    fn insert(&mut self, key: Key, write: PendingWrite) {
        if !self.writes.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.writes.insert(key, write);
    }

    fn drain(&mut self) -> Vec<(Key, PendingWrite)> {
        let mut writes = std::mem::take(&mut self.writes);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|key| writes.remove(&key).map(|w| (key, w)))
            .collect()
    }
}

/// A transaction local to one engine.
pub struct LocalTransaction {
    id: TxId,
    origin: u64,
    started: Instant,
    status: Mutex<TxStatus>,
    writes: Mutex<WriteSet>,
}

impl fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransaction")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("status", &*self.status.lock())
            .field("writes", &self.write_count())
            .finish()
    }
}

impl LocalTransaction {
    fn new(id: TxId, origin: u64) -> Self {
        Self {
            id,
            origin,
            started: Instant::now(),
            status: Mutex::new(TxStatus::Active),
            writes: Mutex::new(WriteSet::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Id of the client connection that started the transaction.
    #[inline]
    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn status(&self) -> TxStatus {
        *self.status.lock()
    }

    pub fn is_active(&self) -> bool {
        self.status() == TxStatus::Active
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of distinct keys written so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().writes.len()
    }

    pub(crate) fn pending(&self, key: &Key) -> Option<PendingWrite> {
        self.writes.lock().writes.get(key).cloned()
    }

    /// Buffer a write. Fails once the transaction has been finished.
    pub(crate) fn record(&self, key: Key, write: PendingWrite) -> std::result::Result<(), StorageError> {
        let status = self.status.lock();
        if *status != TxStatus::Active {
            return Err(StorageError::TransactionNotActive(self.id));
        }
        self.writes.lock().insert(key, write);
        Ok(())
    }

    /// Move from `Active` to `outcome`, returning the buffered writes.
    /// Returns the current status if the transaction was already finished.
    pub(crate) fn finish(
        &self,
        outcome: TxStatus,
    ) -> std::result::Result<Vec<(Key, PendingWrite)>, TxStatus> {
        let mut status = self.status.lock();
        if *status != TxStatus::Active {
            return Err(*status);
        }
        *status = outcome;
        Ok(self.writes.lock().drain())
    }
}

/// The context an engine operation runs under.
///
/// Implicit contexts are created per call by an unbound chain. A bound chain
/// carries one transactional context and reuses it for every call.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    id: u64,
    origin: u64,
    tx: Option<Arc<LocalTransaction>>,
}

impl InvocationContext {
    /// A fresh non-transactional context.
    pub fn implicit(origin: u64) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            origin,
            tx: None,
        }
    }

    /// A context carrying `tx`.
    pub fn transactional(tx: Arc<LocalTransaction>) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            origin: tx.origin(),
            tx: Some(tx),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn origin(&self) -> u64 {
        self.origin
    }

    #[inline]
    pub fn transaction(&self) -> Option<&Arc<LocalTransaction>> {
        self.tx.as_ref()
    }
}

/// Transaction counters, reported by INFO.
#[derive(Debug, Default)]
pub struct TransactionStats {
    pub started: AtomicU64,
    pub committed: AtomicU64,
    pub rolled_back: AtomicU64,
    pub timed_out: AtomicU64,
    pub start_failures: AtomicU64,
    pub commit_failures: AtomicU64,
    /// EXEC calls answered with a null array because a watched key changed
    pub aborted_execs: AtomicU64,
}

/// Limits applied by a [`TransactionTable`].
#[derive(Debug, Clone, Copy)]
pub struct TransactionLimits {
    /// Maximum number of concurrently active transactions
    pub max_active: usize,
    /// Transactions older than this are reaped; `None` disables reaping
    pub timeout: Option<Duration>,
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            max_active: usize::MAX,
            timeout: None,
        }
    }
}

/// Active transactions of one engine.
#[derive(Debug)]
pub struct TransactionTable {
    next_id: AtomicU64,
    active: DashMap<TxId, Arc<LocalTransaction>>,
    limits: TransactionLimits,
    stats: TransactionStats,
}

impl TransactionTable {
    pub fn new(limits: TransactionLimits) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: DashMap::new(),
            limits,
            stats: TransactionStats::default(),
        }
    }

    /// Start a new transaction on behalf of connection `origin`.
    pub fn enlist(&self, origin: u64) -> std::result::Result<Arc<LocalTransaction>, TransactionError> {
        if self.active.len() >= self.limits.max_active {
            self.stats.start_failures.fetch_add(1, Ordering::Relaxed);
            return Err(TransactionError::Start(format!(
                "too many active transactions (max: {})",
                self.limits.max_active
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tx = Arc::new(LocalTransaction::new(id, origin));
        self.active.insert(id, Arc::clone(&tx));
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        Ok(tx)
    }

    pub(crate) fn delist(&self, id: TxId) {
        self.active.remove(&id);
    }

    /// Time out every transaction older than the configured timeout.
    /// Returns how many were reaped.
    pub fn reap_timed_out(&self) -> usize {
        let Some(timeout) = self.limits.timeout else {
            return 0;
        };

        let stale: Vec<Arc<LocalTransaction>> = self
            .active
            .iter()
            .filter(|tx| tx.age() >= timeout)
            .map(|tx| Arc::clone(tx.value()))
            .collect();

        let mut reaped = 0;
        for tx in stale {
            if tx.finish(TxStatus::TimedOut).is_ok() {
                self.active.remove(&tx.id());
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                debug!(tx = tx.id(), origin = tx.origin(), "Transaction timed out");
                reaped += 1;
            }
        }
        reaped
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn limits(&self) -> TransactionLimits {
        self.limits
    }

    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new(TransactionLimits::default())
    }
}

/// Owner of one local transaction and the cache view bound to it.
///
/// Exactly one of [`commit`](Self::commit) or [`rollback`](Self::rollback)
/// finishes the transaction. Dropping an unfinished handle rolls it back.
pub struct TransactionHandle {
    tx: Arc<LocalTransaction>,
    engine: Arc<CacheEngine>,
    cache: Cache,
    finished: bool,
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("tx", &self.tx)
            .field("finished", &self.finished)
            .finish()
    }
}

impl TransactionHandle {
    /// Enlist a transaction on the engine behind `cache` and bind a view of
    /// `cache` to it.
    pub fn begin(cache: &Cache, origin: u64) -> Result<Self> {
        let engine = Arc::clone(cache.engine());
        let tx = engine.transactions().enlist(origin)?;

        let bound = match binder::bind(cache, InvocationContext::transactional(Arc::clone(&tx))) {
            Ok(bound) => bound,
            Err(e) => {
                engine.rollback(&tx);
                return Err(e.into());
            }
        };

        debug!(tx = tx.id(), origin, "Transaction started");
        Ok(Self {
            tx,
            engine,
            cache: bound,
            finished: false,
        })
    }

    #[inline]
    pub fn id(&self) -> TxId {
        self.tx.id()
    }

    /// The cache view bound to this transaction.
    #[inline]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Apply the buffered writes. Returns the number of keys written.
    pub fn commit(mut self) -> Result<usize> {
        self.finished = true;
        let applied = self.engine.commit(&self.tx)?;
        debug!(tx = self.tx.id(), applied, "Transaction committed");
        Ok(applied)
    }

    /// Discard the buffered writes.
    pub fn rollback(mut self) {
        self.finished = true;
        self.engine.rollback(&self.tx);
        debug!(tx = self.tx.id(), "Transaction rolled back");
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        if !self.finished {
            warn!(tx = self.tx.id(), "Transaction handle dropped while active, rolling back");
            self.engine.rollback(&self.tx);
        }
    }
}
