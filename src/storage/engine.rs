//! Cache engine of one cluster node.
//!
//! The engine owns the committed entries of its node, the node's local
//! transactions and a handle to the cluster's shared [`ListenerBus`].
//! Expired entries are removed lazily on access and actively by the
//! [`ExpiryManager`](super::ExpiryManager); both publish `Expired` events.

use super::listener::{CacheEvent, EventKind, ListenerBus, NodeId};
use super::transaction::{
    InvocationContext, LocalTransaction, PendingWrite, TransactionLimits, TransactionTable,
    TxStatus,
};
use crate::error::{Result, StorageError, TransactionError};
use crate::types::{current_timestamp_ms, Expiry, Key, Timestamp};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::trace;

/// A committed value with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub value: Bytes,
    pub expiry: Expiry,
}

/// Where an operation gets its invocation context from.
#[derive(Debug, Clone, Copy)]
pub enum ContextSource<'a> {
    /// Create an implicit context for this call
    Create,
    /// Reuse a context supplied by a bound chain
    Reuse(&'a InvocationContext),
}

/// Precondition for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    Always,
    IfAbsent,
    IfPresent,
}

impl WriteCondition {
    #[inline]
    fn allows(self, exists: bool) -> bool {
        match self {
            WriteCondition::Always => true,
            WriteCondition::IfAbsent => !exists,
            WriteCondition::IfPresent => exists,
        }
    }
}

/// Result of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Live value before the write
    pub previous: Option<Bytes>,
    /// Whether the write took effect
    pub applied: bool,
}

/// Per-node cache engine.
pub struct CacheEngine {
    node_id: NodeId,
    data: DashMap<Key, StoredEntry>,
    bus: Arc<ListenerBus>,
    transactions: TransactionTable,
    /// serializes commits against each other
    commit_lock: Mutex<()>,
}

impl fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("node_id", &self.node_id)
            .field("entries", &self.data.len())
            .field("transactions", &self.transactions.active_count())
            .finish()
    }
}

impl CacheEngine {
    /// Create an engine without transaction limits.
    pub fn new(node_id: NodeId, bus: Arc<ListenerBus>) -> Self {
        Self::with_limits(node_id, bus, TransactionLimits::default())
    }

    pub fn with_limits(node_id: NodeId, bus: Arc<ListenerBus>, limits: TransactionLimits) -> Self {
        Self {
            node_id,
            data: DashMap::new(),
            bus,
            transactions: TransactionTable::new(limits),
            commit_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The cluster-wide listener bus.
    #[inline]
    pub fn bus(&self) -> &Arc<ListenerBus> {
        &self.bus
    }

    #[inline]
    pub fn transactions(&self) -> &TransactionTable {
        &self.transactions
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read the live entry for `key`.
    pub(crate) fn read(&self, source: ContextSource<'_>, key: &Key) -> Result<Option<StoredEntry>> {
        let implicit;
        let ctx = match source {
            ContextSource::Create => {
                implicit = InvocationContext::implicit(0);
                &implicit
            }
            ContextSource::Reuse(ctx) => ctx,
        };
        let now = current_timestamp_ms();

        match ctx.transaction() {
            Some(tx) => Ok(self.resolve(tx, key, now)?),
            None => Ok(self.lookup(key, now)),
        }
    }

    /// Write `key` if `condition` holds for its current state.
    pub(crate) fn write(
        &self,
        source: ContextSource<'_>,
        key: Key,
        write: PendingWrite,
        condition: WriteCondition,
    ) -> Result<WriteOutcome> {
        let now = current_timestamp_ms();
        let tx = match source {
            ContextSource::Create => None,
            ContextSource::Reuse(ctx) => ctx.transaction(),
        };

        let Some(tx) = tx else {
            let (outcome, event) = self.apply(&key, write, condition, now);
            if let Some(kind) = event {
                self.publish(kind, key);
            }
            return Ok(outcome);
        };

        let current = self.resolve(tx, &key, now)?;
        let exists = current.is_some();
        let previous = current.map(|e| e.value);
        if !condition.allows(exists) {
            return Ok(WriteOutcome {
                previous,
                applied: false,
            });
        }

        let applied = match &write {
            PendingWrite::Put { .. } => true,
            PendingWrite::Remove | PendingWrite::Touch { .. } => exists,
        };
        if !applied {
            return Ok(WriteOutcome { previous, applied });
        }

        // an expiry change on top of a buffered put folds into that put
        let write = match (write, tx.pending(&key)) {
            (PendingWrite::Touch { expiry }, Some(PendingWrite::Put { value, .. })) => {
                PendingWrite::Put { value, expiry }
            }
            (write, _) => write,
        };

        trace!(tx = tx.id(), key = %key, "Buffered write");
        tx.record(key, write)?;
        Ok(WriteOutcome { previous, applied })
    }

    /// Replace the value of `key` with `f(current)`, keeping its expiry.
    /// The closure runs while the entry is locked.
    pub(crate) fn compute<F>(&self, source: ContextSource<'_>, key: Key, f: F) -> Result<Bytes>
    where
        F: FnOnce(Option<&Bytes>) -> Result<Bytes>,
    {
        let now = current_timestamp_ms();
        let tx = match source {
            ContextSource::Create => None,
            ContextSource::Reuse(ctx) => ctx.transaction(),
        };

        if let Some(tx) = tx {
            let current = self.resolve(tx, &key, now)?;
            let value = f(current.as_ref().map(|e| &e.value))?;
            let expiry = current.map(|e| e.expiry).unwrap_or_default();
            tx.record(
                key,
                PendingWrite::Put {
                    value: value.clone(),
                    expiry,
                },
            )?;
            return Ok(value);
        }

        let (value, kind) = match self.data.entry(key.clone()) {
            Entry::Occupied(mut occupied) if !occupied.get().expiry.is_expired_at(now) => {
                let value = f(Some(&occupied.get().value))?;
                occupied.get_mut().value = value.clone();
                (value, EventKind::Modified)
            }
            Entry::Occupied(mut occupied) => {
                let value = f(None)?;
                occupied.insert(StoredEntry {
                    value: value.clone(),
                    expiry: Expiry::Never,
                });
                (value, EventKind::Created)
            }
            Entry::Vacant(vacant) => {
                let value = f(None)?;
                vacant.insert(StoredEntry {
                    value: value.clone(),
                    expiry: Expiry::Never,
                });
                (value, EventKind::Created)
            }
        };

        self.publish(kind, key);
        Ok(value)
    }

    /// Apply a transaction's write set. Nothing is applied if the
    /// transaction is no longer active.
    pub(crate) fn commit(&self, tx: &LocalTransaction) -> std::result::Result<usize, TransactionError> {
        let stats = self.transactions.stats();
        let writes = match tx.finish(TxStatus::Committed) {
            Ok(writes) => writes,
            Err(status) => {
                self.transactions.delist(tx.id());
                stats.commit_failures.fetch_add(1, Ordering::Relaxed);
                return Err(TransactionError::Commit {
                    id: tx.id(),
                    reason: format!("transaction is {status}"),
                });
            }
        };
        self.transactions.delist(tx.id());

        let mut events = Vec::with_capacity(writes.len());
        let mut applied = 0;
        {
            let _guard = self.commit_lock.lock();
            let now = current_timestamp_ms();
            for (key, write) in writes {
                let (outcome, event) = self.apply(&key, write, WriteCondition::Always, now);
                if outcome.applied {
                    applied += 1;
                }
                if let Some(kind) = event {
                    events.push((kind, key));
                }
            }
        }

        for (kind, key) in events {
            self.publish(kind, key);
        }
        stats.committed.fetch_add(1, Ordering::Relaxed);
        Ok(applied)
    }

    /// Discard a transaction's write set. No-op if already finished.
    pub(crate) fn rollback(&self, tx: &LocalTransaction) {
        if tx.finish(TxStatus::RolledBack).is_ok() {
            self.transactions
                .stats()
                .rolled_back
                .fetch_add(1, Ordering::Relaxed);
        }
        self.transactions.delist(tx.id());
    }

    /// Remove up to `limit` expired entries. Returns how many were removed.
    pub fn purge_expired(&self, limit: usize) -> usize {
        let now = current_timestamp_ms();
        let expired: Vec<Key> = self
            .data
            .iter()
            .filter(|entry| entry.expiry.is_expired_at(now))
            .take(limit)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.expire_key(&key, now) {
                removed += 1;
            }
        }
        removed
    }

    fn lookup(&self, key: &Key, now: Timestamp) -> Option<StoredEntry> {
        let entry = self.data.get(key)?;
        if !entry.expiry.is_expired_at(now) {
            return Some(entry.clone());
        }
        drop(entry);
        self.expire_key(key, now);
        None
    }

    /// Committed state overlaid with the transaction's buffered writes.
    fn resolve(
        &self,
        tx: &LocalTransaction,
        key: &Key,
        now: Timestamp,
    ) -> std::result::Result<Option<StoredEntry>, StorageError> {
        if !tx.is_active() {
            return Err(StorageError::TransactionNotActive(tx.id()));
        }

        let entry = match tx.pending(key) {
            Some(PendingWrite::Put { value, expiry }) => Some(StoredEntry { value, expiry }),
            Some(PendingWrite::Remove) => None,
            Some(PendingWrite::Touch { expiry }) => {
                self.lookup(key, now).map(|e| StoredEntry { expiry, ..e })
            }
            None => self.lookup(key, now),
        };
        Ok(entry.filter(|e| !e.expiry.is_expired_at(now)))
    }

    /// Apply one write to the committed entries. Returns the outcome and the
    /// event to publish once the entry lock has been released.
    fn apply(
        &self,
        key: &Key,
        write: PendingWrite,
        condition: WriteCondition,
        now: Timestamp,
    ) -> (WriteOutcome, Option<EventKind>) {
        match self.data.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let live = !occupied.get().expiry.is_expired_at(now);
                let previous = live.then(|| occupied.get().value.clone());

                if !condition.allows(live) {
                    let event = if live {
                        None
                    } else {
                        occupied.remove();
                        Some(EventKind::Expired)
                    };
                    return (
                        WriteOutcome {
                            previous,
                            applied: false,
                        },
                        event,
                    );
                }

                match write {
                    PendingWrite::Put { value, expiry } => {
                        occupied.insert(StoredEntry { value, expiry });
                        let kind = if live {
                            EventKind::Modified
                        } else {
                            EventKind::Created
                        };
                        (
                            WriteOutcome {
                                previous,
                                applied: true,
                            },
                            Some(kind),
                        )
                    }
                    PendingWrite::Remove => {
                        occupied.remove();
                        let kind = if live {
                            EventKind::Removed
                        } else {
                            EventKind::Expired
                        };
                        (
                            WriteOutcome {
                                previous,
                                applied: live,
                            },
                            Some(kind),
                        )
                    }
                    PendingWrite::Touch { expiry } if live => {
                        occupied.get_mut().expiry = expiry;
                        (
                            WriteOutcome {
                                previous,
                                applied: true,
                            },
                            Some(EventKind::Modified),
                        )
                    }
                    PendingWrite::Touch { .. } => {
                        occupied.remove();
                        (WriteOutcome::default(), Some(EventKind::Expired))
                    }
                }
            }
            Entry::Vacant(vacant) => match write {
                PendingWrite::Put { value, expiry } if condition.allows(false) => {
                    vacant.insert(StoredEntry { value, expiry });
                    (
                        WriteOutcome {
                            previous: None,
                            applied: true,
                        },
                        Some(EventKind::Created),
                    )
                }
                _ => (WriteOutcome::default(), None),
            },
        }
    }

    fn expire_key(&self, key: &Key, now: Timestamp) -> bool {
        let removed = self
            .data
            .remove_if(key, |_, entry| entry.expiry.is_expired_at(now))
            .is_some();
        if removed {
            trace!(key = %key, node = self.node_id, "Key expired");
            self.publish(EventKind::Expired, key.clone());
        }
        removed
    }

    fn publish(&self, kind: EventKind, key: Key) {
        self.bus.publish(&CacheEvent {
            kind,
            key,
            origin: self.node_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::listener::{EventKinds, KeyListener};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CacheEvent>>);

    impl KeyListener for Recorder {
        fn on_event(&self, event: &CacheEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn engine() -> CacheEngine {
        CacheEngine::new(1, Arc::new(ListenerBus::default()))
    }

    fn put(value: &'static str) -> PendingWrite {
        PendingWrite::Put {
            value: Bytes::from_static(value.as_bytes()),
            expiry: Expiry::Never,
        }
    }

    #[test]
    fn test_direct_write_publishes_events() {
        let engine = engine();
        let recorder = Arc::new(Recorder::default());
        engine
            .bus()
            .register(recorder.clone(), EventKinds::all(), None)
            .unwrap();

        let k = Key::from("k");
        engine
            .write(ContextSource::Create, k.clone(), put("1"), WriteCondition::Always)
            .unwrap();
        engine
            .write(ContextSource::Create, k.clone(), put("2"), WriteCondition::Always)
            .unwrap();
        engine
            .write(ContextSource::Create, k, PendingWrite::Remove, WriteCondition::Always)
            .unwrap();

        let kinds: Vec<EventKind> = recorder.0.lock().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Created, EventKind::Modified, EventKind::Removed]
        );
    }

    #[test]
    fn test_conditional_writes() {
        let engine = engine();
        let k = Key::from("k");

        let outcome = engine
            .write(ContextSource::Create, k.clone(), put("1"), WriteCondition::IfPresent)
            .unwrap();
        assert!(!outcome.applied);

        let outcome = engine
            .write(ContextSource::Create, k.clone(), put("1"), WriteCondition::IfAbsent)
            .unwrap();
        assert!(outcome.applied);

        let outcome = engine
            .write(ContextSource::Create, k, put("2"), WriteCondition::IfAbsent)
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.previous, Some(Bytes::from_static(b"1")));
    }

    #[test]
    fn test_lazy_expiry_publishes_expired() {
        let engine = engine();
        let count = Arc::new(AtomicCounter::default());
        engine
            .bus()
            .register(count.clone(), EventKinds::EXPIRED, None)
            .unwrap();

        let k = Key::from("k");
        engine
            .write(
                ContextSource::Create,
                k.clone(),
                PendingWrite::Put {
                    value: Bytes::from_static(b"v"),
                    expiry: Expiry::At(1),
                },
                WriteCondition::Always,
            )
            .unwrap();

        assert_eq!(engine.read(ContextSource::Create, &k).unwrap(), None);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let engine = engine();
        for i in 0..10 {
            let expiry = if i % 2 == 0 { Expiry::At(1) } else { Expiry::Never };
            engine
                .write(
                    ContextSource::Create,
                    Key::from(format!("k{i}").as_str()),
                    PendingWrite::Put {
                        value: Bytes::from_static(b"v"),
                        expiry,
                    },
                    WriteCondition::Always,
                )
                .unwrap();
        }

        assert_eq!(engine.purge_expired(100), 5);
        assert_eq!(engine.len(), 5);
    }

    #[test]
    fn test_transaction_writes_are_buffered_until_commit() {
        let engine = engine();
        let tx = engine.transactions().enlist(1).unwrap();
        let ctx = InvocationContext::transactional(Arc::clone(&tx));
        let k = Key::from("k");

        engine
            .write(ContextSource::Reuse(&ctx), k.clone(), put("v"), WriteCondition::Always)
            .unwrap();

        assert_eq!(engine.read(ContextSource::Create, &k).unwrap(), None);
        assert_eq!(
            engine.read(ContextSource::Reuse(&ctx), &k).unwrap().map(|e| e.value),
            Some(Bytes::from_static(b"v"))
        );

        assert_eq!(engine.commit(&tx).unwrap(), 1);
        assert!(engine.read(ContextSource::Create, &k).unwrap().is_some());
        assert_eq!(engine.transactions().active_count(), 0);
    }

    #[test]
    fn test_commit_after_timeout_applies_nothing() {
        let engine = CacheEngine::with_limits(
            1,
            Arc::new(ListenerBus::default()),
            TransactionLimits {
                max_active: 8,
                timeout: Some(std::time::Duration::ZERO),
            },
        );
        let tx = engine.transactions().enlist(1).unwrap();
        let ctx = InvocationContext::transactional(Arc::clone(&tx));
        engine
            .write(ContextSource::Reuse(&ctx), Key::from("k"), put("v"), WriteCondition::Always)
            .unwrap();

        engine.transactions().reap_timed_out();

        let err = engine.commit(&tx).unwrap_err();
        assert!(matches!(err, TransactionError::Commit { .. }));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_compute_keeps_expiry() {
        let engine = engine();
        let k = Key::from("n");
        let far = Expiry::At(current_timestamp_ms() + 60_000);
        engine
            .write(
                ContextSource::Create,
                k.clone(),
                PendingWrite::Put {
                    value: Bytes::from_static(b"1"),
                    expiry: far,
                },
                WriteCondition::Always,
            )
            .unwrap();

        let value = engine
            .compute(ContextSource::Create, k.clone(), |_| Ok(Bytes::from_static(b"2")))
            .unwrap();
        assert_eq!(value, Bytes::from_static(b"2"));
        assert_eq!(
            engine.read(ContextSource::Create, &k).unwrap().map(|e| e.expiry),
            Some(far)
        );
    }

    #[derive(Default)]
    struct AtomicCounter(AtomicUsize);

    impl KeyListener for AtomicCounter {
        fn on_event(&self, _event: &CacheEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}
