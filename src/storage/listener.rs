//! Cluster-wide key event listeners.
//!
//! Every node engine of a cluster publishes into one shared [`ListenerBus`].
//! A listener registered on any node therefore observes writes, removals and
//! expirations that happen on every node.
//!
//! ## Delivery
//!
//! 1. A listener registers with an [`EventKinds`] mask and an optional key filter
//! 2. Filtered listeners are indexed by key, unfiltered ones are kept aside
//! 3. `publish` collects the matching listeners and invokes them on the
//!    publishing thread, after every internal lock has been released
//!
//! Callbacks can therefore run on any worker thread at any time, including
//! after their registration has been removed.

use crate::error::StorageError;
use crate::types::Key;
use bitflags::bitflags;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Identifier of a cluster node.
pub type NodeId = u64;

bitflags! {
    /// Set of event kinds a listener is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventKinds: u8 {
        /// A key that did not exist was written
        const CREATED  = 1 << 0;
        /// An existing key was overwritten or had its expiry changed
        const MODIFIED = 1 << 1;
        /// A key was removed
        const REMOVED  = 1 << 2;
        /// A key expired
        const EXPIRED  = 1 << 3;
    }
}

/// Kind of a single cache event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    Removed,
    Expired,
}

impl EventKind {
    /// The mask bit matching this kind.
    #[inline]
    pub fn as_flag(self) -> EventKinds {
        match self {
            EventKind::Created => EventKinds::CREATED,
            EventKind::Modified => EventKinds::MODIFIED,
            EventKind::Removed => EventKinds::REMOVED,
            EventKind::Expired => EventKinds::EXPIRED,
        }
    }
}

/// A change to one key, published by the node that applied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub kind: EventKind,
    pub key: Key,
    pub origin: NodeId,
}

/// Callback invoked for every matching event.
pub trait KeyListener: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Handle returned by a registration, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    listener: Arc<dyn KeyListener>,
    kinds: EventKinds,
    keys: Option<Vec<Key>>,
}

/// Statistics for the listener bus.
#[derive(Debug, Default)]
pub struct BusStats {
    /// Total registrations accepted
    pub registrations: AtomicU64,
    /// Registrations refused because the bus was full
    pub rejected: AtomicU64,
    /// Events published
    pub events_published: AtomicU64,
    /// Listener invocations
    pub deliveries: AtomicU64,
}

/// Shared event bus for one cluster.
pub struct ListenerBus {
    next_id: AtomicU64,
    registrations: DashMap<ListenerId, Registration>,
    /// key -> listeners filtering on that key
    by_key: DashMap<Key, HashSet<ListenerId>>,
    /// listeners without a key filter
    unfiltered: DashSet<ListenerId>,
    max_listeners: usize,
    stats: BusStats,
}

impl fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBus")
            .field("registrations", &self.registrations.len())
            .field("indexed_keys", &self.by_key.len())
            .field("unfiltered", &self.unfiltered.len())
            .field("max_listeners", &self.max_listeners)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ListenerBus {
    /// Create a bus accepting at most `max_listeners` registrations.
    #[must_use]
    pub fn new(max_listeners: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            registrations: DashMap::new(),
            by_key: DashMap::new(),
            unfiltered: DashSet::new(),
            max_listeners,
            stats: BusStats::default(),
        }
    }

    /// Register a listener for `kinds`, restricted to `keys` when given.
    pub fn register(
        &self,
        listener: Arc<dyn KeyListener>,
        kinds: EventKinds,
        keys: Option<Vec<Key>>,
    ) -> Result<ListenerId, StorageError> {
        if self.registrations.len() >= self.max_listeners {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::TooManyListeners {
                max: self.max_listeners,
            });
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        match &keys {
            Some(keys) => {
                for key in keys {
                    self.by_key.entry(key.clone()).or_default().insert(id);
                }
            }
            None => {
                self.unfiltered.insert(id);
            }
        }

        self.registrations.insert(
            id,
            Registration {
                listener,
                kinds,
                keys,
            },
        );
        self.stats.registrations.fetch_add(1, Ordering::Relaxed);
        trace!("Registered listener {:?}", id);
        Ok(id)
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn deregister(&self, id: ListenerId) -> bool {
        let Some((_, registration)) = self.registrations.remove(&id) else {
            return false;
        };

        match registration.keys {
            Some(keys) => {
                for key in keys {
                    if let Some(mut ids) = self.by_key.get_mut(&key) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            drop(ids);
                            self.by_key.remove_if(&key, |_, ids| ids.is_empty());
                        }
                    }
                }
            }
            None => {
                self.unfiltered.remove(&id);
            }
        }

        trace!("Deregistered listener {:?}", id);
        true
    }

    /// Deliver an event to every matching listener.
    /// Returns the number of listeners invoked.
    pub fn publish(&self, event: &CacheEvent) -> usize {
        self.stats.events_published.fetch_add(1, Ordering::Relaxed);

        let mut ids: Vec<ListenerId> = self.unfiltered.iter().map(|id| *id).collect();
        if let Some(keyed) = self.by_key.get(&event.key) {
            ids.extend(keyed.iter().copied());
        }
        if ids.is_empty() {
            return 0;
        }

        let flag = event.kind.as_flag();
        let targets: Vec<Arc<dyn KeyListener>> = ids
            .into_iter()
            .filter_map(|id| {
                self.registrations
                    .get(&id)
                    .filter(|r| r.kinds.contains(flag))
                    .map(|r| Arc::clone(&r.listener))
            })
            .collect();

        for listener in &targets {
            listener.on_event(event);
        }

        self.stats
            .deliveries
            .fetch_add(targets.len() as u64, Ordering::Relaxed);
        targets.len()
    }

    /// Number of live registrations.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registrations.len()
    }

    /// Number of keys with at least one filtered listener.
    #[must_use]
    pub fn watched_key_count(&self) -> usize {
        self.by_key.len()
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> &BusStats {
        &self.stats
    }
}

impl Default for ListenerBus {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}
