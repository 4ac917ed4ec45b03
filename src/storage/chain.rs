//! The cache handle and its decorator chain.
//!
//! A [`Cache`] is an immutable chain of [`Layer`]s. Zero or more decorators
//! wrap an innermost layer, which is either the engine itself (one implicit
//! invocation context per call) or a bound engine carrying a transactional
//! context that every call reuses.
//!
//! Each call walks the chain from the outside in: flags accumulate,
//! authorization is checked and stats decorators are collected, then the
//! innermost layer runs the operation.
//!
//! The engine is synchronous; the `async` operations complete without
//! suspending and only fix the shape handlers are written against.

use super::engine::{CacheEngine, ContextSource, StoredEntry, WriteCondition};
use super::listener::{EventKinds, KeyListener, ListenerId};
use super::transaction::{InvocationContext, PendingWrite};
use crate::error::{CommandError, Result};
use crate::types::{Expiry, Key};
use bitflags::bitflags;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

bitflags! {
    /// Per-call behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CacheFlags: u8 {
        /// The caller does not need previous values back
        const IGNORE_RETURN_VALUES = 1 << 0;
        /// Do not count the call in stats decorators
        const SKIP_STATISTICS = 1 << 1;
    }
}

/// Access level enforced by an authorization decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// Hit, miss and write counters collected by a stats decorator.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub removals: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Hit,
    Miss,
    Write,
    Removal,
}

impl CacheStats {
    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Hit => &self.hits,
            Counter::Miss => &self.misses,
            Counter::Write => &self.writes,
            Counter::Removal => &self.removals,
        }
    }

    /// Hit ratio in the range 0.0..=1.0.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// One wrapping layer of the chain.
#[derive(Debug, Clone)]
pub enum Decorator {
    Flags(CacheFlags),
    Authorization(Access),
    Stats(Arc<CacheStats>),
}

/// An engine bound to one invocation context.
#[derive(Debug)]
pub(crate) struct BoundEngine {
    pub(crate) engine: Arc<CacheEngine>,
    pub(crate) context: InvocationContext,
}

#[derive(Debug)]
pub(crate) enum Layer {
    Decorated {
        decorator: Decorator,
        inner: Arc<Layer>,
    },
    Engine(Arc<CacheEngine>),
    Bound(BoundEngine),
}

/// Cheaply clonable handle to a decorator chain.
#[derive(Clone)]
pub struct Cache {
    pub(crate) root: Arc<Layer>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("decorators", &self.decorators())
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// What one call resolved from the chain.
struct Invocation<'a> {
    flags: CacheFlags,
    stats: Vec<&'a CacheStats>,
    engine: &'a CacheEngine,
    context: Option<&'a InvocationContext>,
}

impl<'a> Invocation<'a> {
    fn source(&self) -> ContextSource<'a> {
        match self.context {
            Some(ctx) => ContextSource::Reuse(ctx),
            None => ContextSource::Create,
        }
    }

    fn count(&self, counter: Counter) {
        if self.flags.contains(CacheFlags::SKIP_STATISTICS) {
            return;
        }
        for stats in &self.stats {
            stats.counter(counter).fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Cache {
    /// A chain with no decorators over `engine`.
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self {
            root: Arc::new(Layer::Engine(engine)),
        }
    }

    pub(crate) fn from_layer(layer: Layer) -> Self {
        Self {
            root: Arc::new(layer),
        }
    }

    /// Wrap this chain in one more outermost decorator.
    #[must_use]
    pub fn decorate(&self, decorator: Decorator) -> Self {
        Self::from_layer(Layer::Decorated {
            decorator,
            inner: Arc::clone(&self.root),
        })
    }

    /// Shorthand for decorating with [`Decorator::Flags`].
    #[must_use]
    pub fn with_flags(&self, flags: CacheFlags) -> Self {
        self.decorate(Decorator::Flags(flags))
    }

    /// Decorators from outermost to innermost.
    pub fn decorators(&self) -> Vec<&Decorator> {
        let mut out = Vec::new();
        let mut layer = self.root.as_ref();
        while let Layer::Decorated { decorator, inner } = layer {
            out.push(decorator);
            layer = inner.as_ref();
        }
        out
    }

    /// The engine at the bottom of the chain.
    pub fn engine(&self) -> &Arc<CacheEngine> {
        let mut layer = self.root.as_ref();
        loop {
            match layer {
                Layer::Decorated { inner, .. } => layer = inner.as_ref(),
                Layer::Engine(engine) => return engine,
                Layer::Bound(bound) => return &bound.engine,
            }
        }
    }

    /// The bound invocation context, if the chain is bound.
    pub fn context(&self) -> Option<&InvocationContext> {
        let mut layer = self.root.as_ref();
        loop {
            match layer {
                Layer::Decorated { inner, .. } => layer = inner.as_ref(),
                Layer::Engine(_) => return None,
                Layer::Bound(bound) => return Some(&bound.context),
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        self.context().is_some()
    }

    fn invocation(&self, writes: bool) -> Result<Invocation<'_>> {
        let mut flags = CacheFlags::empty();
        let mut stats = Vec::new();
        let mut layer = self.root.as_ref();

        loop {
            match layer {
                Layer::Decorated { decorator, inner } => {
                    match decorator {
                        Decorator::Flags(f) => flags |= *f,
                        Decorator::Authorization(Access::ReadOnly) if writes => {
                            return Err(CommandError::ReadOnly.into());
                        }
                        Decorator::Authorization(_) => {}
                        Decorator::Stats(s) => stats.push(s.as_ref()),
                    }
                    layer = inner.as_ref();
                }
                Layer::Engine(engine) => {
                    return Ok(Invocation {
                        flags,
                        stats,
                        engine,
                        context: None,
                    });
                }
                Layer::Bound(bound) => {
                    return Ok(Invocation {
                        flags,
                        stats,
                        engine: &bound.engine,
                        context: Some(&bound.context),
                    });
                }
            }
        }
    }

    /// Read the live entry for `key`.
    pub async fn get_entry(&self, key: &Key) -> Result<Option<StoredEntry>> {
        let call = self.invocation(false)?;
        let entry = call.engine.read(call.source(), key)?;
        if entry.is_some() {
            call.count(Counter::Hit);
        } else {
            call.count(Counter::Miss);
        }
        Ok(entry)
    }

    /// Read the value of `key`.
    pub async fn get(&self, key: &Key) -> Result<Option<Bytes>> {
        Ok(self.get_entry(key).await?.map(|e| e.value))
    }

    /// Store `value`. Returns the previous value unless
    /// [`CacheFlags::IGNORE_RETURN_VALUES`] is set.
    pub async fn put(&self, key: Key, value: Bytes, expiry: Expiry) -> Result<Option<Bytes>> {
        let call = self.invocation(true)?;
        let outcome = call.engine.write(
            call.source(),
            key,
            PendingWrite::Put { value, expiry },
            WriteCondition::Always,
        )?;
        call.count(Counter::Write);

        if call.flags.contains(CacheFlags::IGNORE_RETURN_VALUES) {
            Ok(None)
        } else {
            Ok(outcome.previous)
        }
    }

    /// Store `value` only if `key` is absent. Returns the existing value if
    /// there was one, `None` if the value was stored.
    pub async fn put_if_absent(&self, key: Key, value: Bytes, expiry: Expiry) -> Result<Option<Bytes>> {
        let call = self.invocation(true)?;
        let outcome = call.engine.write(
            call.source(),
            key,
            PendingWrite::Put { value, expiry },
            WriteCondition::IfAbsent,
        )?;
        if outcome.applied {
            call.count(Counter::Write);
        }
        Ok(outcome.previous)
    }

    /// Store `value` only if `key` is present. Returns the replaced value,
    /// `None` if nothing was stored.
    pub async fn replace(&self, key: Key, value: Bytes, expiry: Expiry) -> Result<Option<Bytes>> {
        let call = self.invocation(true)?;
        let outcome = call.engine.write(
            call.source(),
            key,
            PendingWrite::Put { value, expiry },
            WriteCondition::IfPresent,
        )?;
        if outcome.applied {
            call.count(Counter::Write);
        }
        Ok(outcome.previous)
    }

    /// Replace the value of `key` with `f(current)`, keeping its expiry.
    pub async fn compute<F>(&self, key: Key, f: F) -> Result<Bytes>
    where
        F: FnOnce(Option<&Bytes>) -> Result<Bytes>,
    {
        let call = self.invocation(true)?;
        let value = call.engine.compute(call.source(), key, f)?;
        call.count(Counter::Write);
        Ok(value)
    }

    /// Remove `key`. Returns the removed value.
    pub async fn remove(&self, key: Key) -> Result<Option<Bytes>> {
        let call = self.invocation(true)?;
        let outcome = call.engine.write(
            call.source(),
            key,
            PendingWrite::Remove,
            WriteCondition::Always,
        )?;
        if outcome.applied {
            call.count(Counter::Removal);
        }
        Ok(outcome.previous)
    }

    /// Change the expiry of an existing key. Returns false if the key is absent.
    pub async fn set_expiry(&self, key: Key, expiry: Expiry) -> Result<bool> {
        let call = self.invocation(true)?;
        let outcome = call.engine.write(
            call.source(),
            key,
            PendingWrite::Touch { expiry },
            WriteCondition::IfPresent,
        )?;
        Ok(outcome.applied)
    }

    /// Register a listener on the cluster-wide bus.
    pub fn add_listener(
        &self,
        listener: Arc<dyn KeyListener>,
        kinds: EventKinds,
        keys: Option<Vec<Key>>,
    ) -> Result<ListenerId> {
        Ok(self.engine().bus().register(listener, kinds, keys)?)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.engine().bus().deregister(id)
    }

    /// Number of committed entries on this node.
    pub fn size(&self) -> usize {
        self.engine().len()
    }
}
