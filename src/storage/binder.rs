//! Binding a cache chain to a transactional invocation context.
//!
//! Binding produces a new chain with the same decorators, in the same order,
//! whose innermost layer reuses the given context for every call instead of
//! creating an implicit one. The original chain is left untouched.

use super::chain::{BoundEngine, Cache, Layer};
use super::transaction::InvocationContext;
use crate::error::TransactionError;
use std::sync::Arc;
use tracing::trace;

/// Rebuild `cache` so that every call runs under `context`.
///
/// Fails with [`TransactionError::ImplementationNotFound`] if the chain is
/// already bound, since it then has no plain engine to bind.
pub fn bind(cache: &Cache, context: InvocationContext) -> Result<Cache, TransactionError> {
    trace!(ctx = context.id(), "Binding cache chain");
    let root = rebind(&cache.root, context)?;
    Ok(Cache { root })
}

fn rebind(layer: &Arc<Layer>, context: InvocationContext) -> Result<Arc<Layer>, TransactionError> {
    match layer.as_ref() {
        Layer::Decorated { decorator, inner } => Ok(Arc::new(Layer::Decorated {
            decorator: decorator.clone(),
            inner: rebind(inner, context)?,
        })),
        Layer::Engine(engine) => Ok(Arc::new(Layer::Bound(BoundEngine {
            engine: Arc::clone(engine),
            context,
        }))),
        Layer::Bound(_) => Err(TransactionError::ImplementationNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Access, CacheEngine, CacheFlags, CacheStats, Decorator, ListenerBus};
    use crate::types::{Expiry, Key};
    use bytes::Bytes;

    fn decorated() -> (Cache, Arc<CacheStats>) {
        let engine = Arc::new(CacheEngine::new(1, Arc::new(ListenerBus::default())));
        let stats = Arc::new(CacheStats::default());
        let cache = Cache::new(engine)
            .decorate(Decorator::Stats(stats.clone()))
            .decorate(Decorator::Authorization(Access::ReadWrite))
            .with_flags(CacheFlags::IGNORE_RETURN_VALUES);
        (cache, stats)
    }

    #[test]
    fn test_bind_preserves_decorator_order() {
        let (cache, _) = decorated();
        let tx = cache.engine().transactions().enlist(1).unwrap();
        let context = InvocationContext::transactional(tx);
        let context_id = context.id();

        let bound = bind(&cache, context).unwrap();

        let before: Vec<String> = cache.decorators().iter().map(|d| format!("{d:?}")).collect();
        let after: Vec<String> = bound.decorators().iter().map(|d| format!("{d:?}")).collect();
        assert_eq!(before, after);
        assert!(bound.is_bound());
        assert!(!cache.is_bound());
        assert_eq!(bound.context().map(InvocationContext::id), Some(context_id));
        assert!(Arc::ptr_eq(cache.engine(), bound.engine()));
    }

    #[test]
    fn test_bind_undecorated_chain() {
        let engine = Arc::new(CacheEngine::new(1, Arc::new(ListenerBus::default())));
        let cache = Cache::new(engine);

        let bound = bind(&cache, InvocationContext::implicit(1)).unwrap();
        assert!(bound.decorators().is_empty());
        assert!(bound.is_bound());
    }

    #[test]
    fn test_binding_twice_fails() {
        let (cache, _) = decorated();
        let bound = bind(&cache, InvocationContext::implicit(1)).unwrap();

        assert_eq!(
            bind(&bound, InvocationContext::implicit(1)).unwrap_err(),
            TransactionError::ImplementationNotFound
        );
    }

    #[tokio::test]
    async fn test_bound_chain_shares_decorator_state() {
        let (cache, stats) = decorated();
        let tx = cache.engine().transactions().enlist(1).unwrap();
        let bound = bind(&cache, InvocationContext::transactional(tx.clone())).unwrap();

        bound
            .put(Key::from("k"), Bytes::from("v"), Expiry::Never)
            .await
            .unwrap();

        assert_eq!(stats.writes.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(tx.write_count(), 1);
        assert_eq!(cache.get(&Key::from("k")).await.unwrap(), None);
    }
}
