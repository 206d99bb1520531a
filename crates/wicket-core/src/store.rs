//! Registry of live request contexts.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::{RequestContext, RequestId, RequestLimits};
use crate::request::Request;

/// Owns every live [`RequestContext`].
///
/// Propagation frames only hold weak references, so a context lives exactly
/// as long as its entry here (plus any strong handle a caller kept). The lock
/// is held only for single map operations.
#[derive(Debug, Default)]
pub struct ContextStore {
    live: Mutex<HashMap<RequestId, Arc<RequestContext>>>,
}

impl ContextStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a context for `request` and register it.
    pub fn open(self: &Arc<Self>, request: Request, limits: RequestLimits) -> Arc<RequestContext> {
        let ctx = Arc::new(RequestContext::in_store(
            request,
            limits,
            Arc::downgrade(self),
        ));
        self.live.lock().insert(ctx.id(), Arc::clone(&ctx));
        ctx
    }

    /// Look up a live context.
    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<Arc<RequestContext>> {
        self.live.lock().get(&id).cloned()
    }

    /// True if the context is still registered.
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.live.lock().contains_key(&id)
    }

    /// Release a context. Returns false if it was not live.
    pub fn release(&self, id: RequestId) -> bool {
        let removed = self.live.lock().remove(&id);
        match removed {
            Some(ctx) => ctx.mark_released(),
            None => false,
        }
    }

    pub(crate) fn forget(&self, id: RequestId) {
        self.live.lock().remove(&id);
    }

    /// Number of live contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    /// True when no request is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    fn open(store: &Arc<ContextStore>, path: &str) -> Arc<RequestContext> {
        store.open(Request::new(Method::Get, path), RequestLimits::default())
    }

    #[test]
    fn open_registers_and_release_removes() {
        let store = Arc::new(ContextStore::new());
        let a = open(&store, "/a");
        let b = open(&store, "/b");

        assert_eq!(store.len(), 2);
        assert!(store.contains(a.id()));
        assert_eq!(store.get(b.id()).map(|c| c.path()), Some("/b".to_owned()));

        assert!(store.release(a.id()));
        assert!(!store.release(a.id()));
        assert!(a.is_released());
        assert!(!b.is_released());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn context_release_goes_through_store() {
        let store = Arc::new(ContextStore::new());
        let ctx = open(&store, "/x");

        assert!(ctx.release());
        assert!(store.is_empty());
        assert!(!store.release(ctx.id()));
    }

    #[test]
    fn frames_do_not_keep_contexts_alive() {
        let store = Arc::new(ContextStore::new());
        let ctx = open(&store, "/weak");
        let weak = Arc::downgrade(&ctx);
        drop(ctx);

        assert!(weak.upgrade().is_some());
        store.release(weak.upgrade().map(|c| c.id()).unwrap());
        assert!(weak.upgrade().is_none());
    }
}
