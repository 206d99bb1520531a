//! Handlers and the ordered chain executor.
//!
//! A handler takes no arguments: it reads the request through the
//! composables in [`crate::composables`], which resolve the current context
//! from the propagation scope.
//!
//! # Chain semantics
//!
//! - Handlers run strictly in registration order; each may suspend.
//! - The first handler that returns something other than [`Reply::Empty`]
//!   ends the chain with that reply. Later handlers never run.
//! - The first handler that fails ends the chain with its error. Nothing is
//!   retried.
//! - A panic inside a handler becomes an internal fault.

use futures_util::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::context::{RequestContext, Stage};
use crate::error::{HandlerError, InternalFault};
use crate::middleware::BoxFuture;
use crate::propagation;
use crate::reply::{IntoReply, Reply};

/// A request handler.
///
/// Implemented for every `Fn() -> impl Future` whose output converts into a
/// reply, so plain async closures work:
///
/// ```
/// use wicket_core::HandlerChain;
///
/// let chain = HandlerChain::new()
///     .then(|| async { None::<String> })
///     .then(|| async { "Hello World" });
/// assert_eq!(chain.len(), 2);
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Start the handler.
    fn call(&self) -> BoxFuture<'static, Result<Reply, HandlerError>>;

    /// Name used in trace logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F, Fut> Handler for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoReply,
{
    fn call(&self) -> BoxFuture<'static, Result<Reply, HandlerError>> {
        let fut = self();
        Box::pin(async move { fut.await.into_reply() })
    }
}

/// Ordered, immutable list of handlers. Cloning is cheap.
#[derive(Clone)]
pub struct HandlerChain {
    handlers: Arc<[Arc<dyn Handler>]>,
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self {
            handlers: Arc::from(Vec::new()),
        }
    }
}

impl HandlerChain {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain of one handler.
    pub fn single<H: Handler>(handler: H) -> Self {
        Self::from_handlers(vec![Arc::new(handler) as Arc<dyn Handler>])
    }

    /// Chain from already shared handlers.
    #[must_use]
    pub fn from_handlers(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            handlers: Arc::from(handlers),
        }
    }

    /// Append a handler.
    #[must_use]
    pub fn then<H: Handler>(self, handler: H) -> Self {
        let mut handlers = self.handlers.to_vec();
        handlers.push(Arc::new(handler));
        Self::from_handlers(handlers)
    }

    /// Number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True for an empty chain, which counts as "no match".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Iterate in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers.iter()
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}

/// Runs handler chains inside a request's propagation scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainExecutor;

impl ChainExecutor {
    /// Run `chain` for `ctx`.
    ///
    /// Enters the propagation scope for `ctx` unless it is already current.
    pub async fn run(chain: &HandlerChain, ctx: &Arc<RequestContext>) -> Result<Reply, HandlerError> {
        ctx.advance(Stage::Dispatched);
        let in_scope = propagation::try_current().is_some_and(|cur| Arc::ptr_eq(&cur, ctx));
        if in_scope {
            Self::drive(chain, ctx).await
        } else {
            propagation::with_context(ctx, Self::drive(chain, ctx)).await
        }
    }

    /// Run `chain`, or `fallback` when `chain` is missing or empty.
    ///
    /// Returns `None` when neither has handlers; the caller decides what that
    /// means.
    pub async fn run_or_fallback(
        chain: Option<&HandlerChain>,
        fallback: Option<&HandlerChain>,
        ctx: &Arc<RequestContext>,
    ) -> Option<Result<Reply, HandlerError>> {
        let selected = chain
            .filter(|c| !c.is_empty())
            .or_else(|| fallback.filter(|c| !c.is_empty()))?;
        Some(Self::run(selected, ctx).await)
    }

    async fn drive(chain: &HandlerChain, ctx: &RequestContext) -> Result<Reply, HandlerError> {
        for (index, handler) in chain.iter().enumerate() {
            let outcome = AssertUnwindSafe(async { handler.call().await })
                .catch_unwind()
                .await;
            let reply = match outcome {
                Ok(result) => result?,
                Err(payload) => return Err(InternalFault::from_panic(payload).into()),
            };
            if !reply.is_empty() {
                tracing::trace!(
                    request_id = %ctx.id(),
                    index,
                    handler = handler.name(),
                    "handler produced a reply"
                );
                return Ok(reply);
            }
        }
        Ok(Reply::Empty)
    }
}
