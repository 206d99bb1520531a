//! Implicit request-context propagation.
//!
//! The active context is carried in a task-local frame, so it follows the
//! future it was installed on across every `.await`, on any runtime flavor,
//! and never leaks into a sibling future that happens to be polled by the
//! same thread.
//!
//! ```text
//! with_context(ctx, fut) ── installs ──> Frame { weak ctx, active }
//!        │                                   │
//!        └── fut.await ── current() ─────────┘  (Ok while active and live)
//!                        clear()  ── deactivates frame, releases ctx
//! ```
//!
//! Boundaries that start a fresh task (`tokio::spawn`, callbacks invoked by
//! other libraries) do not inherit task locals. Capture a [`SavedFrame`] with
//! [`save`] before crossing and re-enter it with [`SavedFrame::restore`], or
//! use [`spawn`] which does both.

use std::cell::Cell;
use std::future::Future;
use std::sync::{Arc, Weak};

use crate::context::{RequestContext, RequestId};
use crate::error::ContextError;

tokio::task_local! {
    static FRAME: Frame;
}

struct Frame {
    id: RequestId,
    context: Weak<RequestContext>,
    active: Cell<bool>,
}

impl Frame {
    fn new(id: RequestId, context: Weak<RequestContext>) -> Self {
        Self {
            id,
            context,
            active: Cell::new(true),
        }
    }

    fn resolve(&self) -> Result<Arc<RequestContext>, ContextError> {
        if !self.active.get() {
            return Err(ContextError::NoActiveContext);
        }
        match self.context.upgrade() {
            Some(ctx) if !ctx.is_released() => Ok(ctx),
            _ => Err(ContextError::Released(self.id)),
        }
    }
}

/// Run `fut` with `ctx` as the current context.
///
/// The frame only holds a weak reference; the [`crate::ContextStore`] decides
/// how long the context lives.
pub fn with_context<F>(ctx: &Arc<RequestContext>, fut: F) -> impl Future<Output = F::Output> + use<F>
where
    F: Future,
{
    FRAME.scope(Frame::new(ctx.id(), Arc::downgrade(ctx)), fut)
}

/// Synchronous counterpart of [`with_context`].
pub fn with_context_sync<R>(ctx: &Arc<RequestContext>, f: impl FnOnce() -> R) -> R {
    FRAME.sync_scope(Frame::new(ctx.id(), Arc::downgrade(ctx)), f)
}

/// The active request context.
///
/// # Errors
///
/// [`ContextError::NoActiveContext`] outside any scope or after [`clear`];
/// [`ContextError::Released`] if the frame outlived its context.
pub fn current() -> Result<Arc<RequestContext>, ContextError> {
    FRAME
        .try_with(Frame::resolve)
        .unwrap_or(Err(ContextError::NoActiveContext))
}

/// [`current`], discarding the reason.
#[must_use]
pub fn try_current() -> Option<Arc<RequestContext>> {
    current().ok()
}

/// True when [`current`] would succeed.
#[must_use]
pub fn is_active() -> bool {
    current().is_ok()
}

/// Tear down the active frame and release its context.
///
/// Returns true for the call that released the context. A second call, or a
/// call outside any scope, is a no-op returning false.
pub fn clear() -> bool {
    FRAME
        .try_with(|frame| {
            if !frame.active.replace(false) {
                return false;
            }
            match frame.context.upgrade() {
                Some(ctx) => ctx.release(),
                None => false,
            }
        })
        .unwrap_or(false)
}

/// A frame captured with [`save`], to be re-entered after an async boundary
/// that drops task locals.
#[derive(Debug, Clone)]
pub struct SavedFrame {
    id: RequestId,
    context: Weak<RequestContext>,
}

impl SavedFrame {
    /// Request the frame belongs to.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// True while the captured context has not been released.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.context
            .upgrade()
            .is_some_and(|ctx| !ctx.is_released())
    }

    /// Run `fut` inside the captured frame.
    ///
    /// A released context is not revived: [`current`] inside the restored
    /// frame reports [`ContextError::Released`].
    pub fn restore<F>(&self, fut: F) -> impl Future<Output = F::Output> + use<F>
    where
        F: Future,
    {
        FRAME.scope(Frame::new(self.id, self.context.clone()), fut)
    }

    /// Run a callback inside the captured frame.
    pub fn restore_sync<R>(&self, f: impl FnOnce() -> R) -> R {
        FRAME.sync_scope(Frame::new(self.id, self.context.clone()), f)
    }
}

/// Capture the active frame.
///
/// # Errors
///
/// Fails like [`current`] when no context is active.
pub fn save() -> Result<SavedFrame, ContextError> {
    let ctx = current()?;
    Ok(SavedFrame {
        id: ctx.id(),
        context: Arc::downgrade(&ctx),
    })
}

/// Spawn `fut` on the tokio runtime with the current frame restored.
///
/// # Errors
///
/// Fails like [`current`] when no context is active.
///
/// # Panics
///
/// Panics if called outside a tokio runtime, as `tokio::spawn` does.
pub fn spawn<F>(fut: F) -> Result<tokio::task::JoinHandle<F::Output>, ContextError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let frame = save()?;
    Ok(tokio::spawn(frame.restore(fut)))
}

/// Releases its context when dropped.
///
/// Covers the paths where the request future is dropped before [`clear`]
/// runs, such as a client disconnect aborting the connection task.
#[derive(Debug)]
pub struct ContextGuard {
    ctx: Arc<RequestContext>,
}

impl ContextGuard {
    /// Guard `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<RequestContext>) -> Self {
        Self { ctx }
    }

    /// The guarded context.
    #[must_use]
    pub fn context(&self) -> &Arc<RequestContext> {
        &self.ctx
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if self.ctx.release() {
            tracing::debug!(request_id = %self.ctx.id(), "context released before completion");
        }
    }
}
