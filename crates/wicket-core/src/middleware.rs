//! Host pipeline: middleware and endpoints.
//!
//! This is the framework the bridge plugs into. It knows nothing about
//! request contexts; the bridge is just one more [`Middleware`].
//!
//! # Ordering Semantics
//!
//! 1. `before` hooks run in **registration order**
//! 2. The endpoint runs if no `before` hook returned [`ControlFlow::Break`]
//! 3. `after` hooks run in **reverse order**, only for middleware whose
//!    `before` ran
//!
//! ```text
//! Request → MW1.before → MW2.before → MW3.before → Endpoint
//!                                                     ↓
//! Response ← MW1.after ← MW2.after ← MW3.after ← Response
//! ```
//!
//! `ControlFlow::Continue` plays the role of a `next()` callback: returning
//! it hands the request to the rest of the pipeline exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::Response;

/// A boxed future for async middleware operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Control flow for middleware `before` hooks.
#[derive(Debug)]
pub enum ControlFlow {
    /// Continue processing - call the next middleware or endpoint.
    Continue,
    /// Short-circuit with this response.
    ///
    /// Subsequent `before` hooks and the endpoint will NOT run.
    /// `after` hooks for middleware that already ran their `before` WILL run.
    Break(Response),
}

impl ControlFlow {
    /// Returns `true` if this is `Continue`.
    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// Returns `true` if this is `Break`.
    #[must_use]
    pub fn is_break(&self) -> bool {
        matches!(self, Self::Break(_))
    }
}

/// The core middleware trait.
///
/// Both hooks default to no-ops, so implement only what you need.
pub trait Middleware: Send + Sync {
    /// Called before the endpoint executes.
    fn before<'a>(&'a self, _req: &'a mut Request) -> BoxFuture<'a, ControlFlow> {
        Box::pin(async { ControlFlow::Continue })
    }

    /// Called after the endpoint (or a short-circuiting `before`) produced a response.
    fn after<'a>(&'a self, _req: &'a Request, response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move { response })
    }

    /// Returns the middleware name for debugging and logging.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Something that turns a host request into a response.
pub trait Endpoint: Send + Sync {
    /// Process a request and return a response.
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Response>;
}

/// Any `Fn(&mut Request) -> impl Future<Output = Response>` is an endpoint.
impl<F, Fut> Endpoint for F
where
    F: Fn(&mut Request) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Response> {
        Box::pin(self(req))
    }
}

/// A stack of middleware that wraps an endpoint.
#[derive(Default, Clone)]
pub struct MiddlewareStack {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    /// Creates an empty middleware stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Adds middleware to the end of the stack.
    pub fn push<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middleware.push(Arc::new(middleware));
    }

    /// Adds middleware wrapped in an Arc.
    pub fn push_arc(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    /// Returns the number of middleware in the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Returns `true` if the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Executes the middleware stack around `endpoint`.
    ///
    /// If middleware N breaks, middleware N+1.. and the endpoint do not run,
    /// while `after` hooks of 0..N still run in reverse.
    pub async fn execute<E: Endpoint + ?Sized>(&self, endpoint: &E, req: &mut Request) -> Response {
        let mut ran_before_count = 0;

        for mw in &self.middleware {
            match mw.before(req).await {
                ControlFlow::Continue => ran_before_count += 1,
                ControlFlow::Break(response) => {
                    tracing::trace!(middleware = mw.name(), "middleware short-circuited");
                    return self.run_after_hooks(req, response, ran_before_count).await;
                }
            }
        }

        let response = endpoint.call(req).await;
        self.run_after_hooks(req, response, ran_before_count).await
    }

    async fn run_after_hooks(&self, req: &Request, mut response: Response, count: usize) -> Response {
        for mw in self.middleware[..count].iter().rev() {
            response = mw.after(req, response).await;
        }
        response
    }
}

/// Middleware that adds a custom header to all responses.
#[derive(Debug, Clone)]
pub struct AddResponseHeader {
    name: String,
    value: Vec<u8>,
}

impl AddResponseHeader {
    /// Creates a new middleware that adds the specified header to responses.
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Middleware for AddResponseHeader {
    fn after<'a>(&'a self, _req: &'a Request, response: Response) -> BoxFuture<'a, Response> {
        let name = self.name.clone();
        let value = self.value.clone();
        Box::pin(async move { response.header(name, value) })
    }

    fn name(&self) -> &'static str {
        "AddResponseHeader"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use crate::response::{IntoResponse, StatusCode};
    use parking_lot::Mutex;

    struct OrderTrackingMiddleware {
        id: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl OrderTrackingMiddleware {
        fn new(id: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self { id, log }
        }
    }

    impl Middleware for OrderTrackingMiddleware {
        fn before<'a>(&'a self, _req: &'a mut Request) -> BoxFuture<'a, ControlFlow> {
            self.log.lock().push(format!("{}.before", self.id));
            Box::pin(async { ControlFlow::Continue })
        }

        fn after<'a>(&'a self, _req: &'a Request, response: Response) -> BoxFuture<'a, Response> {
            self.log.lock().push(format!("{}.after", self.id));
            Box::pin(async move { response })
        }
    }

    struct BreakingMiddleware;

    impl Middleware for BreakingMiddleware {
        fn before<'a>(&'a self, _req: &'a mut Request) -> BoxFuture<'a, ControlFlow> {
            Box::pin(async { ControlFlow::Break(Response::with_status(StatusCode::FORBIDDEN)) })
        }
    }

    fn logging_endpoint(log: Arc<Mutex<Vec<String>>>) -> impl Endpoint {
        move |_req: &mut Request| {
            log.lock().push("endpoint".into());
            async { "done".into_response() }
        }
    }

    #[test]
    fn onion_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = MiddlewareStack::new();
        stack.push(OrderTrackingMiddleware::new("mw1", Arc::clone(&log)));
        stack.push(OrderTrackingMiddleware::new("mw2", Arc::clone(&log)));

        let endpoint = logging_endpoint(Arc::clone(&log));
        let mut req = Request::new(Method::Get, "/");
        let response = futures_executor::block_on(stack.execute(&endpoint, &mut req));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock(),
            vec!["mw1.before", "mw2.before", "endpoint", "mw2.after", "mw1.after"]
        );
    }

    #[test]
    fn break_skips_rest_but_runs_earlier_after_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = MiddlewareStack::new();
        stack.push(OrderTrackingMiddleware::new("mw1", Arc::clone(&log)));
        stack.push(BreakingMiddleware);
        stack.push(OrderTrackingMiddleware::new("mw3", Arc::clone(&log)));
        assert_eq!(stack.len(), 3);

        let endpoint = logging_endpoint(Arc::clone(&log));
        let mut req = Request::new(Method::Get, "/");
        let response = futures_executor::block_on(stack.execute(&endpoint, &mut req));

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(*log.lock(), vec!["mw1.before", "mw1.after"]);
    }

    #[test]
    fn add_response_header_applies_after() {
        let mut stack = MiddlewareStack::new();
        stack.push(AddResponseHeader::new("x-served-by", b"host".to_vec()));
        let endpoint = |_req: &mut Request| async { Response::ok() };
        let mut req = Request::new(Method::Get, "/");
        let response = futures_executor::block_on(stack.execute(&endpoint, &mut req));
        assert_eq!(response.header_value("x-served-by"), Some(&b"host"[..]));
    }

    #[test]
    fn control_flow_predicates() {
        assert!(ControlFlow::Continue.is_continue());
        assert!(ControlFlow::Break(Response::ok()).is_break());
    }
}
