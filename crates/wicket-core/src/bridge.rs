//! The adapter bridge: one host middleware stage that runs handler chains.
//!
//! Per request the bridge opens a [`RequestContext`], enters its propagation
//! scope, asks the [`RouteLookup`] for a chain and either resolves the
//! request or lets it fall through to the rest of the host pipeline.
//!
//! ```text
//! Created ─> ContextActive ─> Dispatched ─> Resolved ─┐
//!                  │                                   ├─> Released
//!                  └──────────> Fallthrough ───────────┘
//! ```
//!
//! Fallthrough hands the original request back to the host untouched; the
//! host's `next()` runs exactly once. A resolved request never reaches the
//! host's own routes.
//!
//! # Example
//!
//! ```ignore
//! let bridge = AdapterBridge::new(router, BridgeConfig::new().raise_404(false));
//! let app = App::builder()
//!     .middleware(bridge)
//!     .get("/legacy", legacy_endpoint)
//!     .build();
//! ```

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::context::{RequestContext, RequestLimits, Stage};
use crate::error::{HandlerError, HttpError, InternalFault};
use crate::handler::{ChainExecutor, Handler, HandlerChain};
use crate::logging::{FaultReport, FaultReporter, TracingReporter};
use crate::middleware::{BoxFuture, ControlFlow, Endpoint, Middleware};
use crate::propagation::{self, ContextGuard};
use crate::reply::Reply;
use crate::request::{Method, Request};
use crate::resolver::ResponseResolver;
use crate::response::{IntoResponse, Response};
use crate::store::ContextStore;

/// Finds the handler chain for a request.
///
/// Implementations may record route parameters on `ctx` as a side effect.
/// Returning `None`, or an empty chain, means "no match".
pub trait RouteLookup: Send + Sync {
    /// Look up `method` and `path`.
    fn lookup(&self, method: Method, path: &str, ctx: &RequestContext) -> Option<HandlerChain>;
}

impl<F> RouteLookup for F
where
    F: Fn(Method, &str, &RequestContext) -> Option<HandlerChain> + Send + Sync,
{
    fn lookup(&self, method: Method, path: &str, ctx: &RequestContext) -> Option<HandlerChain> {
        self(method, path, ctx)
    }
}

/// Bridge configuration.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Answer unmatched requests with 404 instead of falling through.
    pub raise_404: bool,
    /// Chain run when nothing matched. Takes precedence over `raise_404`.
    pub on_not_found: Option<HandlerChain>,
    /// Limits applied to every request context.
    pub limits: RequestLimits,
    /// Headers added to every resolved response, before handler-set ones.
    pub default_headers: Vec<(String, Vec<u8>)>,
    /// Operator channel for internal faults.
    pub reporter: Arc<dyn FaultReporter>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            raise_404: false,
            on_not_found: None,
            limits: RequestLimits::default(),
            default_headers: Vec::new(),
            reporter: Arc::new(TracingReporter),
        }
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("raise_404", &self.raise_404)
            .field("on_not_found", &self.on_not_found)
            .field("limits", &self.limits)
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

impl BridgeConfig {
    /// Configuration with defaults: fall through, 1MB bodies, no extra headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether unmatched requests get a 404.
    #[must_use]
    pub fn raise_404(mut self, raise: bool) -> Self {
        self.raise_404 = raise;
        self
    }

    /// Sets the chain run when nothing matched.
    #[must_use]
    pub fn on_not_found(mut self, chain: HandlerChain) -> Self {
        self.on_not_found = Some(chain);
        self
    }

    /// Sets the request limits.
    #[must_use]
    pub fn request_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the maximum request body size in bytes.
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.limits = RequestLimits::new(size);
        self
    }

    /// Adds a default response header.
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Sets the fault reporter.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn FaultReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Applies loaded settings on top of this configuration.
    #[must_use]
    pub fn settings(mut self, settings: BridgeSettings) -> Self {
        if let Some(raise) = settings.raise_404 {
            self.raise_404 = raise;
        }
        if let Some(size) = settings.max_body_size {
            self.limits = RequestLimits::new(size);
        }
        for (name, value) in settings.default_headers {
            self.default_headers.push((name, value.into_bytes()));
        }
        self
    }
}

/// The data part of [`BridgeConfig`], loadable from a config file.
///
/// Fields left out of the file keep whatever the [`BridgeConfig`] already
/// holds.
///
/// ```
/// use wicket_core::BridgeSettings;
///
/// let settings = BridgeSettings::from_json(r#"{"raise_404": true}"#).unwrap();
/// assert_eq!(settings.raise_404, Some(true));
/// assert_eq!(settings.max_body_size, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSettings {
    /// See [`BridgeConfig::raise_404`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raise_404: Option<bool>,
    /// Maximum request body size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_body_size: Option<usize>,
    /// Default response headers.
    pub default_headers: BTreeMap<String, String>,
}

impl BridgeSettings {
    /// Parse settings from JSON. Missing fields stay unset.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<BridgeSettings> for BridgeConfig {
    fn from(settings: BridgeSettings) -> Self {
        Self::new().settings(settings)
    }
}

/// What the bridge did with a request.
#[derive(Debug)]
pub enum BridgeOutcome {
    /// A response was produced; the host must not run its own routes.
    Resolved(Response),
    /// Nothing matched; the host pipeline continues with the request.
    Fallthrough,
}

impl BridgeOutcome {
    /// True for [`BridgeOutcome::Fallthrough`].
    #[must_use]
    pub fn is_fallthrough(&self) -> bool {
        matches!(self, Self::Fallthrough)
    }

    /// The response, if one was produced.
    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Resolved(response) => Some(response),
            Self::Fallthrough => None,
        }
    }
}

/// Runs handler chains as a stage of the host pipeline.
#[derive(Clone)]
pub struct AdapterBridge {
    lookup: Arc<dyn RouteLookup>,
    config: BridgeConfig,
    store: Arc<ContextStore>,
    resolver: ResponseResolver,
}

impl fmt::Debug for AdapterBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterBridge")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AdapterBridge {
    /// Bridge over `lookup` with its own context store.
    pub fn new(lookup: impl RouteLookup + 'static, config: BridgeConfig) -> Self {
        Self::from_arc(Arc::new(lookup), config)
    }

    /// Bridge over a shared lookup.
    #[must_use]
    pub fn from_arc(lookup: Arc<dyn RouteLookup>, config: BridgeConfig) -> Self {
        let resolver = ResponseResolver::new()
            .with_default_headers(config.default_headers.clone())
            .with_reporter(Arc::clone(&config.reporter));
        Self {
            lookup,
            config,
            store: Arc::new(ContextStore::new()),
            resolver,
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Contexts of requests currently in flight.
    #[must_use]
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// The resolver shared by every request.
    #[must_use]
    pub fn resolver(&self) -> &ResponseResolver {
        &self.resolver
    }

    /// Run one request through the bridge.
    ///
    /// On [`BridgeOutcome::Fallthrough`] `req` holds the original request
    /// again. Either way the context has been released when this returns,
    /// and it is also released if the returned future is dropped early.
    pub async fn dispatch(&self, req: &mut Request) -> BridgeOutcome {
        let placeholder = req.placeholder();
        let ctx = self.store.open(std::mem::replace(req, placeholder), self.config.limits);
        let guard = ContextGuard::new(Arc::clone(&ctx));
        ctx.advance(Stage::ContextActive);

        let scoped = propagation::with_context(&ctx, self.run(&ctx));
        let outcome = match AssertUnwindSafe(scoped).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let fault = InternalFault::from_panic(payload);
                BridgeOutcome::Resolved(self.resolver.report(&FaultReport::new(&ctx, &fault)))
            }
        };

        if outcome.is_fallthrough() {
            *req = ctx.take_request();
        }
        drop(guard);
        outcome
    }

    async fn run(&self, ctx: &Arc<RequestContext>) -> BridgeOutcome {
        let (method, path, url) = ctx.with_request(|r| (r.method(), r.path().to_owned(), r.url()));
        let chain = self.lookup.lookup(method, &path, ctx);

        let executed =
            ChainExecutor::run_or_fallback(chain.as_ref(), self.config.on_not_found.as_ref(), ctx)
                .await;

        let outcome = match executed {
            Some(result) => BridgeOutcome::Resolved(self.resolve(result, ctx)),
            None => {
                tracing::debug!(request_id = %ctx.id(), "404 Not found ({method}){url}");
                if self.config.raise_404 {
                    BridgeOutcome::Resolved(self.resolve(Err(HttpError::not_found().into()), ctx))
                } else {
                    ctx.advance(Stage::Fallthrough);
                    BridgeOutcome::Fallthrough
                }
            }
        };

        propagation::clear();
        outcome
    }

    fn resolve(&self, result: Result<Reply, HandlerError>, ctx: &RequestContext) -> Response {
        match self.resolver.resolve(result, ctx) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(request_id = %ctx.id(), error = %err, "request resolved twice");
                self.resolver.generic_failure()
            }
        }
    }

    /// Wrap a single handler as a host endpoint.
    ///
    /// The endpoint shares this bridge's store, limits, default headers and
    /// reporter, but ignores the route lookup: it always runs `handler`.
    pub fn wrap<H: Handler>(&self, handler: H) -> WrappedEndpoint {
        self.wrap_chain(HandlerChain::single(handler))
    }

    /// Wrap a chain as a host endpoint. See [`AdapterBridge::wrap`].
    #[must_use]
    pub fn wrap_chain(&self, chain: HandlerChain) -> WrappedEndpoint {
        let fixed = move |_: Method, _: &str, _: &RequestContext| Some(chain.clone());
        WrappedEndpoint {
            bridge: Self {
                lookup: Arc::new(fixed),
                config: self.config.clone().raise_404(true),
                store: Arc::clone(&self.store),
                resolver: self.resolver.clone(),
            },
        }
    }
}

impl Middleware for AdapterBridge {
    fn before<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, ControlFlow> {
        Box::pin(async move {
            match self.dispatch(req).await {
                BridgeOutcome::Resolved(response) => ControlFlow::Break(response),
                BridgeOutcome::Fallthrough => ControlFlow::Continue,
            }
        })
    }

    fn name(&self) -> &'static str {
        "AdapterBridge"
    }
}

/// A handler chain exposed as a host [`Endpoint`]. Built by
/// [`AdapterBridge::wrap`].
#[derive(Debug, Clone)]
pub struct WrappedEndpoint {
    bridge: AdapterBridge,
}

impl Endpoint for WrappedEndpoint {
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            self.bridge
                .dispatch(req)
                .await
                .into_response()
                .unwrap_or_else(|| HttpError::not_found().into_response())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composables::{use_response, use_route_params};
    use crate::context::RouteParams;
    use crate::response::{ResponseBody, StatusCode};
    use crate::testing::CapturingReporter;
    use std::future::Future;
    use std::task::{Context, Poll};

    fn routes(method: Method, path: &str, ctx: &RequestContext) -> Option<HandlerChain> {
        match (method, path) {
            (Method::Get, "/hello") => Some(HandlerChain::single(|| async { "Hello World" })),
            (Method::Get, p) if p.starts_with("/users/") => {
                ctx.set_route_params(RouteParams::from_pairs([("id", &p["/users/".len()..])]));
                Some(HandlerChain::single(|| async {
                    let id = use_route_params()?.get("id").unwrap_or_default().to_owned();
                    Ok::<_, HandlerError>(format!("user {id}"))
                }))
            }
            (Method::Get, "/pending") => Some(HandlerChain::single(|| std::future::pending::<()>())),
            (Method::Get, "/boom") => Some(HandlerChain::single(|| async {
                Err::<Reply, _>(anyhow::anyhow!("database offline"))
            })),
            _ => None,
        }
    }

    fn body(response: &Response) -> &str {
        std::str::from_utf8(response.body_ref().as_bytes()).unwrap()
    }

    #[test]
    fn matched_request_resolves_and_releases() {
        let bridge = AdapterBridge::new(routes, BridgeConfig::new());
        let mut req = Request::new(Method::Get, "/hello");

        let outcome = futures_executor::block_on(bridge.dispatch(&mut req));
        let response = outcome.into_response().unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), "Hello World");
        assert!(bridge.store().is_empty());
    }

    #[test]
    fn route_params_reach_the_handler() {
        let bridge = AdapterBridge::new(routes, BridgeConfig::new());
        let mut req = Request::new(Method::Get, "/users/42");
        let response = futures_executor::block_on(bridge.dispatch(&mut req))
            .into_response()
            .unwrap();
        assert_eq!(body(&response), "user 42");
    }

    #[test]
    fn unmatched_request_falls_through_with_request_intact() {
        let bridge = AdapterBridge::new(routes, BridgeConfig::new());
        let mut req = Request::from_target(Method::Post, "/express?x=1");
        req.headers_mut().insert("x-origin", b"client".to_vec());
        req.set_body(crate::request::Body::Bytes(b"payload".to_vec()));

        let outcome = futures_executor::block_on(bridge.dispatch(&mut req));

        assert!(outcome.is_fallthrough());
        assert_eq!(req.path(), "/express");
        assert_eq!(req.query(), Some("x=1"));
        assert_eq!(req.headers().get_str("x-origin"), Some("client"));
        assert_eq!(req.body().len(), 7);
        assert!(bridge.store().is_empty());
    }

    #[test]
    fn raise_404_answers_unmatched_requests() {
        let bridge = AdapterBridge::new(routes, BridgeConfig::new().raise_404(true));
        let mut req = Request::new(Method::Get, "/nowhere");
        let response = futures_executor::block_on(bridge.dispatch(&mut req))
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(&response), r#"{"status":404,"message":"Not Found"}"#);
    }

    #[test]
    fn on_not_found_runs_before_raise_404() {
        let config = BridgeConfig::new()
            .raise_404(true)
            .on_not_found(HandlerChain::single(|| async {
                use_response()?.set_status(StatusCode::NOT_FOUND);
                Ok::<_, HandlerError>("custom not found")
            }));
        let bridge = AdapterBridge::new(routes, config);
        let mut req = Request::new(Method::Get, "/nowhere");
        let response = futures_executor::block_on(bridge.dispatch(&mut req))
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(&response), "custom not found");
    }

    #[test]
    fn internal_faults_are_reported_not_leaked() {
        let reporter = Arc::new(CapturingReporter::new());
        let bridge = AdapterBridge::new(routes, BridgeConfig::new().reporter(reporter.clone()));
        let mut req = Request::new(Method::Get, "/boom");
        let response = futures_executor::block_on(bridge.dispatch(&mut req))
            .into_response()
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body(&response).contains("database"));
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].path, "/boom");
        assert_eq!(reports[0].message, "database offline");
    }

    #[test]
    fn panicking_lookup_becomes_500() {
        let reporter = Arc::new(CapturingReporter::new());
        let lookup = |_: Method, _: &str, _: &RequestContext| -> Option<HandlerChain> {
            panic!("router corrupted")
        };
        let bridge = AdapterBridge::new(lookup, BridgeConfig::new().reporter(reporter.clone()));
        let mut req = Request::new(Method::Get, "/any");

        let response = futures_executor::block_on(bridge.dispatch(&mut req))
            .into_response()
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reporter.reports()[0].message.contains("router corrupted"));
        assert!(bridge.store().is_empty());
    }

    struct PanickingReporter;

    impl FaultReporter for PanickingReporter {
        fn report(&self, _report: &FaultReport) {
            panic!("reporter down");
        }
    }

    #[test]
    fn panicking_reporter_still_yields_500() {
        let bridge = AdapterBridge::new(
            routes,
            BridgeConfig::new()
                .reporter(Arc::new(PanickingReporter))
                .default_header("x-served-by", "wicket"),
        );

        let mut req = Request::new(Method::Get, "/boom");
        let response = futures_executor::block_on(bridge.dispatch(&mut req))
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.header_value("x-served-by"), Some(&b"wicket"[..]));
        assert!(!body(&response).contains("database offline"));
        assert!(bridge.store().is_empty());

        let lookup = |_: Method, _: &str, _: &RequestContext| -> Option<HandlerChain> {
            panic!("router corrupted")
        };
        let bridge = AdapterBridge::new(lookup, BridgeConfig::new().reporter(Arc::new(PanickingReporter)));
        let mut req = Request::new(Method::Get, "/any");
        let response = futures_executor::block_on(bridge.dispatch(&mut req))
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(bridge.store().is_empty());
    }

    #[test]
    fn dropped_request_future_releases_context() {
        let bridge = AdapterBridge::new(routes, BridgeConfig::new());
        let mut req = Request::new(Method::Get, "/pending");

        {
            let mut fut = Box::pin(bridge.dispatch(&mut req));
            let waker = futures_util::task::noop_waker();
            let mut cx = Context::from_waker(&waker);
            let polled: Poll<BridgeOutcome> = fut.as_mut().poll(&mut cx);
            assert!(polled.is_pending());
            assert_eq!(bridge.store().len(), 1);
        }

        assert!(bridge.store().is_empty());
    }

    #[test]
    fn default_headers_apply_to_resolved_responses() {
        let bridge = AdapterBridge::new(
            routes,
            BridgeConfig::new().default_header("x-powered-by", "wicket"),
        );
        let mut req = Request::new(Method::Get, "/hello");
        let response = futures_executor::block_on(bridge.dispatch(&mut req))
            .into_response()
            .unwrap();
        assert_eq!(response.header_value("x-powered-by"), Some(&b"wicket"[..]));
    }

    #[test]
    fn wrapped_handler_is_a_host_endpoint() {
        let bridge = AdapterBridge::new(routes, BridgeConfig::new());
        let endpoint = bridge.wrap(|| async { Reply::Bytes(vec![1, 2, 3]) });
        let mut req = Request::new(Method::Get, "/anything");

        let response = futures_executor::block_on(endpoint.call(&mut req));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_ref(), &ResponseBody::Bytes(vec![1, 2, 3]));
        assert!(bridge.store().is_empty());
    }

    #[test]
    fn wrapped_empty_chain_is_404() {
        let bridge = AdapterBridge::new(routes, BridgeConfig::new());
        let endpoint = bridge.wrap_chain(HandlerChain::new());
        let mut req = Request::new(Method::Get, "/anything");
        let response = futures_executor::block_on(endpoint.call(&mut req));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn settings_load_from_json() {
        let settings = BridgeSettings::from_json(
            r#"{"raise_404": true, "max_body_size": 64, "default_headers": {"x-a": "1"}}"#,
        )
        .unwrap();
        let config = BridgeConfig::from(settings);
        assert!(config.raise_404);
        assert_eq!(config.limits.max_body_size(), 64);
        assert_eq!(config.default_headers, vec![("x-a".to_owned(), b"1".to_vec())]);

        assert!(BridgeSettings::from_json(r#"{"raise404": true}"#).is_err());
        assert_eq!(BridgeSettings::from_json("{}").unwrap(), BridgeSettings::default());
    }
}
