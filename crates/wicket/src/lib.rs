//! Run context-propagating handler chains inside a middleware-based host.
//!
//! Handlers are zero-argument async functions. They read the request through
//! composables such as [`use_request`] and [`use_route_params`] instead of
//! parameters, and return anything that converts into a [`Reply`]. wicket
//! installs itself as one middleware stage of the host [`App`]: requests it
//! has a route for are answered there, everything else falls through to the
//! host's own routes.
//!
//! # Quick Start
//!
//! ```ignore
//! use wicket::prelude::*;
//!
//! let wicket = Wicket::builder()
//!     .get("/hello", || async { "Hello World" })
//!     .get("/users/:id", || async {
//!         let params = use_route_params()?;
//!         Ok::<_, HandlerError>(json!({ "id": params.get("id") }))
//!     })
//!     .build()?;
//!
//! let app = wicket
//!     .attach(App::builder())
//!     .get("/legacy", |_req: &mut Request| async { "from host".into_response() })
//!     .build();
//! ```
//!
//! # Crate Structure
//!
//! - [`wicket_core`]: context store, propagation, chain executor, resolver,
//!   bridge and the host pipeline
//! - [`wicket_router`]: trie-based route lookup

#![forbid(unsafe_code)]

pub use wicket_core as core;
pub use wicket_router as router;

pub use wicket_core::{
    AdapterBridge, App, AppBuilder, BridgeConfig, BridgeOutcome, BridgeSettings, ContextError,
    ContextStore, Endpoint, FaultReport, FaultReporter, Handler, HandlerChain, HandlerError,
    HttpError, IntoReply, IntoResponse, Json, Method, Middleware, Reply, Request, RequestContext,
    RequestInfo, RequestLimits, Response, ResponseHandle, RouteParams, StatusCode,
    TracingReporter, WrappedEndpoint, use_body, use_context, use_headers, use_request,
    use_response, use_route_params,
};
pub use wicket_router::{HandlerRouter, MethodFilter, RouteError};

use std::sync::Arc;

/// Builder for [`Wicket`].
///
/// Registration errors are collected and reported by [`WicketBuilder::build`],
/// so calls can be chained.
#[derive(Default)]
pub struct WicketBuilder {
    router: HandlerRouter,
    config: BridgeConfig,
    error: Option<RouteError>,
}

impl WicketBuilder {
    /// Empty builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain for `method` (or every method) at `path`.
    #[must_use]
    pub fn route(mut self, method: impl Into<MethodFilter>, path: &str, chain: HandlerChain) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.router.add(method, path, chain) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Register a GET handler.
    #[must_use]
    pub fn get<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(Method::Get, path, HandlerChain::single(handler))
    }

    /// Register a POST handler.
    #[must_use]
    pub fn post<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(Method::Post, path, HandlerChain::single(handler))
    }

    /// Register a PUT handler.
    #[must_use]
    pub fn put<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(Method::Put, path, HandlerChain::single(handler))
    }

    /// Register a PATCH handler.
    #[must_use]
    pub fn patch<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(Method::Patch, path, HandlerChain::single(handler))
    }

    /// Register a DELETE handler.
    #[must_use]
    pub fn delete<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(Method::Delete, path, HandlerChain::single(handler))
    }

    /// Register a HEAD handler.
    #[must_use]
    pub fn head<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(Method::Head, path, HandlerChain::single(handler))
    }

    /// Register an OPTIONS handler.
    #[must_use]
    pub fn options<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(Method::Options, path, HandlerChain::single(handler))
    }

    /// Register a handler for every method not registered explicitly.
    #[must_use]
    pub fn all<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(MethodFilter::Any, path, HandlerChain::single(handler))
    }

    /// Answer unmatched requests with 404 instead of falling through.
    #[must_use]
    pub fn raise_404(mut self, raise: bool) -> Self {
        self.config = self.config.raise_404(raise);
        self
    }

    /// Handler run when nothing matched.
    #[must_use]
    pub fn on_not_found<H: Handler>(mut self, handler: H) -> Self {
        self.config = self.config.on_not_found(HandlerChain::single(handler));
        self
    }

    /// Maximum request body size read by [`use_body`].
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config = self.config.max_body_size(size);
        self
    }

    /// Header added to every response wicket produces.
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.config = self.config.default_header(name, value);
        self
    }

    /// Where internal faults are reported. Defaults to [`TracingReporter`].
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn FaultReporter>) -> Self {
        self.config = self.config.reporter(reporter);
        self
    }

    /// Apply loaded settings.
    #[must_use]
    pub fn settings(mut self, settings: BridgeSettings) -> Self {
        self.config = self.config.settings(settings);
        self
    }

    /// Finish.
    ///
    /// # Errors
    ///
    /// The first [`RouteError`] hit during registration.
    pub fn build(self) -> Result<Wicket, RouteError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        tracing::debug!(routes = self.router.len(), "wicket routes registered");
        Ok(Wicket {
            bridge: AdapterBridge::new(self.router, self.config),
        })
    }
}

/// Configured routes plus the bridge that serves them.
#[derive(Debug, Clone)]
pub struct Wicket {
    bridge: AdapterBridge,
}

impl Wicket {
    /// Start building.
    #[must_use]
    pub fn builder() -> WicketBuilder {
        WicketBuilder::new()
    }

    /// Install the bridge as middleware of a host application.
    ///
    /// Host middleware registered earlier runs before wicket; host routes
    /// registered on the returned builder serve whatever falls through.
    #[must_use]
    pub fn attach(&self, app: AppBuilder) -> AppBuilder {
        app.middleware(self.bridge.clone())
    }

    /// Wrap a single handler as a host endpoint. See [`AdapterBridge::wrap`].
    pub fn wrap<H: Handler>(&self, handler: H) -> WrappedEndpoint {
        self.bridge.wrap(handler)
    }

    /// The bridge.
    #[must_use]
    pub fn bridge(&self) -> &AdapterBridge {
        &self.bridge
    }

    /// Contexts of requests currently in flight.
    #[must_use]
    pub fn store(&self) -> &Arc<ContextStore> {
        self.bridge.store()
    }
}

/// Everything a handler module usually needs.
pub mod prelude {
    pub use crate::{
        App, AppBuilder, BridgeConfig, HandlerChain, HandlerError, HttpError, IntoReply,
        IntoResponse, Json, Method, Reply, Request, Response, StatusCode, Wicket, use_body,
        use_context, use_headers, use_request, use_response, use_route_params,
    };
    pub use serde_json::{Value, json};
}
