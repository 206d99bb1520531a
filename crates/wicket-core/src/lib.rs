//! Core types for wicket.
//!
//! wicket lets handler chains written against an implicit, per-request
//! context run inside a conventional middleware-based host:
//!
//! - [`ContextStore`] and [`RequestContext`]: request-scoped state
//! - [`propagation`]: task-local access to the active context
//! - [`ChainExecutor`]: ordered, short-circuiting handler chains
//! - [`ResponseResolver`]: turns a handler outcome into a [`Response`]
//! - [`AdapterBridge`]: the host [`Middleware`] tying it together
//!
//! The host side ([`App`], [`MiddlewareStack`], [`Endpoint`]) is a small
//! onion-model pipeline; the bridge is registered into it like any other
//! middleware.
//!
//! # Design Principles
//!
//! - No global mutable state: the active context is task-local
//! - Every context is released exactly once, even when a request is aborted
//! - Client errors reach the client verbatim; internal faults never do

#![forbid(unsafe_code)]
// Pedantic clippy lints allowed (style suggestions, not correctness issues)
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::items_after_statements)]

pub mod app;
pub mod bridge;
pub mod composables;
mod context;
pub mod error;
mod handler;
pub mod logging;
pub mod middleware;
pub mod propagation;
mod reply;
mod request;
mod resolver;
mod response;
mod store;
pub mod testing;

pub use app::{App, AppBuilder};
pub use bridge::{AdapterBridge, BridgeConfig, BridgeOutcome, BridgeSettings, RouteLookup, WrappedEndpoint};
pub use composables::{
    RequestInfo, ResponseHandle, use_body, use_context, use_headers, use_request, use_response,
    use_route_params,
};
pub use context::{
    DEFAULT_MAX_BODY_SIZE, RequestContext, RequestId, RequestLimits, ResponseState, RouteParams,
    Stage,
};
pub use error::{ContextError, HandlerError, HttpError, InternalFault};
pub use handler::{ChainExecutor, Handler, HandlerChain};
pub use logging::{FaultReport, FaultReporter, TracingReporter};
pub use middleware::{AddResponseHeader, BoxFuture, ControlFlow, Endpoint, Middleware, MiddlewareStack};
pub use propagation::{ContextGuard, SavedFrame};
pub use reply::{IntoReply, Json, Reply};
pub use request::{Body, Headers, Method, Request};
pub use resolver::ResponseResolver;
pub use response::{IntoResponse, Response, ResponseBody, StatusCode};
pub use store::ContextStore;
