//! Request-scoped accessors for handlers.
//!
//! Handlers take no parameters. They call these functions instead, which
//! find the active [`RequestContext`] through the propagation scope:
//!
//! ```ignore
//! let hello = || async {
//!     let params = use_route_params()?;
//!     let name = params.get("name").unwrap_or("stranger").to_owned();
//!     use_response()?.set_header("x-greeting", "1");
//!     Ok::<_, HandlerError>(format!("Hello {name}"))
//! };
//! ```
//!
//! Every accessor fails with [`ContextError::NoActiveContext`] outside a
//! dispatched request.

use std::sync::Arc;

use crate::context::{RequestContext, RouteParams};
use crate::error::{ContextError, HandlerError, HttpError};
use crate::propagation;
use crate::request::{Body, Headers, Method};
use crate::response::StatusCode;

/// The active request context.
///
/// # Errors
///
/// Fails when no request is being dispatched on this task.
pub fn use_context() -> Result<Arc<RequestContext>, ContextError> {
    propagation::current()
}

/// Request line details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Request method.
    pub method: Method,
    /// Path plus query string, as received.
    pub url: String,
    /// Path only.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
}

/// Snapshot of the request line.
///
/// # Errors
///
/// Fails when no request is being dispatched on this task.
pub fn use_request() -> Result<RequestInfo, ContextError> {
    let ctx = use_context()?;
    Ok(ctx.with_request(|req| RequestInfo {
        method: req.method(),
        url: req.url(),
        path: req.path().to_owned(),
        query: req.query().map(str::to_owned),
    }))
}

/// Snapshot of the request headers.
///
/// # Errors
///
/// Fails when no request is being dispatched on this task.
pub fn use_headers() -> Result<Headers, ContextError> {
    let ctx = use_context()?;
    Ok(ctx.with_request(|req| req.headers().clone()))
}

/// Parameters captured by the route lookup.
///
/// # Errors
///
/// Fails when no request is being dispatched on this task.
pub fn use_route_params() -> Result<RouteParams, ContextError> {
    Ok(use_context()?.route_params().clone())
}

/// Write access to the response under construction.
#[derive(Debug, Clone)]
pub struct ResponseHandle {
    ctx: Arc<RequestContext>,
}

impl ResponseHandle {
    /// Choose the response status.
    pub fn set_status(&self, status: StatusCode) -> &Self {
        self.ctx.with_response(|r| r.set_status(status));
        self
    }

    /// Set a header, replacing an earlier value of the same name.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> &Self {
        self.ctx.with_response(|r| r.set_header(name, value));
        self
    }

    /// Remove a header set earlier. Returns true if it was present.
    pub fn remove_header(&self, name: &str) -> bool {
        self.ctx.with_response(|r| r.remove_header(name))
    }

    /// Status chosen so far.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.ctx.with_response(|r| r.status())
    }

    /// Header value set so far.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<Vec<u8>> {
        self.ctx.with_response(|r| r.header(name).map(<[u8]>::to_vec))
    }
}

/// Handle on the response under construction.
///
/// # Errors
///
/// Fails when no request is being dispatched on this task.
pub fn use_response() -> Result<ResponseHandle, ContextError> {
    Ok(ResponseHandle { ctx: use_context()? })
}

/// The raw request body.
///
/// Can be read any number of times.
///
/// # Errors
///
/// An internal fault outside a dispatched request; 413 when the declared
/// `content-length` or the actual body exceeds the request's
/// `max_body_size`.
pub async fn use_body() -> Result<Vec<u8>, HandlerError> {
    let ctx = use_context()?;
    let limit = ctx.limits().max_body_size();

    ctx.with_request(|req| {
        let declared = req
            .headers()
            .get_str("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok());
        let actual = req.body().len();
        if declared.is_some_and(|len| len > limit) || actual > limit {
            tracing::debug!(request_id = %ctx.id(), limit, actual, "request body too large");
            return Err(HttpError::payload_too_large()
                .with_message(format!("request body exceeds {limit} bytes"))
                .into());
        }
        Ok(match req.body() {
            Body::Empty => Vec::new(),
            Body::Bytes(bytes) => bytes.clone(),
        })
    })
}
