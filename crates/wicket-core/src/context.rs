//! Per-request context.
//!
//! A [`RequestContext`] is created when a request enters the bridge and owns
//! everything request-scoped: the raw request, route parameters, the response
//! under construction and the request limits. Handlers reach it through the
//! propagation scope (see [`crate::propagation`]) rather than by parameter.

use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{OnceLock, Weak};

use crate::error::ContextError;
use crate::request::{Method, Request};
use crate::response::{StatusCode, is_valid_header_name, sanitize_header_value};
use crate::store::ContextStore;

/// Default maximum body size: 1MB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one request, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate the next identity.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value, for logs.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Limits applied to a request while it is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    max_body_size: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl RequestLimits {
    /// Limits with the given maximum body size in bytes.
    #[must_use]
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    /// Maximum body size in bytes.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

/// Route parameters captured by the route lookup.
///
/// Serializes as a JSON object in capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    params: Vec<(String, String)>,
}

impl RouteParams {
    /// No parameters.
    #[must_use]
    pub const fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Build from name/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate in capture order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True when nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Serialize for RouteParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (name, value) in &self.params {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

static NO_PARAMS: RouteParams = RouteParams::new();

/// Response under construction.
///
/// Handlers write to it through [`crate::composables::use_response`]; the
/// resolver reads it once when it builds the final response.
#[derive(Debug, Clone, Default)]
pub struct ResponseState {
    status: Option<StatusCode>,
    headers: Vec<(String, Vec<u8>)>,
}

impl ResponseState {
    /// Status explicitly chosen by a handler, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Choose the response status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Set a header, replacing any previous value of the same name.
    ///
    /// Invalid names are ignored and values are stripped of CR/LF, as with
    /// [`crate::Response::header`].
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        if !is_valid_header_name(&name) {
            return;
        }
        let value = sanitize_header_value(value.into());
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Remove a header. Returns true if it was present.
    pub fn remove_header(&mut self, name: &str) -> bool {
        let before = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.len() != before
    }

    /// Header value set by a handler.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// All handler-set headers in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }
}

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Context constructed, not yet in scope.
    Created,
    /// Propagation scope entered.
    ContextActive,
    /// A handler chain is running.
    Dispatched,
    /// The response has been produced.
    Resolved,
    /// Nothing matched; the host pipeline continues.
    Fallthrough,
    /// Removed from the store. Terminal.
    Released,
}

/// Everything scoped to a single request.
pub struct RequestContext {
    id: RequestId,
    request: Mutex<Request>,
    route_params: OnceLock<RouteParams>,
    response: Mutex<ResponseState>,
    limits: RequestLimits,
    stage: Mutex<Stage>,
    resolved: AtomicBool,
    released: AtomicBool,
    store: Weak<ContextStore>,
}

impl RequestContext {
    /// Create a context that is not registered with any store.
    #[must_use]
    pub fn new(request: Request, limits: RequestLimits) -> Self {
        Self::in_store(request, limits, Weak::new())
    }

    pub(crate) fn in_store(request: Request, limits: RequestLimits, store: Weak<ContextStore>) -> Self {
        Self {
            id: RequestId::next(),
            request: Mutex::new(request),
            route_params: OnceLock::new(),
            response: Mutex::new(ResponseState::default()),
            limits,
            stage: Mutex::new(Stage::Created),
            resolved: AtomicBool::new(false),
            released: AtomicBool::new(false),
            store,
        }
    }

    /// Identity of this request.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.request.lock().method()
    }

    /// Request path, without the query string.
    #[must_use]
    pub fn path(&self) -> String {
        self.request.lock().path().to_owned()
    }

    /// Read the raw request.
    pub fn with_request<R>(&self, f: impl FnOnce(&Request) -> R) -> R {
        f(&self.request.lock())
    }

    /// Mutate the raw request.
    pub fn with_request_mut<R>(&self, f: impl FnOnce(&mut Request) -> R) -> R {
        f(&mut self.request.lock())
    }

    /// Move the raw request out, leaving a method/path placeholder behind.
    pub fn take_request(&self) -> Request {
        let mut guard = self.request.lock();
        let placeholder = guard.placeholder();
        std::mem::replace(&mut *guard, placeholder)
    }

    /// Set the route parameters. They can be set once; later calls return false.
    pub fn set_route_params(&self, params: RouteParams) -> bool {
        self.route_params.set(params).is_ok()
    }

    /// Route parameters, empty until a lookup sets them.
    #[must_use]
    pub fn route_params(&self) -> &RouteParams {
        self.route_params.get().unwrap_or(&NO_PARAMS)
    }

    /// Write access to the response under construction.
    pub fn with_response<R>(&self, f: impl FnOnce(&mut ResponseState) -> R) -> R {
        f(&mut self.response.lock())
    }

    /// Copy of the response state.
    #[must_use]
    pub fn response_state(&self) -> ResponseState {
        self.response.lock().clone()
    }

    /// Limits for this request.
    #[must_use]
    pub fn limits(&self) -> RequestLimits {
        self.limits
    }

    /// Current lifecycle stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.lock()
    }

    pub(crate) fn advance(&self, next: Stage) {
        let mut stage = self.stage.lock();
        if *stage == Stage::Released {
            return;
        }
        tracing::trace!(request_id = %self.id, from = ?*stage, to = ?next, "request stage");
        *stage = next;
    }

    /// True once a response was resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Claim the single resolution of this request.
    pub(crate) fn mark_resolved(&self) -> Result<(), ContextError> {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return Err(ContextError::AlreadyResolved(self.id));
        }
        Ok(())
    }

    /// True once the context left the store.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release this context. Returns true only for the call that released it.
    pub fn release(&self) -> bool {
        if let Some(store) = self.store.upgrade() {
            store.forget(self.id);
        }
        self.mark_released()
    }

    pub(crate) fn mark_released(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.advance(Stage::Released);
        true
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("stage", &self.stage())
            .field("route_params", self.route_params())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new(
            Request::from_target(Method::Get, "/users/42?verbose=1"),
            RequestLimits::default(),
        )
    }

    #[test]
    fn request_ids_are_unique() {
        let a = ctx();
        let b = ctx();
        assert_ne!(a.id(), b.id());
        assert!(b.id() > a.id());
    }

    #[test]
    fn route_params_set_once() {
        let ctx = ctx();
        assert!(ctx.route_params().is_empty());

        assert!(ctx.set_route_params(RouteParams::from_pairs([("id", "42")])));
        assert!(!ctx.set_route_params(RouteParams::from_pairs([("id", "7")])));
        assert_eq!(ctx.route_params().get("id"), Some("42"));
    }

    #[test]
    fn route_params_serialize_in_capture_order() {
        let params = RouteParams::from_pairs([("org", "acme"), ("id", "42")]);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"org":"acme","id":"42"}"#);
    }

    #[test]
    fn response_state_replaces_headers_case_insensitively() {
        let mut state = ResponseState::default();
        state.set_header("X-Trace", b"a".to_vec());
        state.set_header("x-trace", b"b".to_vec());
        state.set_header("bad header", b"ignored".to_vec());

        assert_eq!(state.headers().len(), 1);
        assert_eq!(state.header("X-TRACE"), Some(&b"b"[..]));
        assert!(state.remove_header("X-Trace"));
        assert!(!state.remove_header("X-Trace"));
    }

    #[test]
    fn take_request_leaves_placeholder() {
        let ctx = ctx();
        ctx.with_request_mut(|req| req.headers_mut().insert("x-a", b"1".to_vec()));

        let raw = ctx.take_request();
        assert_eq!(raw.query(), Some("verbose=1"));
        assert!(raw.headers().contains("x-a"));

        assert_eq!(ctx.path(), "/users/42");
        assert!(ctx.with_request(|req| req.headers().is_empty()));
    }

    #[test]
    fn resolution_is_claimed_once() {
        let ctx = ctx();
        assert!(ctx.mark_resolved().is_ok());
        assert_eq!(
            ctx.mark_resolved(),
            Err(ContextError::AlreadyResolved(ctx.id()))
        );
    }

    #[test]
    fn release_is_idempotent_and_terminal() {
        let ctx = ctx();
        ctx.advance(Stage::ContextActive);
        assert!(ctx.release());
        assert!(!ctx.release());
        assert!(ctx.is_released());

        ctx.advance(Stage::Dispatched);
        assert_eq!(ctx.stage(), Stage::Released);
    }

    #[test]
    fn default_limits() {
        assert_eq!(
            RequestLimits::default().max_body_size(),
            DEFAULT_MAX_BODY_SIZE
        );
        assert_eq!(RequestLimits::new(16).max_body_size(), 16);
    }
}
