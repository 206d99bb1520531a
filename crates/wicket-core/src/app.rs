//! Host application: a middleware pipeline in front of a native route table.
//!
//! Every request runs through the middleware stack first. Whatever falls
//! through reaches the native routes, matched by exact path. Unmatched paths
//! get the host's own plain-text 404, or 405 with an `Allow` header when the
//! path exists under another method.
//!
//! # Example
//!
//! ```ignore
//! let app = App::builder()
//!     .middleware(AddResponseHeader::new("x-served-by", "host"))
//!     .get("/health", |_req: &mut Request| async { "ok".into_response() })
//!     .build();
//!
//! let response = app.handle(&mut Request::new(Method::Get, "/health")).await;
//! ```

use std::sync::Arc;

use crate::middleware::{BoxFuture, Endpoint, Middleware, MiddlewareStack};
use crate::request::{Method, Request};
use crate::response::{Response, ResponseBody, StatusCode};

struct RouteEntry {
    method: Method,
    path: String,
    endpoint: Arc<dyn Endpoint>,
}

/// Native routes of the host, matched by exact path.
#[derive(Default)]
struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    fn allowed(&self, path: &str) -> Vec<Method> {
        Method::ALL
            .into_iter()
            .filter(|&m| self.routes.iter().any(|r| r.path == path && r.method == m))
            .collect()
    }
}

impl Endpoint for RouteTable {
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Response> {
        let matched = self
            .routes
            .iter()
            .find(|r| r.method == req.method() && r.path == req.path());
        if let Some(entry) = matched {
            return entry.endpoint.call(req);
        }

        let allowed = self.allowed(req.path());
        Box::pin(async move {
            if allowed.is_empty() {
                tracing::debug!(method = %req.method(), path = req.path(), "host: no route");
                Response::not_found()
                    .header("content-type", b"text/plain; charset=utf-8".to_vec())
                    .body(ResponseBody::Bytes(b"Not Found".to_vec()))
            } else {
                Response::with_status(StatusCode::METHOD_NOT_ALLOWED)
                    .header("allow", format_allow_header(&allowed).into_bytes())
            }
        })
    }
}

/// Comma-separated method list for an `Allow` header.
#[must_use]
pub fn format_allow_header(methods: &[Method]) -> String {
    methods
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builder for constructing an [`App`].
#[derive(Default)]
pub struct AppBuilder {
    routes: RouteTable,
    middleware: MiddlewareStack,
}

impl AppBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native endpoint.
    #[must_use]
    pub fn route(mut self, method: Method, path: impl Into<String>, endpoint: impl Endpoint + 'static) -> Self {
        self.routes.routes.push(RouteEntry {
            method,
            path: path.into(),
            endpoint: Arc::new(endpoint),
        });
        self
    }

    /// Register a GET endpoint.
    #[must_use]
    pub fn get(self, path: impl Into<String>, endpoint: impl Endpoint + 'static) -> Self {
        self.route(Method::Get, path, endpoint)
    }

    /// Register a POST endpoint.
    #[must_use]
    pub fn post(self, path: impl Into<String>, endpoint: impl Endpoint + 'static) -> Self {
        self.route(Method::Post, path, endpoint)
    }

    /// Register a PUT endpoint.
    #[must_use]
    pub fn put(self, path: impl Into<String>, endpoint: impl Endpoint + 'static) -> Self {
        self.route(Method::Put, path, endpoint)
    }

    /// Register a DELETE endpoint.
    #[must_use]
    pub fn delete(self, path: impl Into<String>, endpoint: impl Endpoint + 'static) -> Self {
        self.route(Method::Delete, path, endpoint)
    }

    /// Register a PATCH endpoint.
    #[must_use]
    pub fn patch(self, path: impl Into<String>, endpoint: impl Endpoint + 'static) -> Self {
        self.route(Method::Patch, path, endpoint)
    }

    /// Register a HEAD endpoint.
    #[must_use]
    pub fn head(self, path: impl Into<String>, endpoint: impl Endpoint + 'static) -> Self {
        self.route(Method::Head, path, endpoint)
    }

    /// Register an OPTIONS endpoint.
    #[must_use]
    pub fn options(self, path: impl Into<String>, endpoint: impl Endpoint + 'static) -> Self {
        self.route(Method::Options, path, endpoint)
    }

    /// Append middleware. Registration order is execution order.
    #[must_use]
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Append shared middleware.
    #[must_use]
    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push_arc(middleware);
        self
    }

    /// Finish the application.
    #[must_use]
    pub fn build(self) -> App {
        App {
            routes: self.routes,
            middleware: self.middleware,
        }
    }
}

/// The host application.
pub struct App {
    routes: RouteTable,
    middleware: MiddlewareStack,
}

impl App {
    /// Start building an application.
    #[must_use]
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Number of native routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.routes.len()
    }

    /// Number of middleware layers.
    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// Handle one request.
    pub async fn handle(&self, req: &mut Request) -> Response {
        self.middleware.execute(&self.routes, req).await
    }
}

impl Endpoint for App {
    fn call<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Response> {
        Box::pin(self.handle(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{AddResponseHeader, ControlFlow};
    use crate::response::IntoResponse;

    fn app() -> App {
        App::builder()
            .get("/health", |_req: &mut Request| async { "ok".into_response() })
            .post("/health", |_req: &mut Request| async { Response::no_content() })
            .build()
    }

    #[test]
    fn native_route_matches() {
        let app = app();
        let mut req = Request::new(Method::Get, "/health");
        let response = futures_executor::block_on(app.handle(&mut req));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_ref().as_bytes(), b"ok");
        assert_eq!(app.route_count(), 2);
    }

    #[test]
    fn unknown_path_gets_host_404() {
        let app = app();
        let mut req = Request::new(Method::Get, "/missing");
        let response = futures_executor::block_on(app.handle(&mut req));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body_ref().as_bytes(), b"Not Found");
    }

    #[test]
    fn wrong_method_gets_405_with_allow() {
        let app = app();
        let mut req = Request::new(Method::Delete, "/health");
        let response = futures_executor::block_on(app.handle(&mut req));
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header_value("allow"), Some(&b"GET, POST"[..]));
    }

    #[test]
    fn allow_lists_each_method_once_in_canonical_order() {
        let app = App::builder()
            .post("/items", |_req: &mut Request| async { Response::ok() })
            .get("/items", |_req: &mut Request| async { Response::ok() })
            .post("/items", |_req: &mut Request| async { Response::ok() })
            .build();
        let mut req = Request::new(Method::Delete, "/items");
        let response = futures_executor::block_on(app.handle(&mut req));
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header_value("allow"), Some(&b"GET, POST"[..]));
    }

    #[test]
    fn middleware_wraps_every_request() {
        struct Deny;
        impl Middleware for Deny {
            fn before<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, ControlFlow> {
                let deny = req.path() == "/health" && req.method() == Method::Post;
                Box::pin(async move {
                    if deny {
                        ControlFlow::Break(Response::with_status(StatusCode::FORBIDDEN))
                    } else {
                        ControlFlow::Continue
                    }
                })
            }
        }

        let app = App::builder()
            .middleware(AddResponseHeader::new("x-host", b"1".to_vec()))
            .middleware(Deny)
            .post("/health", |_req: &mut Request| async { Response::ok() })
            .build();
        assert_eq!(app.middleware_count(), 2);

        let mut req = Request::new(Method::Post, "/health");
        let response = futures_executor::block_on(app.handle(&mut req));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.header_value("x-host"), Some(&b"1"[..]));

        let mut req = Request::new(Method::Get, "/elsewhere");
        let response = futures_executor::block_on(app.handle(&mut req));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.header_value("x-host"), Some(&b"1"[..]));
    }

    #[test]
    fn allow_header_format() {
        assert_eq!(format_allow_header(&[Method::Get, Method::Head]), "GET, HEAD");
        assert_eq!(format_allow_header(&[]), "");
    }
}
