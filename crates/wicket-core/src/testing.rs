//! Test utilities.
//!
//! [`TestClient`] drives any host [`Endpoint`] (usually an [`crate::App`])
//! in-process, without sockets. [`CapturingReporter`] collects internal
//! faults so tests can assert on what the operator would have seen.
//!
//! # Example
//!
//! ```ignore
//! use wicket_core::testing::TestClient;
//!
//! let client = TestClient::new(app);
//! let response = client.get("/hello").send();
//!
//! assert_eq!(response.status_code(), 200);
//! assert_eq!(response.text(), "Hello World");
//! ```
//!
//! `send` blocks on a plain executor. Handlers that need a tokio runtime
//! (timers, `spawn`) should use `send_async` from a `#[tokio::test]`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::logging::{FaultReport, FaultReporter};
use crate::middleware::Endpoint;
use crate::request::{Body, Method, Request};
use crate::response::{Response, StatusCode};

/// In-process client for a host endpoint.
///
/// Cheap to clone; clones share the endpoint.
pub struct TestClient<E> {
    endpoint: Arc<E>,
    request_id_counter: Arc<AtomicU64>,
}

impl<E> Clone for TestClient<E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Arc::clone(&self.endpoint),
            request_id_counter: Arc::clone(&self.request_id_counter),
        }
    }
}

impl<E: Endpoint> TestClient<E> {
    /// Wrap an endpoint.
    pub fn new(endpoint: E) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            request_id_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The wrapped endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Start a GET request.
    pub fn get(&self, path: &str) -> RequestBuilder<'_, E> {
        self.request(Method::Get, path)
    }

    /// Start a POST request.
    pub fn post(&self, path: &str) -> RequestBuilder<'_, E> {
        self.request(Method::Post, path)
    }

    /// Start a PUT request.
    pub fn put(&self, path: &str) -> RequestBuilder<'_, E> {
        self.request(Method::Put, path)
    }

    /// Start a DELETE request.
    pub fn delete(&self, path: &str) -> RequestBuilder<'_, E> {
        self.request(Method::Delete, path)
    }

    /// Start a PATCH request.
    pub fn patch(&self, path: &str) -> RequestBuilder<'_, E> {
        self.request(Method::Patch, path)
    }

    /// Start an OPTIONS request.
    pub fn options(&self, path: &str) -> RequestBuilder<'_, E> {
        self.request(Method::Options, path)
    }

    /// Start a HEAD request.
    pub fn head(&self, path: &str) -> RequestBuilder<'_, E> {
        self.request(Method::Head, path)
    }

    /// Start a request with any method. `target` may carry a query string.
    pub fn request(&self, method: Method, target: &str) -> RequestBuilder<'_, E> {
        RequestBuilder {
            client: self,
            request: Request::from_target(method, target),
        }
    }

    /// Send a prepared request.
    pub async fn dispatch(&self, mut request: Request) -> TestResponse {
        let request_id = self.request_id_counter.fetch_add(1, Ordering::Relaxed);
        let response = self.endpoint.call(&mut request).await;
        TestResponse::new(response, request_id)
    }
}

/// Builder for one test request.
pub struct RequestBuilder<'a, E> {
    client: &'a TestClient<E>,
    request: Request,
}

impl<E: Endpoint> RequestBuilder<'_, E> {
    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: &str, value: &str) -> Self {
        let param = format!("{key}={value}");
        let query = match self.request.query() {
            Some(q) => format!("{q}&{param}"),
            None => param,
        };
        self.request.set_query(Some(query));
        self
    }

    /// Set a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.request.headers_mut().insert(name, value);
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.set_body(Body::Bytes(body.into()));
        self
    }

    /// Set a JSON body and `content-type: application/json`.
    ///
    /// # Panics
    ///
    /// Panics if `value` cannot be serialized.
    #[must_use]
    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> Self {
        let bytes = serde_json::to_vec(value).expect("JSON serialization failed");
        self.header("content-type", b"application/json".to_vec())
            .body(bytes)
    }

    /// The request as built so far.
    #[must_use]
    pub fn into_request(self) -> Request {
        self.request
    }

    /// Send the request, blocking the current thread.
    #[must_use]
    pub fn send(self) -> TestResponse {
        futures_executor::block_on(self.client.dispatch(self.request))
    }

    /// Send the request from async code.
    pub async fn send_async(self) -> TestResponse {
        self.client.dispatch(self.request).await
    }
}

/// Response from a test request with assertion helpers.
#[derive(Debug)]
pub struct TestResponse {
    inner: Response,
    request_id: u64,
}

impl TestResponse {
    fn new(inner: Response, request_id: u64) -> Self {
        Self { inner, request_id }
    }

    /// Sequence number of the request within its client.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Response status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Response status as a number.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.inner.status().as_u16()
    }

    /// True for 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }

    /// All response headers in order.
    #[must_use]
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        self.inner.headers()
    }

    /// A header value (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.inner.header_value(name)
    }

    /// A header value as UTF-8.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// The `content-type` header.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header_str("content-type")
    }

    /// Body bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.inner.body_ref().as_bytes()
    }

    /// Body as UTF-8, empty when it is not valid UTF-8.
    #[must_use]
    pub fn text(&self) -> &str {
        std::str::from_utf8(self.bytes()).unwrap_or("")
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the parse error if the body is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.bytes())
    }

    /// Unwrap the underlying response.
    #[must_use]
    pub fn into_inner(self) -> Response {
        self.inner
    }

    /// Assert the status code.
    ///
    /// # Panics
    ///
    /// Panics with a descriptive message if the assertion fails.
    pub fn assert_status_code(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status_code(),
            expected,
            "Expected status {expected}, got {} for request {} (body: {})",
            self.status_code(),
            self.request_id,
            self.text()
        );
        self
    }

    /// Assert a header value.
    ///
    /// # Panics
    ///
    /// Panics if the header is missing or different.
    pub fn assert_header(&self, name: &str, expected: &str) -> &Self {
        let actual = self.header_str(name);
        assert_eq!(
            actual,
            Some(expected),
            "Expected header '{name}' to be '{expected}', got {actual:?} for request {}",
            self.request_id
        );
        self
    }

    /// Assert the body text.
    ///
    /// # Panics
    ///
    /// Panics if the body differs.
    pub fn assert_text(&self, expected: &str) -> &Self {
        assert_eq!(
            self.text(),
            expected,
            "Body mismatch for request {}",
            self.request_id
        );
        self
    }

    /// Assert the body parses to the expected JSON value.
    ///
    /// # Panics
    ///
    /// Panics if the body is not JSON or differs.
    pub fn assert_json(&self, expected: &serde_json::Value) -> &Self {
        let actual: serde_json::Value = self.json().expect("Failed to parse response as JSON");
        assert_eq!(
            &actual, expected,
            "JSON body mismatch for request {}",
            self.request_id
        );
        self
    }
}

/// A [`FaultReporter`] that keeps every report in memory.
#[derive(Debug, Default)]
pub struct CapturingReporter {
    reports: Mutex<Vec<FaultReport>>,
}

impl CapturingReporter {
    /// Empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far.
    #[must_use]
    pub fn reports(&self) -> Vec<FaultReport> {
        self.reports.lock().clone()
    }

    /// True if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl FaultReporter for CapturingReporter {
    fn report(&self, report: &FaultReport) {
        self.reports.lock().push(report.clone());
    }
}
