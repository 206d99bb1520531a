//! Turns handler outcomes into wire responses.
//!
//! | Outcome                         | Status                         | Body                           |
//! |---------------------------------|--------------------------------|--------------------------------|
//! | empty reply, no explicit status | 204                            | none                           |
//! | text / bytes                    | 200 or handler-set             | verbatim                       |
//! | JSON value                      | 200 or handler-set             | serialized, `application/json` |
//! | [`HandlerError::Client`]        | the error's status             | `{"status":..,"message":..}`   |
//! | [`HandlerError::Internal`]      | 500                            | generic, detail goes to logs   |
//!
//! Header precedence, lowest first: configured default headers, headers the
//! handler set through `use_response`, then the content type the resolver
//! synthesizes when none was set. A faulted request keeps only the default
//! headers, since whatever the handler wrote may be half-finished.
//!
//! HEAD requests get the status and headers of the equivalent GET, without
//! the body.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::context::{RequestContext, Stage};
use crate::error::{ContextError, ErrorBody, HandlerError, HttpError, InternalFault};
use crate::logging::{FaultReport, FaultReporter, TracingReporter};
use crate::reply::Reply;
use crate::request::Method;
use crate::response::{Response, ResponseBody, StatusCode};

const TEXT_PLAIN: &[u8] = b"text/plain; charset=utf-8";
const OCTET_STREAM: &[u8] = b"application/octet-stream";
const APPLICATION_JSON: &[u8] = b"application/json";

/// Builds the final response for a request, exactly once.
#[derive(Clone)]
pub struct ResponseResolver {
    default_headers: Vec<(String, Vec<u8>)>,
    reporter: Arc<dyn FaultReporter>,
}

impl Default for ResponseResolver {
    fn default() -> Self {
        Self {
            default_headers: Vec::new(),
            reporter: Arc::new(TracingReporter),
        }
    }
}

impl std::fmt::Debug for ResponseResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseResolver")
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

impl ResponseResolver {
    /// Resolver with no default headers reporting to `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers applied to every response before handler-set ones.
    #[must_use]
    pub fn with_default_headers(mut self, headers: Vec<(String, Vec<u8>)>) -> Self {
        self.default_headers = headers;
        self
    }

    /// Where internal faults are reported.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn FaultReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Configured default headers.
    #[must_use]
    pub fn default_headers(&self) -> &[(String, Vec<u8>)] {
        &self.default_headers
    }

    /// Resolve `outcome` for `ctx`.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyResolved`] if this request was resolved before.
    pub fn resolve(
        &self,
        outcome: Result<Reply, HandlerError>,
        ctx: &RequestContext,
    ) -> Result<Response, ContextError> {
        ctx.mark_resolved()?;
        let mut response = match outcome {
            Ok(reply) => self.success(reply, ctx),
            Err(HandlerError::Client(err)) => self.client_error(err, ctx),
            Err(HandlerError::Internal(fault)) => self.internal_fault(&fault, ctx),
        };
        // HEAD keeps the status and headers a GET would get, never the body.
        if ctx.method() == Method::Head {
            response = response.body(ResponseBody::Empty);
        }
        ctx.advance(Stage::Resolved);
        Ok(response)
    }

    /// A bare 500 built without touching any context.
    ///
    /// Used when a request cannot be resolved normally.
    #[must_use]
    pub fn generic_failure(&self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let mut headers = self.default_headers.clone();
        set_header(&mut headers, "content-type", APPLICATION_JSON.to_vec());
        let body = ErrorBody {
            status: status.as_u16(),
            message: status.canonical_reason(),
        }
        .to_vec();
        build(status, headers, body)
    }

    /// Report `fault` and build the generic 500.
    ///
    /// A reporter that panics is contained here; the client still gets the
    /// generic 500.
    pub(crate) fn report(&self, report: &FaultReport) -> Response {
        let reported = panic::catch_unwind(AssertUnwindSafe(|| self.reporter.report(report)));
        if reported.is_err() {
            tracing::error!(
                request_id = report.request_id,
                "fault reporter panicked while reporting: {}",
                report.message
            );
        }
        self.generic_failure()
    }

    fn success(&self, reply: Reply, ctx: &RequestContext) -> Response {
        let state = ctx.response_state();
        let status = state.status().unwrap_or(if reply.has_body() {
            StatusCode::OK
        } else {
            StatusCode::NO_CONTENT
        });
        let (body, content_type) = match reply {
            Reply::Empty => (Vec::new(), None),
            Reply::Text(text) => (text.into_bytes(), Some(TEXT_PLAIN)),
            Reply::Bytes(bytes) => (bytes, Some(OCTET_STREAM)),
            Reply::Json(value) => match serde_json::to_vec(&value) {
                Ok(bytes) => (bytes, Some(APPLICATION_JSON)),
                Err(err) => return self.internal_fault(&InternalFault::new(err), ctx),
            },
        };

        let mut headers = self.default_headers.clone();
        for (name, value) in state.headers() {
            set_header(&mut headers, name, value.clone());
        }
        if let Some(content_type) = content_type {
            if !body.is_empty() && !has_header(&headers, "content-type") {
                headers.push(("content-type".to_owned(), content_type.to_vec()));
            }
        }

        build(status, headers, body)
    }

    fn client_error(&self, err: HttpError, ctx: &RequestContext) -> Response {
        let state = ctx.response_state();
        let mut headers = self.default_headers.clone();
        for (name, value) in state.headers() {
            set_header(&mut headers, name, value.clone());
        }
        set_header(&mut headers, "content-type", APPLICATION_JSON.to_vec());
        let body = err.body_bytes();
        for (name, value) in err.headers {
            set_header(&mut headers, &name, value);
        }
        build(err.status, headers, body)
    }

    fn internal_fault(&self, fault: &InternalFault, ctx: &RequestContext) -> Response {
        self.report(&FaultReport::new(ctx, fault))
    }
}

fn has_header(headers: &[(String, Vec<u8>)], name: &str) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

fn set_header(headers: &mut Vec<(String, Vec<u8>)>, name: &str, value: Vec<u8>) {
    match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        Some(slot) => slot.1 = value,
        None => headers.push((name.to_owned(), value)),
    }
}

fn build(status: StatusCode, headers: Vec<(String, Vec<u8>)>, body: Vec<u8>) -> Response {
    let allows_body = status.allows_body() && !body.is_empty();
    let mut response = Response::with_status(status);
    for (name, value) in headers {
        if !allows_body && name.eq_ignore_ascii_case("content-type") {
            continue;
        }
        response = response.header(name, value);
    }
    if allows_body {
        response = response.body(ResponseBody::Bytes(body));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestLimits;
    use crate::request::{Method, Request};
    use crate::testing::CapturingReporter;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new(Request::new(Method::Get, "/r"), RequestLimits::default())
    }

    fn body_json(response: &Response) -> serde_json::Value {
        serde_json::from_slice(response.body_ref().as_bytes()).unwrap()
    }

    #[test]
    fn empty_reply_is_no_content() {
        let response = ResponseResolver::new().resolve(Ok(Reply::Empty), &ctx()).unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body_ref().is_empty());
        assert!(response.header_value("content-type").is_none());
    }

    #[test]
    fn empty_text_is_no_content_too() {
        let response = ResponseResolver::new()
            .resolve(Ok(Reply::Text(String::new())), &ctx())
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn head_keeps_status_and_headers_but_drops_body() {
        let ctx = RequestContext::new(Request::new(Method::Head, "/r"), RequestLimits::default());
        let response = ResponseResolver::new()
            .resolve(Ok(Reply::Text("body".into())), &ctx)
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.header_value("content-type"),
            Some(&b"text/plain; charset=utf-8"[..])
        );
        assert!(response.body_ref().is_empty());

        let ctx = RequestContext::new(Request::new(Method::Head, "/r"), RequestLimits::default());
        let response = ResponseResolver::new()
            .resolve(Err(HttpError::not_found().into()), &ctx)
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.body_ref().is_empty());
    }

    #[test]
    fn explicit_status_wins_for_empty_reply() {
        let ctx = ctx();
        ctx.with_response(|r| r.set_status(StatusCode::ACCEPTED));
        let response = ResponseResolver::new().resolve(Ok(Reply::Empty), &ctx).unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn text_and_bytes_get_content_types() {
        let text = ResponseResolver::new()
            .resolve(Ok(Reply::Text("Hello World".into())), &ctx())
            .unwrap();
        assert_eq!(text.status(), StatusCode::OK);
        assert_eq!(text.body_ref().as_bytes(), b"Hello World");
        assert_eq!(text.header_value("content-type"), Some(TEXT_PLAIN));

        let bytes = ResponseResolver::new()
            .resolve(Ok(Reply::Bytes(vec![0, 1, 2])), &ctx())
            .unwrap();
        assert_eq!(bytes.header_value("content-type"), Some(OCTET_STREAM));
    }

    #[test]
    fn json_reply_preserves_key_order() {
        let value = json!({"zulu": 1, "alpha": {"nested": true}, "mike": [1, 2]});
        let response = ResponseResolver::new()
            .resolve(Ok(Reply::Json(value)), &ctx())
            .unwrap();
        assert_eq!(response.header_value("content-type"), Some(APPLICATION_JSON));
        assert_eq!(
            response.body_ref().as_bytes(),
            br#"{"zulu":1,"alpha":{"nested":true},"mike":[1,2]}"#
        );
    }

    #[test]
    fn handler_content_type_is_kept() {
        let ctx = ctx();
        ctx.with_response(|r| r.set_header("Content-Type", b"text/html".to_vec()));
        let response = ResponseResolver::new()
            .resolve(Ok(Reply::Text("<p>hi</p>".into())), &ctx)
            .unwrap();
        assert_eq!(response.header_value("content-type"), Some(&b"text/html"[..]));
        assert_eq!(response.headers().len(), 1);
    }

    #[test]
    fn handler_headers_override_defaults() {
        let resolver = ResponseResolver::new().with_default_headers(vec![
            ("x-powered-by".into(), b"wicket".to_vec()),
            ("cache-control".into(), b"no-store".to_vec()),
        ]);
        let ctx = ctx();
        ctx.with_response(|r| r.set_header("Cache-Control", b"max-age=60".to_vec()));

        let response = resolver.resolve(Ok(Reply::Text("x".into())), &ctx).unwrap();
        assert_eq!(response.header_value("x-powered-by"), Some(&b"wicket"[..]));
        assert_eq!(response.header_value("cache-control"), Some(&b"max-age=60"[..]));
    }

    #[test]
    fn client_error_uses_wire_shape() {
        let reporter = Arc::new(CapturingReporter::new());
        let resolver = ResponseResolver::new().with_reporter(reporter.clone());
        let err = HttpError::unprocessable_entity().with_message("email is invalid");

        let response = resolver.resolve(Err(err.into()), &ctx()).unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body_json(&response),
            json!({"status": 422, "message": "email is invalid"})
        );
        assert!(reporter.is_empty());
    }

    #[test]
    fn client_error_ignores_explicit_status() {
        let ctx = ctx();
        ctx.with_response(|r| r.set_status(StatusCode::CREATED));
        let response = ResponseResolver::new()
            .resolve(Err(HttpError::bad_request().into()), &ctx)
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(&response),
            json!({"status": 400, "message": "Bad Request"})
        );
    }

    #[test]
    fn internal_fault_is_generic_and_reported() {
        let reporter = Arc::new(CapturingReporter::new());
        let resolver = ResponseResolver::new()
            .with_reporter(reporter.clone())
            .with_default_headers(vec![("x-powered-by".into(), b"wicket".to_vec())]);
        let ctx = ctx();
        ctx.with_response(|r| r.set_header("x-partial", b"1".to_vec()));
        let fault = anyhow::anyhow!("secret connection string leaked").context("query failed");

        let response = resolver.resolve(Err(fault.into()), &ctx).unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(&response),
            json!({"status": 500, "message": "Internal Server Error"})
        );
        assert!(!String::from_utf8_lossy(response.body_ref().as_bytes()).contains("secret"));
        assert_eq!(response.header_value("x-powered-by"), Some(&b"wicket"[..]));
        assert!(response.header_value("x-partial").is_none());

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].request_id, ctx.id().as_u64());
        assert!(reports[0].detail.contains("secret connection string leaked"));
    }

    #[test]
    fn second_resolve_fails_loudly() {
        let ctx = ctx();
        let resolver = ResponseResolver::new();
        resolver.resolve(Ok(Reply::Empty), &ctx).unwrap();
        let err = resolver.resolve(Ok(Reply::Empty), &ctx).unwrap_err();
        assert_eq!(err, ContextError::AlreadyResolved(ctx.id()));
        assert_eq!(ctx.stage(), Stage::Resolved);
    }

    #[test]
    fn bodyless_status_drops_body() {
        let ctx = ctx();
        ctx.with_response(|r| r.set_status(StatusCode::NOT_MODIFIED));
        let response = ResponseResolver::new()
            .resolve(Ok(Reply::Text("stale".into())), &ctx)
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.body_ref().is_empty());
        assert!(response.header_value("content-type").is_none());
    }
}
