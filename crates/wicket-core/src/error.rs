//! Error types.
//!
//! Three families of failure travel through a request:
//!
//! - [`HttpError`]: a handler deliberately rejected the request. Its status
//!   and message go to the client verbatim and nothing is logged as a fault.
//! - [`InternalFault`]: anything else, including handler panics. The client
//!   sees a generic 500; the operator channel receives the full detail.
//! - [`ContextError`]: misuse of the propagation API, such as asking for the
//!   current context outside a dispatched request.
//!
//! [`HandlerError`] is the tagged union handlers return. Resolution matches on
//! its variant rather than inspecting the error at runtime.

use serde::Serialize;

use crate::context::RequestId;
use crate::response::{IntoResponse, Response, ResponseBody, StatusCode};

/// Wire shape of every error body.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody<'a> {
    pub status: u16,
    pub message: &'a str,
}

impl ErrorBody<'_> {
    pub(crate) fn to_vec(&self) -> Vec<u8> {
        // A struct of a number and a string cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// HTTP error that results in a non-2xx response.
///
/// # Example
///
/// ```
/// use wicket_core::{HttpError, StatusCode};
///
/// let err = HttpError::new(StatusCode::UNPROCESSABLE_ENTITY).with_message("name is required");
/// assert_eq!(err.message(), "name is required");
/// ```
#[derive(Debug, Clone)]
pub struct HttpError {
    /// Status code.
    pub status: StatusCode,
    /// Message shown to the client. Defaults to the canonical reason phrase.
    pub message: Option<String>,
    /// Additional headers.
    pub headers: Vec<(String, Vec<u8>)>,
}

impl HttpError {
    /// Create a new HTTP error.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            headers: Vec::new(),
        }
    }

    /// Add a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The message the client will see.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or_else(|| self.status.canonical_reason())
    }

    /// Serialized `{"status": .., "message": ..}` body.
    #[must_use]
    pub fn body_bytes(&self) -> Vec<u8> {
        ErrorBody {
            status: self.status.as_u16(),
            message: self.message(),
        }
        .to_vec()
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST)
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED)
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN)
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    /// Create a 413 Payload Too Large error.
    #[must_use]
    pub fn payload_too_large() -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE)
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn unprocessable_entity() -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = Response::with_status(self.status)
            .header("content-type", b"application/json".to_vec())
            .body(ResponseBody::Bytes(self.body_bytes()));

        for (name, value) in self.headers {
            response = response.header(name, value);
        }

        response
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.status.as_u16())?;
        write!(f, " {}", self.message())
    }
}

impl std::error::Error for HttpError {}

/// An unexpected failure inside a handler.
///
/// Wraps an [`anyhow::Error`] so the full cause chain, and a backtrace when
/// `RUST_BACKTRACE` is enabled, reach the operator channel.
pub struct InternalFault {
    error: anyhow::Error,
}

impl InternalFault {
    /// Wrap any error as an internal fault.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Build a fault from a free-form message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self {
            error: anyhow::Error::msg(message),
        }
    }

    /// Build a fault from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_owned()
        };
        Self::msg(format!("handler panicked: {message}"))
    }

    /// Outermost error message.
    #[must_use]
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// Cause chain plus backtrace, for operators only.
    #[must_use]
    pub fn detail(&self) -> String {
        format!("{:?}", self.error)
    }

    /// Borrow the wrapped error.
    #[must_use]
    pub fn as_anyhow(&self) -> &anyhow::Error {
        &self.error
    }
}

impl std::fmt::Debug for InternalFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalFault")
            .field("error", &self.error)
            .finish()
    }
}

impl std::fmt::Display for InternalFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for InternalFault {}

/// Error returned by a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Deliberate rejection, sent to the client as-is.
    #[error(transparent)]
    Client(#[from] HttpError),
    /// Unexpected failure, reported to the operator.
    #[error(transparent)]
    Internal(#[from] InternalFault),
}

impl HandlerError {
    /// Wrap any error as an internal fault.
    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        Self::Internal(InternalFault::new(error))
    }

    /// Status the client will receive.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Client(err) => err.status,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for client errors.
    #[must_use]
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    /// An [`HttpError`] carried inside an `anyhow::Error` stays a client error.
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<HttpError>() {
            Ok(http) => Self::Client(http),
            Err(other) => Self::Internal(InternalFault { error: other }),
        }
    }
}

impl From<ContextError> for HandlerError {
    fn from(error: ContextError) -> Self {
        Self::internal(error)
    }
}

/// Misuse of the context propagation API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// No propagation scope is active on this task.
    #[error("no active request context")]
    NoActiveContext,
    /// The frame refers to a context that was already released.
    #[error("request context {0} has already been released")]
    Released(RequestId),
    /// A response was already resolved for this request.
    #[error("response for request {0} was already resolved")]
    AlreadyResolved(RequestId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_body_uses_status_and_message() {
        let err = HttpError::unprocessable_entity().with_message("missing field `name`");
        let body: serde_json::Value = serde_json::from_slice(&err.body_bytes()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"status": 422, "message": "missing field `name`"})
        );
    }

    #[test]
    fn http_error_message_defaults_to_reason() {
        let err = HttpError::not_found();
        assert_eq!(err.message(), "Not Found");
        assert_eq!(err.to_string(), "404 Not Found");
    }

    #[test]
    fn http_error_into_response_keeps_headers() {
        let response = HttpError::unauthorized()
            .with_header("www-authenticate", b"Bearer".to_vec())
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.header_value("www-authenticate"),
            Some(&b"Bearer"[..])
        );
    }

    #[test]
    fn anyhow_wrapping_http_error_stays_client() {
        let err: anyhow::Error = HttpError::bad_request().with_message("nope").into();
        let handler_err = HandlerError::from(err);
        assert!(handler_err.is_client());
        assert_eq!(handler_err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn anyhow_chain_becomes_internal_with_detail() {
        let err = anyhow::anyhow!("connection refused").context("loading user 42");
        let handler_err = HandlerError::from(err);
        match handler_err {
            HandlerError::Internal(fault) => {
                assert_eq!(fault.message(), "loading user 42");
                assert!(fault.detail().contains("connection refused"));
            }
            HandlerError::Client(_) => panic!("expected internal fault"),
        }
    }

    #[test]
    fn panic_payloads_are_described() {
        let fault = InternalFault::from_panic(Box::new("boom"));
        assert_eq!(fault.message(), "handler panicked: boom");

        let fault = InternalFault::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(fault.message(), "handler panicked: owned boom");

        let fault = InternalFault::from_panic(Box::new(7_u8));
        assert_eq!(fault.message(), "handler panicked: unknown panic payload");
    }
}
