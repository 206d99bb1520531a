//! Values handlers produce.

use serde::Serialize;

use crate::error::{HandlerError, HttpError};

/// What a handler returned.
///
/// [`Reply::Empty`] means "nothing": the chain moves on to the next handler,
/// and if it is the final outcome the resolver answers 204. An empty string
/// or empty byte vector is a real reply that stops the chain, yet it still
/// resolves to 204 because there is no body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Reply {
    /// No value.
    #[default]
    Empty,
    /// UTF-8 text, sent as `text/plain`.
    Text(String),
    /// Raw bytes, sent as `application/octet-stream`.
    Bytes(Vec<u8>),
    /// Structured value, sent as `application/json`.
    Json(serde_json::Value),
}

impl Reply {
    /// Serialize any value into a JSON reply.
    ///
    /// # Errors
    ///
    /// Serialization failures are internal faults.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HandlerError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(HandlerError::internal)
    }

    /// True only for [`Reply::Empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// True when the reply will put bytes on the wire.
    #[must_use]
    pub fn has_body(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Text(text) => !text.is_empty(),
            Self::Bytes(bytes) => !bytes.is_empty(),
            Self::Json(_) => true,
        }
    }
}

/// JSON reply wrapper for any serializable type.
///
/// ```
/// use wicket_core::{IntoReply, Json, Reply};
///
/// #[derive(serde::Serialize)]
/// struct User { id: u32 }
///
/// let reply = Json(User { id: 42 }).into_reply().unwrap();
/// assert_eq!(reply, Reply::Json(serde_json::json!({"id": 42})));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

/// Conversion from handler return values into a [`Reply`].
pub trait IntoReply {
    /// Convert, or fail with the error the handler signaled.
    fn into_reply(self) -> Result<Reply, HandlerError>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(self)
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Empty)
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Text(self.to_owned()))
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Text(self))
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Bytes(self))
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Json(self))
    }
}

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Reply::json(&self.0)
    }
}

impl IntoReply for HttpError {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Err(HandlerError::Client(self))
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        match self {
            Some(value) => value.into_reply(),
            None => Ok(Reply::Empty),
        }
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<HandlerError>,
{
    fn into_reply(self) -> Result<Reply, HandlerError> {
        match self {
            Ok(value) => value.into_reply(),
            Err(err) => Err(err.into()),
        }
    }
}
