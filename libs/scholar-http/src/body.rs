use bytes::Bytes;
use futures::stream::Stream;
use serde::Serialize;
use std::pin::Pin;

use crate::error::ClientError;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Response body as it comes off the wire.
pub type ByteStream = BoxStream<Result<Bytes, ClientError>>;

/// Request payload. Mutating calls without a payload send no body at all.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Already JSON-serialized bytes.
    Json(Bytes),
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "RequestBody::Empty"),
            RequestBody::Json(bytes) => f.debug_tuple("RequestBody::Json").field(&bytes.len()).finish(),
        }
    }
}

impl RequestBody {
    /// Serialize `value` as the JSON payload.
    ///
    /// # Errors
    /// Returns [`ClientError::Serialization`] if `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ClientError> {
        let json = serde_json::to_vec(value)?;
        Ok(RequestBody::Json(Bytes::from(json)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    pub(crate) fn into_bytes(self) -> Option<Bytes> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Json(bytes) => Some(bytes),
        }
    }
}

impl From<()> for RequestBody {
    fn from((): ()) -> Self {
        RequestBody::Empty
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Json(Bytes::from(value.to_string()))
    }
}
