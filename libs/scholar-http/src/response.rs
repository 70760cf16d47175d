use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::body::ByteStream;
use crate::error::ClientError;
use crate::events::{AnalysisEventHandler, DispatchSummary, dispatch_analysis_stream};
use crate::sse::{SseFrames, SseHandler, parse_sse_stream};

/// An HTTP response whose body has not been read yet.
///
/// Returned by [`RequestClient::connect_stream`](crate::RequestClient::connect_stream)
/// and by transports. The body is `None` when the exchange cannot carry one
/// (`HEAD`, 204, 205, 304).
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<ByteStream>,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "ByteStream(..)"))
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Response {
    /// Create a new response from components
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Option<ByteStream>) -> Self {
        Self {
            status,
            headers,
            body,
            cancel: None,
        }
    }

    /// Create a response from buffered bytes
    #[must_use]
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(bytes) }));
        Self::new(status, headers, Some(stream))
    }

    /// Attach a token whose cancellation aborts pending body reads.
    #[must_use]
    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Get the HTTP status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Consume the response and return the entire body as bytes
    ///
    /// # Errors
    /// Propagates the first error yielded by the body stream, or
    /// [`ClientError::Cancelled`] if the attached token fires first.
    pub async fn bytes(self) -> Result<Bytes, ClientError> {
        let Some(mut stream) = self.body else {
            return Ok(Bytes::new());
        };
        let collect = async move {
            let mut buf = Vec::new();
            while let Some(chunk) = stream.next().await {
                buf.extend_from_slice(&chunk?);
            }
            Ok::<_, ClientError>(Bytes::from(buf))
        };
        match self.cancel {
            Some(token) => tokio::select! {
                () = token.cancelled() => Err(ClientError::Cancelled),
                result = collect => result,
            },
            None => collect.await,
        }
    }

    /// Consume the response and return the body as a string
    ///
    /// # Errors
    /// Same as [`Response::bytes`], plus [`ClientError::Stream`] for invalid UTF-8.
    pub async fn text(self) -> Result<String, ClientError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ClientError::Stream(format!("Invalid UTF-8: {e}")))
    }

    /// Consume the response and deserialize as JSON
    ///
    /// # Errors
    /// Same as [`Response::bytes`], plus [`ClientError::Serialization`].
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Pull-based access to the `data:` payloads of an event stream.
    ///
    /// # Errors
    /// Returns [`ClientError::Stream`] if the response has no body.
    pub fn into_sse_frames(self) -> Result<SseFrames, ClientError> {
        SseFrames::from_response(self)
    }

    /// Drive the body as SSE into `handler`. See [`parse_sse_stream`].
    ///
    /// # Errors
    /// See [`parse_sse_stream`].
    pub async fn parse_sse<H: SseHandler + ?Sized>(self, handler: &mut H) -> Result<(), ClientError> {
        parse_sse_stream(self, handler).await
    }

    /// Drive the body as an analysis event stream. See [`dispatch_analysis_stream`].
    ///
    /// # Errors
    /// See [`dispatch_analysis_stream`].
    pub async fn dispatch_analysis_events<H: AnalysisEventHandler + ?Sized>(
        self,
        handler: &mut H,
    ) -> Result<DispatchSummary, ClientError> {
        dispatch_analysis_stream(self, handler).await
    }

    pub(crate) fn into_body_parts(self) -> (Option<ByteStream>, Option<CancellationToken>) {
        (self.body, self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_bytes_concatenates_chunks() {
        let chunks: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]));
        let response = Response::new(StatusCode::OK, HeaderMap::new(), Some(chunks));
        assert_eq!(response.text().await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_missing_body_reads_as_empty() {
        let response = Response::new(StatusCode::NO_CONTENT, HeaderMap::new(), None);
        assert!(!response.has_body());
        assert!(response.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_read() {
        let pending: ByteStream = Box::pin(stream::pending());
        let token = CancellationToken::new();
        token.cancel();
        let response = Response::new(StatusCode::OK, HeaderMap::new(), Some(pending))
            .with_cancellation(Some(token));
        let err = response.bytes().await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }
}
