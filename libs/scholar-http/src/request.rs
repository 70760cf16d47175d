use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

use crate::error::ClientError;

/// A fully prepared request, as handed to interceptors and the transport.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl OutgoingRequest {
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Option<Bytes>) -> Self {
        self.body = body;
        self
    }

    /// Get the HTTP method
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the absolute request URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Interceptors use this to inject headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Insert or replace a header.
    ///
    /// # Errors
    /// Returns [`ClientError::BuildError`] for an invalid name or value.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ClientError> {
        let name = HeaderName::try_from(name)
            .map_err(|e| ClientError::BuildError(format!("Invalid header name: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| ClientError::BuildError(format!("Invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Method, String, HeaderMap, Option<Bytes>) {
        (self.method, self.url, self.headers, self.body)
    }
}

/// What response interceptors get to observe.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub method: Method,
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_header_replaces_value() {
        let mut request = OutgoingRequest::new(Method::GET, "http://localhost/api/projects");
        request.set_header("x-trace", "one").unwrap();
        request.set_header("x-trace", "two").unwrap();
        assert_eq!(request.headers().get("x-trace").unwrap(), "two");
        assert_eq!(request.headers().len(), 1);
    }

    #[test]
    fn test_set_header_rejects_invalid_name() {
        let mut request = OutgoingRequest::new(Method::GET, "http://localhost/");
        assert!(request.set_header("bad name", "v").is_err());
    }
}
