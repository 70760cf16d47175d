use futures::TryStreamExt;
use http::{Method, StatusCode};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::request::OutgoingRequest;
use crate::response::Response;

/// One network exchange: send the request, return status, headers and the
/// unread body. Retries, timeouts and classification live above this seam.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    /// # Errors
    /// [`ClientError::Connection`] when no response was received.
    async fn send(&self, request: OutgoingRequest) -> Result<Response, ClientError>;
}

/// Production transport backed by `reqwest` with a cookie store, so the
/// session cookie is included on every call.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// # Errors
    /// Returns [`ClientError::BuildError`] if the underlying client cannot be
    /// constructed (e.g. TLS backend initialisation fails).
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder().cookie_store(config.cookie_store);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        let http_client = builder
            .build()
            .map_err(|e| ClientError::BuildError(e.to_string()))?;
        Ok(Self { http_client })
    }

    /// Wrap an already configured client.
    #[must_use]
    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<Response, ClientError> {
        let (method, url, headers, body) = request.into_parts();
        let is_head = method == Method::HEAD;

        let mut req_builder = self.http_client.request(method, &url).headers(headers);
        if let Some(body) = body {
            req_builder = req_builder.body(body);
        }

        let resp = req_builder.send().await.map_err(map_send_error)?;

        let status = resp.status();
        let headers = resp.headers().clone();

        if is_head || forbids_body(status) {
            return Ok(Response::new(status, headers, None));
        }

        let stream = resp
            .bytes_stream()
            .map_err(|e| ClientError::Connection(format!("body read failed: {e}")));

        Ok(Response::new(status, headers, Some(Box::pin(stream))))
    }
}

fn map_send_error(e: reqwest::Error) -> ClientError {
    if e.is_builder() {
        ClientError::BuildError(e.to_string())
    } else if e.is_connect() {
        ClientError::Connection(format!("connect failed: {e}"))
    } else {
        ClientError::Connection(e.to_string())
    }
}

/// Statuses for which a response never carries a body.
fn forbids_body(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT | StatusCode::NOT_MODIFIED
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbids_body() {
        assert!(forbids_body(StatusCode::NO_CONTENT));
        assert!(forbids_body(StatusCode::NOT_MODIFIED));
        assert!(!forbids_body(StatusCode::OK));
        assert!(!forbids_body(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_transport_creation() {
        let config = ClientConfig::remote("http://localhost:8080");
        assert!(ReqwestTransport::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_url_is_build_error() {
        let transport = ReqwestTransport::new(&ClientConfig::default()).unwrap();
        let err = transport
            .send(OutgoingRequest::new(Method::GET, "not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BuildError(_)));
    }
}
