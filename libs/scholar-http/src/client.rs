use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, header};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::AuthGate;
use crate::body::RequestBody;
use crate::classify::classify_error;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{AnalysisEventHandler, DispatchSummary};
use crate::interceptor::{Disposer, InterceptorChain, RequestInterceptor, ResponseInterceptor};
use crate::negotiate::{ResponseBody, negotiate_body};
use crate::options::{RequestOptions, ResolvedOptions};
use crate::request::{OutgoingRequest, ResponseInfo};
use crate::response::Response;
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, ReqwestTransport};

/// The single entry point every feature uses to talk to the backend.
///
/// Owns the transport, the interceptor lists and the auth gate; share it
/// behind an `Arc`. Each call resolves its own [`RequestOptions`], so calls
/// never share timers, retry counters or cancellation tokens.
pub struct RequestClient {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    interceptors: InterceptorChain,
    auth: AuthGate,
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("config", &self.config)
            .field("interceptors", &self.interceptors)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl RequestClient {
    /// Create client from configuration
    ///
    /// # Errors
    /// Returns [`ClientError::Config`] for an invalid base URL and
    /// [`ClientError::BuildError`] if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// # Errors
    /// See [`ClientConfig::from_env`] and [`RequestClient::new`].
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Build a client over a custom transport.
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            interceptors: InterceptorChain::new(),
            auth: AuthGate::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    pub fn add_request_interceptor<I>(&self, interceptor: I) -> Disposer
    where
        I: RequestInterceptor + 'static,
    {
        self.interceptors.add_request_interceptor(interceptor)
    }

    pub fn add_response_interceptor<I>(&self, interceptor: I) -> Disposer
    where
        I: ResponseInterceptor + 'static,
    {
        self.interceptors.add_response_interceptor(interceptor)
    }

    pub fn enable_debug_logging(&self) -> Disposer {
        self.interceptors.enable_debug_logging()
    }

    /// Register the callback invoked when the session is invalidated by a
    /// 401/403. Replaces any previous handler.
    pub fn set_logout_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.auth.set_handler(handler);
    }

    pub fn clear_logout_handler(&self) {
        self.auth.clear_handler();
    }

    /// Called by the authentication feature after a successful login so the
    /// next session invalidation triggers the logout handler again.
    pub fn mark_session_restored(&self) {
        self.auth.reset();
    }

    #[must_use]
    pub fn is_session_invalidated(&self) -> bool {
        self.auth.is_session_invalidated()
    }

    /// Absolute `http(s)` URLs pass through; anything else is appended to the
    /// configured base URL.
    #[must_use]
    pub fn resolve_url(&self, path: &str) -> String {
        if Url::parse(path).is_ok_and(|u| matches!(u.scheme(), "http" | "https")) {
            return path.to_owned();
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_owned()
        } else {
            format!("{base}/{path}")
        }
    }

    /// # Errors
    /// See [`RequestClient::execute`].
    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<ResponseBody, ClientError> {
        self.execute(Method::GET, path, RequestBody::Empty, options).await
    }

    /// # Errors
    /// See [`RequestClient::execute`].
    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<ResponseBody, ClientError> {
        self.execute(Method::DELETE, path, RequestBody::Empty, options).await
    }

    /// # Errors
    /// See [`RequestClient::execute`].
    pub async fn post(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.execute(Method::POST, path, body.into(), options).await
    }

    /// # Errors
    /// See [`RequestClient::execute`].
    pub async fn put(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.execute(Method::PUT, path, body.into(), options).await
    }

    /// # Errors
    /// See [`RequestClient::execute`].
    pub async fn patch(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.execute(Method::PATCH, path, body.into(), options).await
    }

    /// POST any serializable payload as JSON.
    ///
    /// # Errors
    /// [`ClientError::Serialization`] if the payload cannot be encoded, else
    /// see [`RequestClient::execute`].
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &B,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.execute(Method::POST, path, RequestBody::json(payload)?, options).await
    }

    /// # Errors
    /// See [`RequestClient::post_json`].
    pub async fn put_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &B,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.execute(Method::PUT, path, RequestBody::json(payload)?, options).await
    }

    /// # Errors
    /// See [`RequestClient::post_json`].
    pub async fn patch_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &B,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        self.execute(Method::PATCH, path, RequestBody::json(payload)?, options).await
    }

    /// Perform one logical call, retrying transport failures and 5xx
    /// responses with capped exponential backoff.
    ///
    /// # Errors
    /// - [`ClientError::Authentication`] for 401/403 (unless `skip_auth_check`)
    /// - [`ClientError::Api`] for every other non-2xx status and for invalid
    ///   JSON on a 2xx response
    /// - [`ClientError::Timeout`] / [`ClientError::Cancelled`] when the
    ///   internal timer or the caller's token fires
    /// - [`ClientError::Connection`] once transport retries are exhausted
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<ResponseBody, ClientError> {
        let call = self.prepare(method, path, body, options);
        let policy = RetryPolicy::new(call.options.retries);
        let mut attempt = 0;

        loop {
            match self.attempt(&call).await {
                Ok(value) => return Ok(value),
                Err(err) if policy.should_retry(&err, attempt) => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        method = %call.method,
                        url = %call.url,
                        attempt = attempt + 1,
                        max_attempts = policy.max_retries() + 1,
                        delay = ?delay,
                        error = %err,
                        "request failed; retrying"
                    );
                    backoff(delay, call.options.signal.as_ref()).await?;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::debug!(method = %call.method, url = %call.url, error = %err, "request failed");
                    return Err(err);
                }
            }
        }
    }

    /// Open a streaming response.
    ///
    /// Same pre-flight and failure classification as [`RequestClient::execute`]
    /// but no retries, and the body is returned unread. The timeout bounds
    /// connection establishment; the caller's token stays attached to the
    /// response and cancels pending reads.
    ///
    /// # Errors
    /// Same failure classes as [`RequestClient::execute`], surfaced on the
    /// first attempt.
    pub async fn connect_stream(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<Response, ClientError> {
        let call = self.prepare(method, path, body, options);
        let signal = call.options.signal.as_ref();

        let mut request = call.request(true);
        self.interceptors.run_request(&mut request).await;

        let response = connecting(self.transport.send(request), signal, call.options.timeout).await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let bytes = match connecting(response.bytes(), signal, call.options.timeout).await {
                Ok(bytes) => bytes,
                Err(err) if err.is_cancellation() => return Err(err),
                Err(_) => Bytes::new(),
            };
            let err = self.failure(status, &headers, &bytes, &call.options);
            tracing::debug!(method = %call.method, url = %call.url, error = %err, "stream connection rejected");
            return Err(err);
        }

        let info = ResponseInfo {
            method: call.method,
            url: call.url,
            status,
            headers: response.headers().clone(),
        };
        self.interceptors.run_response(&info).await;
        tracing::debug!(url = %info.url, status = status.as_u16(), "stream connected");

        Ok(response.with_cancellation(call.options.signal))
    }

    /// POST `payload` to an analysis endpoint and dispatch its event stream.
    ///
    /// # Errors
    /// Connection failures as in [`RequestClient::connect_stream`], stream
    /// failures as in [`crate::dispatch_analysis_stream`].
    pub async fn stream_analysis<B, H>(
        &self,
        path: &str,
        payload: &B,
        options: RequestOptions,
        handler: &mut H,
    ) -> Result<DispatchSummary, ClientError>
    where
        B: Serialize + ?Sized,
        H: AnalysisEventHandler + ?Sized,
    {
        let response = self
            .connect_stream(Method::POST, path, RequestBody::json(payload)?, options)
            .await?;
        response.dispatch_analysis_events(handler).await
    }

    fn prepare(&self, method: Method, path: &str, body: RequestBody, options: RequestOptions) -> Call {
        Call {
            method,
            url: self.resolve_url(path),
            body: body.into_bytes(),
            options: options.resolve(&self.config),
        }
    }

    async fn attempt(&self, call: &Call) -> Result<ResponseBody, ClientError> {
        let mut request = call.request(false);
        self.interceptors.run_request(&mut request).await;

        let exchange = async {
            let response = self.transport.send(request).await?;
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response.bytes().await?;
            Ok::<_, ClientError>((status, headers, bytes))
        };
        let (status, headers, bytes) =
            guarded(exchange, call.options.signal.as_ref(), call.options.timeout).await?;

        if !status.is_success() {
            return Err(self.failure(status, &headers, &bytes, &call.options));
        }

        let value = negotiate_body(status, &headers, bytes, call.options.expected_content_type)?;

        let info = ResponseInfo {
            method: call.method.clone(),
            url: call.url.clone(),
            status,
            headers,
        };
        self.interceptors.run_response(&info).await;

        Ok(value)
    }

    /// Auth gate first, then the classifier.
    fn failure(
        &self,
        status: http::StatusCode,
        headers: &HeaderMap,
        body: &[u8],
        options: &ResolvedOptions,
    ) -> ClientError {
        if let Some(err) = self.auth.inspect(status, body, options.skip_auth_check) {
            return err;
        }
        ClientError::Api(classify_error(status, headers, body, options.preserve_error_detail))
    }
}

/// One logical call: target, payload and resolved options.
struct Call {
    method: Method,
    url: String,
    body: Option<Bytes>,
    options: ResolvedOptions,
}

impl Call {
    /// Fresh request for one attempt. Caller headers replace the defaults.
    fn request(&self, streaming: bool) -> OutgoingRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if streaming {
            headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        for name in self.options.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &self.options.headers {
            headers.append(name.clone(), value.clone());
        }

        OutgoingRequest::new(self.method.clone(), self.url.as_str())
            .with_headers(headers)
            .with_body(self.body.clone())
    }
}

/// Run `work` under the caller's token, or under `timeout` when there is none.
async fn guarded<T, F>(
    work: F,
    signal: Option<&CancellationToken>,
    timeout: Duration,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match signal {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => Err(ClientError::Cancelled),
            result = work => result,
        },
        None => tokio::time::timeout(timeout, work)
            .await
            .unwrap_or(Err(ClientError::Timeout(timeout))),
    }
}

/// Stream connection phase: bounded by `timeout` whether or not the caller
/// also supplied a token.
async fn connecting<T, F>(
    work: F,
    signal: Option<&CancellationToken>,
    timeout: Duration,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    let bounded = async {
        tokio::time::timeout(timeout, work)
            .await
            .unwrap_or(Err(ClientError::Timeout(timeout)))
    };
    let Some(token) = signal else {
        return bounded.await;
    };
    tokio::select! {
        biased;
        () = token.cancelled() => Err(ClientError::Cancelled),
        result = bounded => result,
    }
}

async fn backoff(delay: Duration, signal: Option<&CancellationToken>) -> Result<(), ClientError> {
    let Some(token) = signal else {
        tokio::time::sleep(delay).await;
        return Ok(());
    };
    tokio::select! {
        biased;
        () = token.cancelled() => Err(ClientError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
