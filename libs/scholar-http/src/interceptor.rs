//! Ordered request/response observers.
//!
//! Interceptors run sequentially in registration order. A failing or
//! panicking interceptor is logged and skipped; it never blocks the call or
//! the interceptors registered after it.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::RwLock;

use crate::request::{OutgoingRequest, ResponseInfo};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait::async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// May rewrite headers before the request is sent.
    ///
    /// # Errors
    /// Any error is logged and the request proceeds unchanged by this
    /// interceptor.
    async fn on_request(&self, request: &mut OutgoingRequest) -> Result<(), BoxError>;
}

#[async_trait::async_trait]
pub trait ResponseInterceptor: Send + Sync {
    /// # Errors
    /// Logged and ignored.
    async fn on_response(&self, response: &ResponseInfo) -> Result<(), BoxError>;
}

/// Adapts a synchronous closure into a [`RequestInterceptor`].
pub struct RequestFn<F>(F);

/// Adapts a synchronous closure into a [`ResponseInterceptor`].
pub struct ResponseFn<F>(F);

#[must_use]
pub fn request_fn<F>(f: F) -> RequestFn<F>
where
    F: Fn(&mut OutgoingRequest) -> Result<(), BoxError> + Send + Sync,
{
    RequestFn(f)
}

#[must_use]
pub fn response_fn<F>(f: F) -> ResponseFn<F>
where
    F: Fn(&ResponseInfo) -> Result<(), BoxError> + Send + Sync,
{
    ResponseFn(f)
}

#[async_trait::async_trait]
impl<F> RequestInterceptor for RequestFn<F>
where
    F: Fn(&mut OutgoingRequest) -> Result<(), BoxError> + Send + Sync,
{
    async fn on_request(&self, request: &mut OutgoingRequest) -> Result<(), BoxError> {
        (self.0)(request)
    }
}

#[async_trait::async_trait]
impl<F> ResponseInterceptor for ResponseFn<F>
where
    F: Fn(&ResponseInfo) -> Result<(), BoxError> + Send + Sync,
{
    async fn on_response(&self, response: &ResponseInfo) -> Result<(), BoxError> {
        (self.0)(response)
    }
}

struct DebugRequestLogger;
struct DebugResponseLogger;

#[async_trait::async_trait]
impl RequestInterceptor for DebugRequestLogger {
    async fn on_request(&self, request: &mut OutgoingRequest) -> Result<(), BoxError> {
        tracing::debug!(method = %request.method(), url = request.url(), "api request");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResponseInterceptor for DebugResponseLogger {
    async fn on_response(&self, response: &ResponseInfo) -> Result<(), BoxError> {
        tracing::debug!(
            method = %response.method,
            url = %response.url,
            status = response.status.as_u16(),
            "api response"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Request,
    Response,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    request: RwLock<Vec<(u64, Arc<dyn RequestInterceptor>)>>,
    response: RwLock<Vec<(u64, Arc<dyn ResponseInterceptor>)>>,
}

impl Registry {
    fn remove(&self, slot: Slot, id: u64) {
        match slot {
            Slot::Request => self.request.write().retain(|(entry, _)| *entry != id),
            Slot::Response => self.response.write().retain(|(entry, _)| *entry != id),
        }
    }
}

/// Removes the interceptor(s) it was returned for. Dropping it without calling
/// [`Disposer::dispose`] leaves them registered.
#[derive(Debug)]
#[must_use = "keep the disposer to be able to unregister the interceptor"]
pub struct Disposer {
    registry: Weak<Registry>,
    entries: Vec<(Slot, u64)>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("request", &self.request.read().len())
            .field("response", &self.response.read().len())
            .finish_non_exhaustive()
    }
}

impl Disposer {
    pub fn dispose(self) {
        if let Some(registry) = self.registry.upgrade() {
            for (slot, id) in self.entries {
                registry.remove(slot, id);
            }
        }
    }

    /// Combine two disposers into one that removes both sets of entries.
    pub fn merge(mut self, other: Disposer) -> Disposer {
        self.entries.extend(other.entries);
        self
    }
}

/// Shared, ordered interceptor lists. Cloning shares the same lists.
#[derive(Debug, Clone, Default)]
pub struct InterceptorChain {
    registry: Arc<Registry>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request_interceptor<I>(&self, interceptor: I) -> Disposer
    where
        I: RequestInterceptor + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.request.write().push((id, Arc::new(interceptor)));
        self.disposer(Slot::Request, id)
    }

    pub fn add_response_interceptor<I>(&self, interceptor: I) -> Disposer
    where
        I: ResponseInterceptor + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.response.write().push((id, Arc::new(interceptor)));
        self.disposer(Slot::Response, id)
    }

    /// Log method, URL and status of every call at `debug` level.
    pub fn enable_debug_logging(&self) -> Disposer {
        self.add_request_interceptor(DebugRequestLogger)
            .merge(self.add_response_interceptor(DebugResponseLogger))
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.registry.request.read().len()
    }

    #[must_use]
    pub fn response_count(&self) -> usize {
        self.registry.response.read().len()
    }

    pub(crate) async fn run_request(&self, request: &mut OutgoingRequest) {
        let snapshot: Vec<_> = self
            .registry
            .request
            .read()
            .iter()
            .map(|(_, i)| Arc::clone(i))
            .collect();

        for interceptor in snapshot {
            match AssertUnwindSafe(interceptor.on_request(request)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, url = request.url(), "request interceptor failed");
                }
                Err(_) => {
                    tracing::warn!(url = request.url(), "request interceptor panicked");
                }
            }
        }
    }

    pub(crate) async fn run_response(&self, response: &ResponseInfo) {
        let snapshot: Vec<_> = self
            .registry
            .response
            .read()
            .iter()
            .map(|(_, i)| Arc::clone(i))
            .collect();

        for interceptor in snapshot {
            match AssertUnwindSafe(interceptor.on_response(response)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, url = %response.url, "response interceptor failed");
                }
                Err(_) => {
                    tracing::warn!(url = %response.url, "response interceptor panicked");
                }
            }
        }
    }

    fn disposer(&self, slot: Slot, id: u64) -> Disposer {
        Disposer {
            registry: Arc::downgrade(&self.registry),
            entries: vec![(slot, id)],
        }
    }
}
