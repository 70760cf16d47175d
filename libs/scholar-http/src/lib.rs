//! Scholar HTTP client
//!
//! The one request layer behind every feature of the Scholar research
//! workspace. It owns retry with capped exponential backoff,
//! timeout/cancellation, detection of invalidated sessions, request/response
//! interceptors and content negotiation, and it decodes the server-sent event
//! streams produced by the AI analysis service.
//!
//! # Examples
//!
//! ## Requests
//!
//! ```no_run
//! use scholar_http::{ClientConfig, RequestClient, RequestOptions};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RequestClient::new(ClientConfig::remote("http://localhost:8000/api"))?;
//! client.set_logout_handler(|| eprintln!("session expired"));
//!
//! let project = client
//!     .post_json("/projects", &json!({"name": "Thesis"}), RequestOptions::new())
//!     .await?;
//! println!("{:?}", project.as_json());
//! # Ok(())
//! # }
//! ```
//!
//! ## Analysis streams
//!
//! ```no_run
//! use scholar_http::{
//!     AnalysisEventHandler, ClientConfig, ContentDelta, RequestClient, RequestOptions,
//! };
//! use serde_json::json;
//!
//! struct Printer;
//!
//! impl AnalysisEventHandler for Printer {
//!     fn on_content_delta(&mut self, event: ContentDelta) {
//!         print!("{}", event.content);
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RequestClient::from_env()?;
//! let summary = client
//!     .stream_analysis("/analysis/gaps", &json!({"project_id": 7}), RequestOptions::new(), &mut Printer)
//!     .await?;
//! println!("\n{} events", summary.dispatched);
//! # Ok(())
//! # }
//! ```

mod auth;
mod body;
mod classify;
mod client;
mod config;
mod error;
mod events;
mod interceptor;
mod negotiate;
mod options;
mod request;
mod response;
mod retry;
mod sse;
mod transport;

pub use auth::AuthGate;
pub use body::{BoxStream, ByteStream, RequestBody};
pub use classify::classify_error;
pub use client::RequestClient;
pub use config::{ClientConfig, ENV_PREFIX};
pub use error::{ApiError, ClientError};
pub use events::{
    AnalysisEventHandler, Block, ContentDelta, DispatchSummary, Done, ErrorEvent, SessionStart, StepComplete,
    StepStart, StreamEvent, Suggestions, Usage, dispatch_analysis_stream,
};
pub use interceptor::{
    BoxError, Disposer, InterceptorChain, RequestFn, RequestInterceptor, ResponseFn, ResponseInterceptor,
    request_fn, response_fn,
};
pub use negotiate::{ResponseBody, negotiate_body};
pub use options::{ExpectedContentType, RequestOptions};
pub use request::{OutgoingRequest, ResponseInfo};
pub use response::Response;
pub use retry::RetryPolicy;
pub use sse::{
    DONE_SENTINEL, Frame, FrameDecoder, FrameSink, SseFrames, SseHandler, SseMessage, StreamEnd, drive,
    parse_sse_stream,
};
pub use transport::{HttpTransport, ReqwestTransport};

// Re-export commonly used types from dependencies
pub use http::{HeaderMap, HeaderValue, Method, StatusCode};
pub use tokio_util::sync::CancellationToken;
