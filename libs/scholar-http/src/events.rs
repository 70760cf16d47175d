//! Typed events of the AI analysis stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;
use crate::response::Response;
use crate::sse::{FrameSink, drive};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStart {
    pub session_id: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStart {
    pub step: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepComplete {
    pub step: String,
    #[serde(default)]
    pub summary: Option<String>,
}

/// A structured result block, e.g. a gap table or a method comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_type: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDelta {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestions {
    #[serde(default)]
    pub items: Vec<String>,
}

/// An error reported in-band by the analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Done {
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// One analysis event, tagged on the wire by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    SessionStart(SessionStart),
    StepStart(StepStart),
    StepComplete(StepComplete),
    Block(Block),
    ContentDelta(ContentDelta),
    Suggestions(Suggestions),
    Error(ErrorEvent),
    Done(Done),
}

impl StreamEvent {
    /// The wire tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::SessionStart(_) => "session_start",
            StreamEvent::StepStart(_) => "step_start",
            StreamEvent::StepComplete(_) => "step_complete",
            StreamEvent::Block(_) => "block",
            StreamEvent::ContentDelta(_) => "content_delta",
            StreamEvent::Suggestions(_) => "suggestions",
            StreamEvent::Error(_) => "error",
            StreamEvent::Done(_) => "done",
        }
    }
}

/// One callback per event kind. Every method defaults to a no-op.
pub trait AnalysisEventHandler {
    fn on_session_start(&mut self, _event: SessionStart) {}
    fn on_step_start(&mut self, _event: StepStart) {}
    fn on_step_complete(&mut self, _event: StepComplete) {}
    fn on_block(&mut self, _event: Block) {}
    fn on_content_delta(&mut self, _event: ContentDelta) {}
    fn on_suggestions(&mut self, _event: Suggestions) {}
    fn on_error(&mut self, _event: ErrorEvent) {}
    fn on_done(&mut self, _event: Done) {}

    /// The connection failed or was cancelled mid-stream.
    fn on_stream_error(&mut self, _error: &ClientError) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: usize,
    /// Malformed payloads and unknown event types.
    pub skipped: usize,
}

struct Dispatcher<'a, H: ?Sized> {
    handler: &'a mut H,
    summary: DispatchSummary,
}

impl<H: AnalysisEventHandler + ?Sized> Dispatcher<'_, H> {
    fn dispatch(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::SessionStart(e) => self.handler.on_session_start(e),
            StreamEvent::StepStart(e) => self.handler.on_step_start(e),
            StreamEvent::StepComplete(e) => self.handler.on_step_complete(e),
            StreamEvent::Block(e) => self.handler.on_block(e),
            StreamEvent::ContentDelta(e) => self.handler.on_content_delta(e),
            StreamEvent::Suggestions(e) => self.handler.on_suggestions(e),
            StreamEvent::Error(e) => self.handler.on_error(e),
            StreamEvent::Done(e) => self.handler.on_done(e),
        }
    }
}

impl<H: AnalysisEventHandler + ?Sized> FrameSink for Dispatcher<'_, H> {
    fn on_data(&mut self, payload: String) {
        match serde_json::from_str::<StreamEvent>(&payload) {
            Ok(event) => {
                self.summary.dispatched += 1;
                self.dispatch(event);
            }
            Err(e) => {
                self.summary.skipped += 1;
                tracing::debug!(error = %e, "skipping unrecognised analysis event");
            }
        }
    }

    fn on_stream_error(&mut self, error: &ClientError) {
        self.handler.on_stream_error(error);
    }

    fn on_complete(&mut self) {
        tracing::debug!(
            dispatched = self.summary.dispatched,
            skipped = self.summary.skipped,
            "analysis stream complete"
        );
    }
}

/// Decode `response` as an analysis event stream and route each event to
/// its `handler` callback.
///
/// # Errors
/// Same stream-level failures as [`crate::parse_sse_stream`]; bad payloads
/// are skipped, not returned.
pub async fn dispatch_analysis_stream<H: AnalysisEventHandler + ?Sized>(
    response: Response,
    handler: &mut H,
) -> Result<DispatchSummary, ClientError> {
    let mut dispatcher = Dispatcher {
        handler,
        summary: DispatchSummary::default(),
    };
    drive(response, &mut dispatcher).await?;
    Ok(dispatcher.summary)
}
