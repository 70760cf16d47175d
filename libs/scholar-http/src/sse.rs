//! Incremental decoding of `text/event-stream` bodies.
//!
//! Only `data: ` lines carry payload. The literal payload `[DONE]` ends the
//! logical stream even when the connection still has bytes to deliver.
//! [`FrameDecoder`] does the byte-level work, [`SseFrames`] pulls payloads off
//! a response body, and [`FrameSink`] implementations decide what a payload
//! means: [`parse_sse_stream`] hands generic JSON to an [`SseHandler`], while
//! [`crate::dispatch_analysis_stream`] decodes typed analysis events.

use std::collections::VecDeque;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::body::ByteStream;
use crate::error::ClientError;
use crate::response::Response;

/// Terminal in-band payload.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &[u8] = b"data: ";

pub const NULL_BODY_MESSAGE: &str = "Response body is null";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    Done,
}

/// Splits arbitrary byte chunks into frames.
///
/// Lines are split on raw bytes and decoded only once complete, so a
/// multi-byte character cut across two reads is reassembled intact. Between
/// calls the buffer holds at most one incomplete line, and bytes already
/// searched for a newline are not searched again.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanned: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `chunk` and return every frame completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if let Some(frame) = decode_line(&self.buffer[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        frames
    }

    /// Bytes of the incomplete trailing line, if any.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &[u8]) -> Option<Frame> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = String::from_utf8_lossy(payload);
    if payload == DONE_SENTINEL {
        Some(Frame::Done)
    } else {
        Some(Frame::Data(payload.into_owned()))
    }
}

/// How a [`SseFrames`] reader finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Sentinel,
    Eof,
    Failed,
}

/// Pull-based reader of `data:` payloads.
///
/// Owns the response body and drops it as soon as the stream ends: on the
/// sentinel, at end of input, or on the first read error.
pub struct SseFrames {
    body: Option<ByteStream>,
    cancel: Option<CancellationToken>,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    end: Option<StreamEnd>,
}

impl std::fmt::Debug for SseFrames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseFrames")
            .field("open", &self.body.is_some())
            .field("decoder", &self.decoder)
            .field("ready", &self.ready.len())
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl SseFrames {
    #[must_use]
    pub fn new(body: ByteStream, cancel: Option<CancellationToken>) -> Self {
        Self {
            body: Some(body),
            cancel,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            end: None,
        }
    }

    /// # Errors
    /// Returns [`ClientError::Stream`] when the response carries no body.
    pub fn from_response(response: Response) -> Result<Self, ClientError> {
        let (body, cancel) = response.into_body_parts();
        let body = body.ok_or_else(|| ClientError::Stream(NULL_BODY_MESSAGE.to_owned()))?;
        Ok(Self::new(body, cancel))
    }

    /// Next payload, or `None` once the sentinel or end of input is reached.
    ///
    /// # Errors
    /// Propagates body read failures and [`ClientError::Cancelled`] when the
    /// attached token fires. The body is released before returning.
    pub async fn next_payload(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                match frame {
                    Frame::Data(payload) => return Ok(Some(payload)),
                    Frame::Done => {
                        self.release(StreamEnd::Sentinel);
                        return Ok(None);
                    }
                }
            }

            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };
            let next = match &self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    () = token.cancelled() => Some(Err(ClientError::Cancelled)),
                    chunk = body.next() => chunk,
                },
                None => body.next().await,
            };

            match next {
                Some(Ok(chunk)) => self.ready.extend(self.decoder.feed(&chunk)),
                Some(Err(err)) => {
                    self.release(StreamEnd::Failed);
                    return Err(err);
                }
                None => {
                    if self.decoder.pending() > 0 {
                        tracing::debug!(bytes = self.decoder.pending(), "discarding incomplete trailing SSE line");
                    }
                    self.release(StreamEnd::Eof);
                    return Ok(None);
                }
            }
        }
    }

    #[must_use]
    pub fn end(&self) -> Option<StreamEnd> {
        self.end
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.body.is_none()
    }

    fn release(&mut self, end: StreamEnd) {
        self.body = None;
        self.ready.clear();
        self.end = Some(end);
    }
}

/// Receives decoded payloads from [`drive`].
pub trait FrameSink {
    fn on_data(&mut self, payload: String);

    /// The stream failed, or could not be opened.
    fn on_stream_error(&mut self, error: &ClientError);

    /// Sentinel or end of input; the body has already been released.
    fn on_complete(&mut self);
}

/// Feed every payload of `response` into `sink` until the stream ends.
///
/// # Errors
/// [`ClientError::Stream`] for a response without a body, otherwise the read
/// failure that ended the stream. `sink.on_stream_error` is invoked first.
pub async fn drive<S: FrameSink + ?Sized>(response: Response, sink: &mut S) -> Result<(), ClientError> {
    let mut frames = match SseFrames::from_response(response) {
        Ok(frames) => frames,
        Err(err) => {
            sink.on_stream_error(&err);
            return Err(err);
        }
    };

    loop {
        match frames.next_payload().await {
            Ok(Some(payload)) => sink.on_data(payload),
            Ok(None) => {
                tracing::debug!(end = ?frames.end(), "event stream finished");
                sink.on_complete();
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(error = %err, "event stream failed");
                sink.on_stream_error(&err);
                return Err(err);
            }
        }
    }
}

/// A generic SSE payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SseMessage {
    Json(Value),
    /// Payload that is not valid JSON, delivered verbatim.
    Raw(String),
}

pub trait SseHandler {
    fn on_message(&mut self, message: SseMessage);

    fn on_error(&mut self, _error: &ClientError) {}

    fn on_complete(&mut self) {}
}

struct JsonSink<'a, H: ?Sized> {
    handler: &'a mut H,
}

impl<H: SseHandler + ?Sized> FrameSink for JsonSink<'_, H> {
    fn on_data(&mut self, payload: String) {
        match serde_json::from_str::<Value>(&payload) {
            Ok(value) => self.handler.on_message(SseMessage::Json(value)),
            Err(e) => {
                tracing::warn!(error = %e, "SSE payload is not valid JSON; delivering raw text");
                self.handler.on_error(&ClientError::from(e));
                self.handler.on_message(SseMessage::Raw(payload));
            }
        }
    }

    fn on_stream_error(&mut self, error: &ClientError) {
        self.handler.on_error(error);
    }

    fn on_complete(&mut self) {
        self.handler.on_complete();
    }
}

/// Decode `response` as an event stream, parsing each payload as JSON.
///
/// Malformed payloads are reported through `on_error` and still delivered as
/// [`SseMessage::Raw`]. `on_complete` fires on the sentinel or end of input.
///
/// # Errors
/// See [`drive`].
pub async fn parse_sse_stream<H: SseHandler + ?Sized>(response: Response, handler: &mut H) -> Result<(), ClientError> {
    drive(response, &mut JsonSink { handler }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use http::{HeaderMap, StatusCode};
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Recorder {
        messages: Vec<SseMessage>,
        errors: Vec<String>,
        completed: usize,
    }

    impl SseHandler for Recorder {
        fn on_message(&mut self, message: SseMessage) {
            self.messages.push(message);
        }

        fn on_error(&mut self, error: &ClientError) {
            self.errors.push(error.to_string());
        }

        fn on_complete(&mut self) {
            self.completed += 1;
        }
    }

    fn response(chunks: Vec<Result<&'static str, ClientError>>) -> Response {
        let body: ByteStream = Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|s| Bytes::from_static(s.as_bytes()))),
        ));
        Response::new(StatusCode::OK, HeaderMap::new(), Some(body))
    }

    fn feed_all(chunks: &[&[u8]]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        chunks.iter().flat_map(|c| decoder.feed(c)).collect()
    }

    #[test]
    fn test_split_points_do_not_change_frames() {
        let wire: &[u8] = b"data: {\"a\":1}\n\nevent: ping\ndata: {\"b\":2}\r\n\r\ndata: [DONE]\n\n";
        let whole = feed_all(&[wire]);
        assert_eq!(
            whole,
            vec![
                Frame::Data(r#"{"a":1}"#.to_owned()),
                Frame::Data(r#"{"b":2}"#.to_owned()),
                Frame::Done,
            ]
        );
        for split in 1..wire.len() {
            let (head, tail) = wire.split_at(split);
            assert_eq!(feed_all(&[head, tail]), whole, "split at {split}");
        }
        let bytewise: Vec<&[u8]> = wire.chunks(1).collect();
        assert_eq!(feed_all(&bytewise), whole);
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let wire: &[u8] = b"data: {\"title\":\"Gr\xc3\xb6\xc3\x9fe\"}\n";
        let cut = wire.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let frames = feed_all(&[&wire[..cut], &wire[cut..]]);
        assert_eq!(frames, vec![Frame::Data("{\"title\":\"Gr\u{f6}\u{df}e\"}".to_owned())]);
    }

    #[test]
    fn test_buffer_keeps_only_trailing_line() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(b"data: one\ndata: tw").len(), 1);
        assert_eq!(decoder.pending(), "data: tw".len());
        assert_eq!(decoder.feed(b"o\n"), vec![Frame::Data("two".to_owned())]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_long_line_in_small_chunks_is_scanned_once() {
        let payload = "x".repeat(64 * 1024);
        let wire = format!("data: {payload}\r\ndata: next\n");
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in wire.as_bytes().chunks(7) {
            frames.extend(decoder.feed(chunk));
            assert_eq!(decoder.scanned, decoder.pending());
        }
        assert_eq!(frames, vec![Frame::Data(payload), Frame::Data("next".to_owned())]);
        assert_eq!(decoder.pending(), 0);
    }

    #[tokio::test]
    async fn test_content_then_done() {
        let mut recorder = Recorder::default();
        parse_sse_stream(
            response(vec![
                Ok("data: {\"type\":\"content\",\"content\":\"Hello\"}\n\n"),
                Ok("data: [DONE]\n\n"),
            ]),
            &mut recorder,
        )
        .await
        .unwrap();
        assert_eq!(
            recorder.messages,
            vec![SseMessage::Json(json!({"type": "content", "content": "Hello"}))]
        );
        assert_eq!(recorder.completed, 1);
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test]
    async fn test_done_stops_before_remaining_bytes() {
        let mut recorder = Recorder::default();
        parse_sse_stream(
            response(vec![
                Ok("data: [DONE]\n\ndata: {\"late\":true}\n\n"),
                Err(ClientError::Connection("must not be read".to_owned())),
            ]),
            &mut recorder,
        )
        .await
        .unwrap();
        assert!(recorder.messages.is_empty());
        assert!(recorder.errors.is_empty());
        assert_eq!(recorder.completed, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_surfaced() {
        let mut recorder = Recorder::default();
        parse_sse_stream(response(vec![Ok("data: {not json\n\n")]), &mut recorder)
            .await
            .unwrap();
        assert_eq!(recorder.errors.len(), 1);
        assert_eq!(recorder.messages, vec![SseMessage::Raw("{not json".to_owned())]);
        assert_eq!(recorder.completed, 1);
    }

    #[tokio::test]
    async fn test_incomplete_tail_is_discarded_at_eof() {
        let mut recorder = Recorder::default();
        parse_sse_stream(response(vec![Ok("data: {\"a\":1}\ndata: {\"b\"")]), &mut recorder)
            .await
            .unwrap();
        assert_eq!(recorder.messages, vec![SseMessage::Json(json!({"a": 1}))]);
        assert_eq!(recorder.completed, 1);
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal() {
        let mut recorder = Recorder::default();
        let err = parse_sse_stream(
            response(vec![
                Ok("data: {\"a\":1}\n"),
                Err(ClientError::Connection("reset by peer".to_owned())),
            ]),
            &mut recorder,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
        assert_eq!(recorder.messages.len(), 1);
        assert_eq!(recorder.errors.len(), 1);
        assert_eq!(recorder.completed, 0);
    }

    #[tokio::test]
    async fn test_null_body() {
        let mut recorder = Recorder::default();
        let err = parse_sse_stream(
            Response::new(StatusCode::NO_CONTENT, HeaderMap::new(), None),
            &mut recorder,
        )
        .await
        .unwrap_err();
        assert!(matches!(&err, ClientError::Stream(msg) if msg == NULL_BODY_MESSAGE));
        assert_eq!(recorder.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_releases_reader() {
        let token = CancellationToken::new();
        let body: ByteStream = Box::pin(stream::pending());
        let mut frames = SseFrames::new(body, Some(token.clone()));
        token.cancel();

        let err = frames.next_payload().await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(frames.is_released());
        assert_eq!(frames.end(), Some(StreamEnd::Failed));
        assert_eq!(frames.next_payload().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pull_reader_reports_sentinel() {
        let mut frames = SseFrames::from_response(response(vec![Ok("data: x\ndata: [DONE]\n")])).unwrap();
        assert_eq!(frames.next_payload().await.unwrap().as_deref(), Some("x"));
        assert_eq!(frames.next_payload().await.unwrap(), None);
        assert_eq!(frames.end(), Some(StreamEnd::Sentinel));
        assert!(frames.is_released());
    }
}
