//! Server-Sent-Events decoding for streaming workflow execution.
//!
//! Frames are `data: <json>` lines terminated by a blank line. The decoder
//! buffers bytes across network chunks, so a frame (or a multi-byte character)
//! split at any boundary is reassembled before parsing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    errors::{Error, Result},
    ids::{ExecutionId, NodeId},
    types::NodeOutputs,
};

/// Largest incomplete frame the decoder buffers before giving up.
pub const MAX_PENDING_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[cfg(feature = "streaming")]
use std::{
    collections::VecDeque,
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

#[cfg(feature = "streaming")]
use futures_core::Stream;
#[cfg(feature = "streaming")]
use futures_util::{stream, StreamExt};

#[cfg(feature = "streaming")]
use crate::{errors::TransportError, http::request_id_from_headers};

/// One complete SSE frame before JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFrame {
    pub event: String,
    pub data: String,
}

/// Progress event of a streaming execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    WorkflowStart {
        #[serde(default)]
        execution_id: Option<ExecutionId>,
        #[serde(default)]
        total_nodes: Option<u32>,
    },
    NodeStart {
        node_id: NodeId,
        #[serde(default)]
        node_type: String,
    },
    NodeComplete {
        node_id: NodeId,
        #[serde(default)]
        node_type: String,
        #[serde(default)]
        outputs: NodeOutputs,
        #[serde(default)]
        execution_time_ms: Option<f64>,
    },
    NodeError {
        node_id: NodeId,
        #[serde(default)]
        node_type: String,
        error: String,
    },
    WorkflowComplete {
        #[serde(default = "default_true")]
        success: bool,
        #[serde(default)]
        workflow_outputs: Map<String, Value>,
        #[serde(default)]
        total_execution_time_ms: Option<f64>,
        #[serde(default)]
        execution_id: Option<ExecutionId>,
        #[serde(default)]
        persistence_warning: Option<String>,
    },
    WorkflowError {
        error: String,
        #[serde(default)]
        execution_id: Option<ExecutionId>,
    },
}

fn default_true() -> bool {
    true
}

impl ExecutionEvent {
    /// Whether this event ends the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::WorkflowComplete { .. } | ExecutionEvent::WorkflowError { .. }
        )
    }
}

/// Incremental SSE frame decoder.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    max_pending: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that fails once an unterminated frame exceeds `max_pending` bytes.
    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_pending,
        }
    }

    /// Append a network chunk and return every frame it completed.
    ///
    /// Errors with [`Error::StreamProtocol`] when the bytes left after the
    /// last complete frame exceed the decoder's limit; the buffer is dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawFrame>> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut frames = Vec::new();
        while let Some(idx) = find_frame_end(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..idx + 2).collect();
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&block[..idx])) {
                frames.push(frame);
            }
        }
        if self.buffer.len() > self.max_pending {
            let pending = self.buffer.len();
            self.buffer = Vec::new();
            return Err(Error::StreamProtocol {
                message: format!(
                    "unterminated SSE frame exceeds {} bytes ({pending} buffered)",
                    self.max_pending
                ),
                raw_data: None,
            });
        }
        Ok(frames)
    }

    /// Decode whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<RawFrame> {
        let rest = std::mem::take(&mut self.buffer);
        parse_frame(&String::from_utf8_lossy(&rest))
    }

    pub fn has_pending(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_frame(block: &str) -> Option<RawFrame> {
    let mut event_name = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(RawFrame {
        event: event_name,
        data: data_lines.join("\n"),
    })
}

/// Decode a frame into an event; malformed frames are logged and dropped.
///
/// The discriminator comes from the JSON `event` field, falling back to the
/// SSE `event:` line.
pub fn decode_event(frame: &RawFrame) -> Option<ExecutionEvent> {
    let mut payload: Value = match serde_json::from_str(&frame.data) {
        Ok(value) => value,
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, data = %frame.data, "dropping malformed SSE frame");
            return None;
        }
    };
    if let Value::Object(map) = &mut payload {
        if !map.contains_key("event") && !frame.event.is_empty() {
            map.insert("event".to_string(), Value::String(frame.event.clone()));
        }
    }
    match serde_json::from_value::<ExecutionEvent>(payload) {
        Ok(event) => Some(event),
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, data = %frame.data, "dropping unrecognized SSE event");
            None
        }
    }
}

/// Streaming handle over execution events.
///
/// Yields events in arrival order. A transport failure yields one `Err` and
/// ends the stream. The finish hook runs once, when the terminal event is
/// yielded, the body ends, the stream fails or it is cancelled.
#[cfg(feature = "streaming")]
pub struct ExecutionStream {
    request_id: Option<String>,
    stream: Pin<Box<dyn Stream<Item = Result<ExecutionEvent>> + Send>>,
    cancelled: Arc<AtomicBool>,
}

#[cfg(feature = "streaming")]
pub(crate) type FinishHook = Box<dyn FnOnce() + Send>;

#[cfg(feature = "streaming")]
impl ExecutionStream {
    pub(crate) fn new(response: reqwest::Response, on_finish: FinishHook) -> Self {
        let request_id = request_id_from_headers(response.headers());
        let cancelled = Arc::new(AtomicBool::new(false));
        let stream = build_stream(response.bytes_stream(), cancelled.clone(), on_finish);
        Self {
            request_id,
            stream: Box::pin(stream),
            cancelled,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Stop yielding events; the connection is dropped with the handle.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "streaming")]
impl fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("request_id", &self.request_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "streaming")]
impl Drop for ExecutionStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(feature = "streaming")]
impl Stream for ExecutionStream {
    type Item = Result<ExecutionEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

#[cfg(feature = "streaming")]
struct StreamState<B> {
    body: B,
    decoder: SseDecoder,
    pending: VecDeque<ExecutionEvent>,
    cancelled: Arc<AtomicBool>,
    on_finish: Option<FinishHook>,
    done: bool,
}

#[cfg(feature = "streaming")]
impl<B> StreamState<B> {
    fn finish(&mut self) {
        self.done = true;
        if let Some(hook) = self.on_finish.take() {
            hook();
        }
    }
}

#[cfg(feature = "streaming")]
fn build_stream<B, C>(
    body: B,
    cancelled: Arc<AtomicBool>,
    on_finish: FinishHook,
) -> impl Stream<Item = Result<ExecutionEvent>> + Send
where
    B: Stream<Item = reqwest::Result<C>> + Unpin + Send + 'static,
    C: AsRef<[u8]>,
{
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        cancelled,
        on_finish: Some(on_finish),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.cancelled.load(Ordering::SeqCst) {
                state.finish();
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                if event.is_terminal() {
                    state.finish();
                }
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(chunk.as_ref()) {
                    Ok(frames) => {
                        for frame in frames {
                            state.pending.extend(decode_event(&frame));
                        }
                    }
                    Err(error) => {
                        state.pending.clear();
                        state.finish();
                        return Some((Err(error), state));
                    }
                },
                Some(Err(err)) => {
                    state.pending.clear();
                    state.finish();
                    let error = Error::Transport(TransportError::from_reqwest(err));
                    return Some((Err(error), state));
                }
                None => {
                    if let Some(frame) = state.decoder.finish() {
                        state.pending.extend(decode_event(&frame));
                    }
                    state.finish();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_START: &[u8] = b"data: {\"event\":\"node_start\",\"node_id\":\"n1\",\"node_type\":\"X\"}\n\n";

    #[test]
    fn frame_split_at_every_boundary_yields_one_event() {
        for split in 1..NODE_START.len() {
            let mut decoder = SseDecoder::new();
            let mut frames = decoder.push(&NODE_START[..split]).unwrap();
            frames.extend(decoder.push(&NODE_START[split..]).unwrap());
            assert_eq!(frames.len(), 1, "split at {split}");
            let event = decode_event(&frames[0]).unwrap();
            assert_eq!(
                event,
                ExecutionEvent::NodeStart {
                    node_id: "n1".into(),
                    node_type: "X".into()
                }
            );
        }
    }

    #[test]
    fn split_multibyte_characters_survive() {
        let frame = "data: {\"event\":\"node_error\",\"node_id\":\"n\",\"error\":\"caf\u{e9} \u{1f525}\"}\n\n";
        let bytes = frame.as_bytes();
        let cut = frame.find('\u{1f525}').unwrap() + 2;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..cut]).unwrap().is_empty());
        let frames = decoder.push(&bytes[cut..]).unwrap();
        let Some(ExecutionEvent::NodeError { error, .. }) = decode_event(&frames[0]) else {
            panic!("expected node_error");
        };
        assert_eq!(error, "caf\u{e9} \u{1f525}");
    }

    #[test]
    fn several_frames_in_one_chunk_and_crlf() {
        let mut decoder = SseDecoder::new();
        let frames = decoder
            .push(b": keep-alive\r\n\r\ndata: {\"event\":\"workflow_start\"}\r\n\r\ndata: {\"event\":\"workflow_error\",\"error\":\"boom\"}\r\n\r\n")
            .unwrap();
        let events: Vec<_> = frames.iter().filter_map(decode_event).collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ExecutionEvent::WorkflowStart { .. }));
        assert!(events[1].is_terminal());
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: {not json\n\ndata: {\"event\":\"mystery\"}\n\ndata: {\"event\":\"node_start\",\"node_id\":\"a\"}\n\n").unwrap();
        assert_eq!(frames.len(), 3);
        let events: Vec<_> = frames.iter().filter_map(decode_event).collect();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn event_line_supplies_missing_discriminator() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: node_complete\ndata: {\"node_id\":\"t\",\"outputs\":{\"text\":\"hi\"}}\n\n").unwrap();
        let Some(ExecutionEvent::NodeComplete { outputs, .. }) = decode_event(&frames[0]) else {
            panic!("expected node_complete");
        };
        assert_eq!(outputs.get("text"), Some(&Value::String("hi".into())));
    }

    #[test]
    fn trailing_frame_without_separator_is_flushed() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"event\":\"workflow_complete\"}").unwrap().is_empty());
        assert!(decoder.has_pending());
        let frame = decoder.finish().unwrap();
        assert!(matches!(
            decode_event(&frame),
            Some(ExecutionEvent::WorkflowComplete { success: true, .. })
        ));
        assert!(!decoder.has_pending());
    }
    #[test]
    fn oversized_unterminated_frame_is_rejected() {
        let mut decoder = SseDecoder::with_limit(32);
        let frames = decoder
            .push(b"data: {\"event\":\"workflow_start\"}\n\ndata: {\"event\":")
            .unwrap();
        assert_eq!(frames.len(), 1);

        let err = decoder.push(&[b'x'; 64]).unwrap_err();
        assert!(matches!(err, Error::StreamProtocol { .. }));
        assert!(!decoder.has_pending());

        // The decoder stays usable after dropping the oversized frame.
        let frames = decoder.push(b"\n\ndata: {\"event\":\"workflow_start\"}\n\n").unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[cfg(feature = "streaming")]
    mod streaming {
        use super::super::*;
        use std::sync::atomic::AtomicUsize;

        fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = reqwest::Result<&'static [u8]>> + Unpin + Send {
            stream::iter(chunks.iter().copied().map(Ok).collect::<Vec<_>>())
        }

        fn counting_hook(calls: &Arc<AtomicUsize>) -> FinishHook {
            let calls = calls.clone();
            Box::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        }

        #[tokio::test]
        async fn finish_hook_runs_once_at_terminal_event() {
            let calls = Arc::new(AtomicUsize::new(0));
            let mut events = Box::pin(build_stream(
                body(&[
                    b"data: {\"event\":\"node_start\",\"node_id\":\"a\"}\n\n",
                    b"data: {\"event\":\"workflow_complete\"}\n\n",
                ]),
                Arc::new(AtomicBool::new(false)),
                counting_hook(&calls),
            ));

            assert!(matches!(events.next().await, Some(Ok(ExecutionEvent::NodeStart { .. }))));
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            assert!(matches!(events.next().await, Some(Ok(ExecutionEvent::WorkflowComplete { .. }))));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(events.next().await.is_none());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn finish_hook_runs_when_body_ends_early() {
            let calls = Arc::new(AtomicUsize::new(0));
            let collected: Vec<_> = build_stream(
                body(&[b"data: {\"event\":\"node_start\",\"node_id\":\"a\"}\n\n"]),
                Arc::new(AtomicBool::new(false)),
                counting_hook(&calls),
            )
            .collect()
            .await;
            assert_eq!(collected.len(), 1);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
