//! Server-Sent Events decoding
//!
//! [`SseDecoder`] is the pure line-level state machine; [`SseStream`] drives it
//! from a byte stream, decodes each event payload as JSON and honours
//! cancellation between reads.

use crate::classifier::{classify_stream_error, truncate, ErrorContext};
use crate::errors::ProviderError;
use bytes::Bytes;
use futures_util::Stream;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// End-of-stream sentinel payload
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseState {
    ReadingLine,
    AccumulatingData,
    EventComplete,
    StreamDone,
}

/// A completed event as seen by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    Done,
}

/// Incremental SSE line decoder
///
/// Raw bytes are buffered and split on `\n` before any UTF-8 decoding, so a
/// multi-byte character split across network reads is reassembled intact.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending: Option<String>,
    state: SseState,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            pending: None,
            state: SseState::ReadingLine,
        }
    }

    pub fn state(&self) -> SseState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == SseState::StreamDone
    }

    /// Feed one network read, returning every event it completed
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.is_done() {
            return frames;
        }

        self.buffer.extend_from_slice(bytes);
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(frame) = self.process_line(trim_line_ending(&line)) {
                frames.push(frame);
                if self.is_done() {
                    self.buffer.clear();
                    break;
                }
            }
        }
        frames
    }

    /// Flush at end of body: an unterminated last line and a pending payload
    /// without its blank line still count
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.is_done() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            if let Some(frame) = self.process_line(trim_line_ending(&rest)) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if self.state == SseState::EventComplete {
            self.state = SseState::ReadingLine;
        }
        // Comment / keep-alive
        if line[0] == b':' {
            return None;
        }

        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&line[..], ""),
        };

        // event, id and retry carry nothing the adapters need
        if field == "data" {
            match self.pending.as_mut() {
                Some(pending) => {
                    pending.push('\n');
                    pending.push_str(value);
                }
                None => self.pending = Some(value.to_string()),
            }
            self.state = SseState::AccumulatingData;
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let payload = match self.pending.take() {
            Some(payload) => payload,
            None => {
                self.state = SseState::ReadingLine;
                return None;
            }
        };

        if payload.trim() == DONE_MARKER {
            self.state = SseState::StreamDone;
            Some(SseFrame::Done)
        } else {
            self.state = SseState::EventComplete;
            Some(SseFrame::Data(payload))
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Lazy stream of JSON events decoded from an SSE body
pub struct SseStream<S, T> {
    inner: Option<S>,
    decoder: SseDecoder,
    ready: VecDeque<T>,
    context: ErrorContext,
    cancel: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

// Decoded events are never pinned
impl<S: Unpin, T> Unpin for SseStream<S, T> {}

impl<S, T, E> SseStream<S, T>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    T: DeserializeOwned,
{
    pub fn new(inner: S, context: ErrorContext, cancel: CancellationToken) -> Self {
        Self {
            inner: Some(inner),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            context,
            cancel: Box::pin(cancel.cancelled_owned()),
            finished: false,
            _marker: PhantomData,
        }
    }

    fn accept(&mut self, frame: SseFrame) {
        let SseFrame::Data(payload) = frame else {
            return;
        };
        match serde_json::from_str::<T>(&payload) {
            Ok(event) => self.ready.push_back(event),
            Err(e) => {
                tracing::warn!(
                    provider = %self.context.provider,
                    model = %self.context.model,
                    error = %e,
                    payload = %truncate(&payload, 200),
                    "Dropping malformed SSE event"
                );
            }
        }
    }

    fn close(&mut self) {
        self.inner = None;
        self.finished = true;
    }
}

/// SSE stream over a response body
pub type ResponseSseStream<T> =
    SseStream<Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>, T>;

/// Wrap a streaming response in an SSE decoder
pub fn new_sse_parser<T>(
    response: reqwest::Response,
    context: ErrorContext,
    cancel: CancellationToken,
) -> ResponseSseStream<T>
where
    T: DeserializeOwned,
{
    SseStream::new(Box::pin(response.bytes_stream()), context, cancel)
}

impl<S, T, E> Stream for SseStream<S, T>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    T: DeserializeOwned,
{
    type Item = Result<T, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if !this.finished && this.cancel.as_mut().poll(cx).is_ready() {
                tracing::debug!(
                    provider = %this.context.provider,
                    model = %this.context.model,
                    "Stream cancelled by caller, releasing connection"
                );
                this.ready.clear();
                this.close();
                return Poll::Ready(Some(Err(ProviderError::cancelled())));
            }

            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            let Some(inner) = this.inner.as_mut() else {
                this.finished = true;
                continue;
            };

            match Pin::new(inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    for frame in this.decoder.feed(&bytes) {
                        this.accept(frame);
                    }
                    if this.decoder.is_done() {
                        this.close();
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    let error = classify_stream_error(e, &this.context);
                    this.close();
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    if let Some(frame) = this.decoder.finish() {
                        this.accept(frame);
                    }
                    this.close();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use futures_util::{stream, StreamExt};
    use serde_json::Value;
    use tokio_stream::wrappers::ReceiverStream;

    fn ctx() -> ErrorContext {
        ErrorContext::new("openai", "gpt-4o")
    }

    fn byte_stream(
        parts: Vec<&'static str>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    // ==================== Decoder ====================

    #[test]
    fn test_decoder_single_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"a\":1}\n\n");
        assert_eq!(frames, vec![SseFrame::Data("{\"a\":1}".to_string())]);
        assert_eq!(decoder.state(), SseState::EventComplete);
    }

    #[test]
    fn test_decoder_event_split_across_reads() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"da").is_empty());
        assert!(decoder.feed(b"ta: {\"a\"").is_empty());
        assert_eq!(decoder.state(), SseState::ReadingLine);
        assert!(decoder.feed(b":1}\n").is_empty());
        assert_eq!(decoder.state(), SseState::AccumulatingData);
        assert_eq!(
            decoder.feed(b"\n"),
            vec![SseFrame::Data("{\"a\":1}".to_string())]
        );
    }

    #[test]
    fn test_decoder_reassembles_split_utf8() {
        let text = "data: {\"c\":\"héllo\"}\n\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&text[..split]).is_empty());
        let frames = decoder.feed(&text[split..]);
        assert_eq!(frames, vec![SseFrame::Data("{\"c\":\"héllo\"}".to_string())]);
    }

    #[test]
    fn test_decoder_tolerates_crlf_and_ignores_metadata() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(
            b": keep-alive\r\nevent: message_start\r\nid: 7\r\nretry: 1000\r\ndata: {}\r\n\r\n",
        );
        assert_eq!(frames, vec![SseFrame::Data("{}".to_string())]);
    }

    #[test]
    fn test_decoder_joins_multiple_data_lines() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"a\":\ndata: 1}\n\n");
        assert_eq!(frames, vec![SseFrame::Data("{\"a\":\n1}".to_string())]);
    }

    #[test]
    fn test_decoder_done_stops_processing() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: [DONE]\n\ndata: {}\n\n");
        assert_eq!(frames, vec![SseFrame::Done]);
        assert!(decoder.is_done());
        assert!(decoder.feed(b"data: {}\n\n").is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_flushes_unterminated_payload() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"last\":true}").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(SseFrame::Data("{\"last\":true}".to_string()))
        );
    }

    #[test]
    fn test_decoder_blank_lines_without_data_emit_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\n\nevent: ping\n\n").is_empty());
        assert_eq!(decoder.state(), SseState::ReadingLine);
    }

    // ==================== Stream ====================

    #[tokio::test]
    async fn test_stream_yields_one_item_per_event() {
        let body = byte_stream(vec![
            "data: {\"n\":1}\n\n",
            "data: {\"n\":2}\n\ndata: {\"n\"",
            ":3}\n\n",
            "data: [DONE]\n\n",
        ]);
        let items: Vec<_> = SseStream::<_, Value>::new(body, ctx(), CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        for (i, item) in items.into_iter().enumerate() {
            assert_eq!(item.unwrap()["n"], i as u64 + 1);
        }
    }

    #[tokio::test]
    async fn test_stream_drops_malformed_event() {
        let body = byte_stream(vec![
            "data: {\"n\":1}\n\n",
            "data: {not json\n\n",
            "data: {\"n\":2}\n\n",
            "data: [DONE]\n\n",
        ]);
        let items: Vec<_> = SseStream::<_, Value>::new(body, ctx(), CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.is_ok()));
    }

    #[tokio::test]
    async fn test_stream_without_done_marker_ends_at_eof() {
        let body = byte_stream(vec!["data: {\"n\":1}\n\n", "data: {\"n\":2}"]);
        let items: Vec<_> = SseStream::<_, Value>::new(body, ctx(), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_transport_error_terminates() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"n\":1}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout")),
            Ok(Bytes::from_static(b"data: {\"n\":2}\n\n")),
        ]);
        let mut sse = SseStream::<_, Value>::new(body, ctx(), CancellationToken::new());

        assert!(sse.next().await.unwrap().is_ok());
        let err = sse.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.message().contains("timed out"));
        assert!(sse.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_cancellation_releases_body() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
        let cancel = CancellationToken::new();
        let mut sse = SseStream::<_, Value>::new(ReceiverStream::new(rx), ctx(), cancel.clone());

        tx.send(Ok(Bytes::from_static(b"data: {\"n\":1}\n\n")))
            .await
            .unwrap();
        assert_eq!(sse.next().await.unwrap().unwrap()["n"], 1);

        cancel.cancel();
        let err = sse.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(sse.next().await.is_none());
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_stream_cancellation_wakes_pending_read() {
        let (_tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
        let cancel = CancellationToken::new();
        let mut sse = SseStream::<_, Value>::new(ReceiverStream::new(rx), ctx(), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let item = tokio::time::timeout(std::time::Duration::from_secs(2), sse.next())
            .await
            .expect("cancellation should wake the stream");
        assert!(item.unwrap().unwrap_err().is_cancelled());
    }
}
