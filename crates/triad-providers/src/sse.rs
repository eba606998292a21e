//! Generic SSE (Server-Sent Events) line parser.
//!
//! Converts any byte stream (usually `reqwest::Response::bytes_stream`) into a
//! `Stream<Item = SseEvent>`. Lines are split on raw bytes so multi-byte UTF-8
//! sequences that straddle chunk boundaries decode correctly.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

use crate::error::ProviderError;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

struct SseState {
    byte_stream: ByteStream,
    buffer: Vec<u8>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
    exhausted: bool,
}

impl SseState {
    fn take_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            self.current_id = None;
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }

    /// Apply one line; returns an event when the line dispatches one.
    fn apply_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("event:") {
            self.current_event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.current_data.push(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            self.current_id = Some(value.trim_start().to_string());
        }
        None
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
        Some(line.trim_end_matches('\r').to_string())
    }
}

/// Parse a byte stream as SSE.
pub fn parse_sse_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + 'static,
{
    let byte_stream: ByteStream = Box::pin(byte_stream.map(|r| r.map_err(|e| e.to_string())));

    futures::stream::unfold(
        SseState {
            byte_stream,
            buffer: Vec::new(),
            current_event: None,
            current_data: Vec::new(),
            current_id: None,
            exhausted: false,
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.next_line() {
                    if let Some(event) = state.apply_line(&line) {
                        return Some((Ok(event), state));
                    }
                    continue;
                }

                if state.exhausted {
                    return None;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.exhausted = true;
                        return Some((Err(ProviderError::Stream(e)), state));
                    }
                    None => {
                        // Stream ended: flush a trailing unterminated line, then
                        // any event still being assembled.
                        state.exhausted = true;
                        if !state.buffer.is_empty() {
                            let rest = std::mem::take(&mut state.buffer);
                            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
                            state.apply_line(&line);
                        }
                        return state.take_event().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

/// Parse a `reqwest::Response` body as SSE.
pub fn parse_sse_response(
    response: reqwest::Response,
) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send {
    parse_sse_stream(response.bytes_stream())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: &[&'static [u8]]) -> Vec<Result<SseEvent, ProviderError>> {
        let stream = futures::stream::iter(
            chunks
                .iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        );
        parse_sse_stream(stream).collect().await
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let events = collect(&[
            b"event: message\nda".as_slice(),
            b"ta: {\"a\":1}\n\n".as_slice(),
            b"data: second\n\n".as_slice(),
        ])
        .await;
        assert_eq!(events.len(), 2);
        let first = events[0].as_ref().unwrap();
        assert_eq!(first.event.as_deref(), Some("message"));
        assert_eq!(first.data, r#"{"a":1}"#);
        assert_eq!(events[1].as_ref().unwrap().data, "second");
        assert!(events[1].as_ref().unwrap().event.is_none());
    }

    #[tokio::test]
    async fn test_multiline_data_comments_and_crlf() {
        let events = collect(&[b": keep-alive\r\nid: 7\r\ndata: one\r\ndata: two\r\n\r\n".as_slice()]).await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.data, "one\ntwo");
        assert_eq!(event.id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_trailing_event_flushed_at_end() {
        let events = collect(&[b"data: [DONE]".as_slice()]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "[DONE]");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let events = collect(&[b"data: caf\xC3".as_slice(), b"\xA9\n\n".as_slice()]).await;
        assert_eq!(events[0].as_ref().unwrap().data, "café");
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: ok\n\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ]);
        let events: Vec<_> = parse_sse_stream(stream).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        match &events[1] {
            Err(ProviderError::Stream(msg)) => assert!(msg.contains("connection reset")),
            other => panic!("expected stream error, got {other:?}"),
        }
    }
}
