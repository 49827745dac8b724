//! Incremental parser for `text/event-stream` response bodies.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use crate::llm::LLMError;

/// A single server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// Concatenated `data:` lines, joined by `\n`.
    pub data: String,
}

/// Stream adapter turning raw body chunks into [`SseEvent`]s.
///
/// Chunk boundaries may fall anywhere, including inside a UTF-8 sequence,
/// so bytes are buffered until a full line is available.
pub struct SseEventStream<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: SseEvent,
    has_pending: bool,
    done: bool,
}

impl<S> SseEventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pending: SseEvent::default(),
            has_pending: false,
            done: false,
        }
    }

    /// Consume one line from the buffer. Returns a completed event on a blank line.
    fn next_line(&mut self) -> Option<Option<SseEvent>> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        let line = String::from_utf8_lossy(&line);
        Some(self.apply_line(&line))
    }

    fn apply_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_pending();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.pending.event = Some(value.to_string());
                self.has_pending = true;
            }
            "data" => {
                if !self.pending.data.is_empty() {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_pending = true;
            }
            _ => {}
        }
        None
    }

    fn take_pending(&mut self) -> Option<SseEvent> {
        if !self.has_pending {
            return None;
        }
        self.has_pending = false;
        Some(std::mem::take(&mut self.pending))
    }
}

impl<S> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<SseEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            while let Some(line) = self.next_line() {
                if let Some(event) = line {
                    return Poll::Ready(Some(Ok(event)));
                }
            }

            if self.done {
                // Flush a trailing line without newline, then any unterminated event.
                if !self.buffer.is_empty() {
                    let rest = std::mem::take(&mut self.buffer);
                    let line = String::from_utf8_lossy(&rest).into_owned();
                    let line = line.trim_end_matches('\r');
                    if !line.is_empty() {
                        self.apply_line(line);
                    }
                }
                return Poll::Ready(self.take_pending().map(Ok));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::Request(e))));
                }
                Poll::Ready(None) => self.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Unpin {
        let items: Vec<Result<Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        futures::stream::iter(items)
    }

    async fn collect(parts: &[&str]) -> Vec<SseEvent> {
        SseEventStream::new(chunks(parts))
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn parses_named_events() {
        let events = collect(&["event: ping\ndata: {}\n\nevent: message_stop\ndata: {\"a\":1}\n\n"]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert_eq!(events[1].data, "{\"a\":1}");
    }

    #[tokio::test]
    async fn joins_events_split_across_chunks() {
        let events = collect(&["da", "ta: hel", "lo\r\n", "\r\n"]).await;
        assert_eq!(events, vec![SseEvent {
            event: None,
            data: "hello".to_string()
        }]);
    }

    #[tokio::test]
    async fn joins_multiline_data_and_skips_comments() {
        let events = collect(&[": keep-alive\n\ndata: a\ndata: b\n\n"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
    }

    #[tokio::test]
    async fn flushes_unterminated_event_at_eof() {
        let events = collect(&["data: [DONE]"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "[DONE]");
    }

    #[tokio::test]
    async fn handles_utf8_split_inside_codepoint() {
        let text = "data: héllo\n\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let items: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::copy_from_slice(&text[..split])),
            Ok(Bytes::copy_from_slice(&text[split..])),
        ];
        let events: Vec<_> = SseEventStream::new(futures::stream::iter(items))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(events[0].data, "héllo");
    }
}
