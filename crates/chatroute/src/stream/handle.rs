//! A single replayable chat stream.

use std::convert::Infallible;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use super::ChunkEvent;

/// Shared handle to one conversation's stream.
///
/// Events are buffered for the life of the handle so a client that
/// reconnects mid-stream (or after it finished) sees the full sequence.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    message_id: String,
    created_at: DateTime<Utc>,
    finished_at: OnceLock<DateTime<Utc>>,
    keep_alive: Duration,
    events: Mutex<Vec<ChunkEvent>>,
    notify: Notify,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn new(id: impl Into<String>, keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                message_id: format!("msg_{}", ulid::Ulid::new().to_string().to_lowercase()),
                created_at: Utc::now(),
                finished_at: OnceLock::new(),
                keep_alive,
                events: Mutex::new(Vec::new()),
                notify: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Conversation id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Id of the assistant message this stream produces.
    pub fn message_id(&self) -> &str {
        &self.inner.message_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.inner.finished_at.get().copied()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished_at.get().is_some()
    }

    /// Token cancelled when the stream is stopped.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Append an event and wake subscribers. Ignored once the stream has ended.
    pub async fn push(&self, event: ChunkEvent) {
        {
            let mut events = self.inner.events.lock().await;
            if self.is_finished() {
                return;
            }
            if event.is_terminal() {
                let _ = self.inner.finished_at.set(Utc::now());
            }
            events.push(event);
        }
        self.inner.notify.notify_waiters();
    }

    /// Cancel the producer and end the stream for subscribers.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        self.push(ChunkEvent::error("Stream stopped")).await;
    }

    /// Snapshot of the events recorded so far.
    pub async fn events(&self) -> Vec<ChunkEvent> {
        self.inner.events.lock().await.clone()
    }

    /// Server-sent events response: a `start` event, every recorded event,
    /// then live events until the stream ends.
    pub fn response(&self) -> Response {
        let cursor = Cursor {
            inner: self.inner.clone(),
            next: 0,
            done: false,
        };

        let start = futures::stream::once(async { Event::default().event("start").data("{}") });
        let replay = futures::stream::unfold(cursor, |mut cursor| async move {
            let event = cursor.next_event().await?;
            Some((to_sse(&event), cursor))
        });
        let events = start.chain(replay).map(Ok::<_, Infallible>);

        let keep_alive = KeepAlive::new()
            .interval(self.inner.keep_alive)
            .text("keep-alive");

        Sse::new(events).keep_alive(keep_alive).into_response()
    }
}

/// Read position of one subscriber.
struct Cursor {
    inner: Arc<Inner>,
    next: usize,
    done: bool,
}

impl Cursor {
    async fn next_event(&mut self) -> Option<ChunkEvent> {
        if self.done {
            return None;
        }

        let inner = self.inner.clone();
        loop {
            // Register for wake-up before checking, so a push between the
            // check and the await is not missed.
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let events = inner.events.lock().await;
                if let Some(event) = events.get(self.next) {
                    self.next += 1;
                    self.done = event.is_terminal();
                    return Some(event.clone());
                }
                if inner.finished_at.get().is_some() {
                    self.done = true;
                    return None;
                }
            }

            notified.await;
        }
    }
}

fn to_sse(event: &ChunkEvent) -> Event {
    let data = match event {
        ChunkEvent::Token { content } => json!({ "content": content }),
        ChunkEvent::Done { message_id, usage } => {
            json!({ "message_id": message_id, "usage": usage })
        }
        ChunkEvent::Error { message } => json!({ "message": message }),
    };
    Event::default().event(event.name()).data(data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_text(handle: &StreamHandle) -> String {
        let body = to_bytes(handle.response().into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn done(handle: &StreamHandle) -> ChunkEvent {
        ChunkEvent::Done {
            message_id: handle.message_id().to_string(),
            usage: None,
        }
    }

    #[tokio::test]
    async fn replays_finished_stream_in_order() {
        let handle = StreamHandle::new("app-1", Duration::from_secs(15));
        handle.push(ChunkEvent::token("Hel")).await;
        handle.push(ChunkEvent::token("lo")).await;
        handle.push(done(&handle)).await;

        let body = body_text(&handle).await;
        let start = body.find("event: start").unwrap();
        let first = body.find("{\"content\":\"Hel\"}").unwrap();
        let second = body.find("{\"content\":\"lo\"}").unwrap();
        let end = body.find("event: done").unwrap();
        assert!(start < first && first < second && second < end);
        assert!(body.contains(handle.message_id()));
    }

    #[tokio::test]
    async fn events_after_terminal_are_ignored() {
        let handle = StreamHandle::new("app-1", Duration::from_secs(15));
        handle.push(ChunkEvent::error("boom")).await;
        handle.push(ChunkEvent::token("late")).await;
        assert!(handle.is_finished());
        assert_eq!(handle.events().await, vec![ChunkEvent::error("boom")]);
    }

    #[tokio::test]
    async fn live_subscriber_sees_later_events() {
        let handle = StreamHandle::new("app-2", Duration::from_secs(15));
        handle.push(ChunkEvent::token("a")).await;

        let reader = {
            let handle = handle.clone();
            tokio::spawn(async move { body_text(&handle).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.push(ChunkEvent::token("b")).await;
        handle.push(done(&handle)).await;

        let body = reader.await.unwrap();
        assert!(body.contains("{\"content\":\"a\"}"));
        assert!(body.contains("{\"content\":\"b\"}"));
        assert!(body.contains("event: done"));
    }

    #[tokio::test]
    async fn stop_cancels_and_ends_stream() {
        let handle = StreamHandle::new("app-3", Duration::from_secs(15));
        let token = handle.cancellation();
        handle.stop().await;
        handle.stop().await;

        assert!(token.is_cancelled());
        assert!(handle.finished_at().is_some());
        assert_eq!(handle.events().await, vec![ChunkEvent::error("Stream stopped")]);
        assert!(body_text(&handle).await.contains("Stream stopped"));
    }
}
