//! In-memory stream manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::{ChunkEvent, StreamError, StreamHandle, StreamManager};
use crate::llm::{ChatRequest, ChatStream, ModelHandle, StreamEvent};

/// Stream manager keeping every handle in process memory.
pub struct InMemoryStreamManager {
    streams: DashMap<String, StreamHandle>,
    /// Maximum wait for the next upstream event.
    idle_timeout: Duration,
    /// SSE keep-alive interval for responses.
    keep_alive: Duration,
    /// How long finished streams remain fetchable.
    retention: Duration,
}

impl InMemoryStreamManager {
    pub fn new(idle_timeout: Duration, keep_alive: Duration, retention: Duration) -> Self {
        Self {
            streams: DashMap::new(),
            idle_timeout,
            keep_alive,
            retention,
        }
    }

    /// Number of tracked streams, running or finished.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Register a fresh handle under `id`, stopping any stream it replaces.
    async fn register(&self, id: &str) -> StreamHandle {
        let handle = StreamHandle::new(id, self.keep_alive);

        if let Some(previous) = self.streams.insert(id.to_string(), handle.clone()) {
            debug!(conversation_id = %id, "replacing existing stream");
            previous.stop().await;
        }
        handle
    }

    /// Register a handle fed by `upstream`, stopping any stream it replaces.
    pub async fn attach(&self, id: &str, upstream: ChatStream) -> StreamHandle {
        let handle = self.register(id).await;
        tokio::spawn(pump(handle.clone(), upstream, self.idle_timeout));
        handle
    }

    /// Drop finished streams older than the retention window.
    pub fn cleanup_finished(&self) -> usize {
        let now = Utc::now();
        let retention = self.retention;
        let before = self.streams.len();

        self.streams.retain(|_, handle| match handle.finished_at() {
            Some(finished_at) => (now - finished_at)
                .to_std()
                .map(|age| age < retention)
                .unwrap_or(true),
            None => true,
        });

        let removed = before.saturating_sub(self.streams.len());
        if removed > 0 {
            debug!(removed, "evicted finished streams");
        }
        removed
    }
}

#[async_trait]
impl StreamManager for InMemoryStreamManager {
    async fn get_stream(&self, id: &str) -> Option<StreamHandle> {
        self.streams.get(id).map(|entry| entry.value().clone())
    }

    async fn stop_stream(&self, id: &str) {
        // Release the map guard before awaiting on the handle.
        let removed = self.streams.remove(id);
        if let Some((_, handle)) = removed {
            handle.stop().await;
            info!(conversation_id = %id, "stream stopped");
        }
    }

    async fn start_stream(
        &self,
        id: &str,
        model: ModelHandle,
        request: ChatRequest,
    ) -> Result<StreamHandle, StreamError> {
        // Registered before connecting so a stop issued meanwhile is seen.
        let handle = self.register(id).await;
        let cancel = handle.cancellation();

        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conversation_id = %id, "stream stopped while connecting");
                return Ok(handle);
            }
            connected = model.chat_stream(request) => connected,
        };

        let upstream = match connected {
            Ok(upstream) => upstream,
            Err(e) => {
                handle.push(ChunkEvent::error(e.to_string())).await;
                self.streams
                    .remove_if(id, |_, current| current.message_id() == handle.message_id());
                return Err(e.into());
            }
        };

        info!(
            conversation_id = %id,
            provider = %model.provider(),
            model = model.model_id(),
            "stream started"
        );
        tokio::spawn(pump(handle.clone(), upstream, self.idle_timeout));
        Ok(handle)
    }
}

/// Forward upstream events into `handle` until a terminal event or cancellation.
async fn pump(handle: StreamHandle, upstream: ChatStream, idle_timeout: Duration) {
    let cancel = handle.cancellation();
    let upstream = upstream.timeout(idle_timeout);
    tokio::pin!(upstream);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conversation_id = %handle.id(), "stream producer cancelled");
                return;
            }
            next = upstream.next() => next,
        };

        let event = match next {
            Some(Ok(Ok(StreamEvent::Token(content)))) => ChunkEvent::Token { content },
            Some(Ok(Ok(StreamEvent::Done { usage }))) => ChunkEvent::Done {
                message_id: handle.message_id().to_string(),
                usage,
            },
            Some(Ok(Err(e))) => {
                warn!(conversation_id = %handle.id(), error = %e, "upstream stream failed");
                ChunkEvent::error(e.to_string())
            }
            Some(Err(_elapsed)) => {
                warn!(conversation_id = %handle.id(), "upstream stream idle timeout");
                ChunkEvent::error("Stream idle timeout")
            }
            None => ChunkEvent::Done {
                message_id: handle.message_id().to_string(),
                usage: None,
            },
        };

        let terminal = event.is_terminal();
        handle.push(event).await;
        if terminal {
            break;
        }
    }

    info!(conversation_id = %handle.id(), "stream finished");
}

/// Spawn a periodic cleanup task. Returns its handle for shutdown.
pub fn spawn_cleanup_task(
    manager: Arc<InMemoryStreamManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            manager.cleanup_finished();
        }
    })
}
