//! In-flight chat streams keyed by conversation id.

mod handle;
mod manager;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{ChatRequest, LLMError, ModelHandle, Usage};

pub use handle::StreamHandle;
pub use manager::{InMemoryStreamManager, spawn_cleanup_task};

/// Access to in-flight streams, injected into the HTTP layer.
#[async_trait]
pub trait StreamManager: Send + Sync {
    /// Current stream for a conversation, if any.
    async fn get_stream(&self, id: &str) -> Option<StreamHandle>;

    /// Stop and forget the stream for a conversation. Missing ids are a no-op.
    async fn stop_stream(&self, id: &str);

    /// Open a model stream for a conversation, replacing any existing one.
    async fn start_stream(
        &self,
        id: &str,
        model: ModelHandle,
        request: ChatRequest,
    ) -> Result<StreamHandle, StreamError>;
}

/// Errors raised when starting a stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] LLMError),
}

/// One event recorded on a stream, replayed to every subscriber in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    Token {
        content: String,
    },
    Done {
        message_id: String,
        usage: Option<Usage>,
    },
    Error {
        message: String,
    },
}

impl ChunkEvent {
    pub fn token(content: impl Into<String>) -> Self {
        ChunkEvent::Token {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ChunkEvent::Error {
            message: message.into(),
        }
    }

    /// `Done` and `Error` end a stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChunkEvent::Token { .. })
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ChunkEvent::Token { .. } => "token",
            ChunkEvent::Done { .. } => "done",
            ChunkEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_token_is_non_terminal() {
        assert!(!ChunkEvent::token("x").is_terminal());
        assert!(ChunkEvent::error("boom").is_terminal());
        assert!(
            ChunkEvent::Done {
                message_id: "msg_1".to_string(),
                usage: None
            }
            .is_terminal()
        );
    }

    #[test]
    fn sse_names() {
        assert_eq!(ChunkEvent::token("hi").name(), "token");
        assert_eq!(ChunkEvent::error("x").name(), "error");
    }
}
