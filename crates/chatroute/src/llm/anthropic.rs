//! Anthropic LLM provider with native API format.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;

use super::error::{LLMError, error_from_response};
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatStream, Role, StreamEvent, Usage};
use crate::sse_parser::SseEventStream;

/// Anthropic provider with native API format.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    api_version: String,
}

impl AnthropicProvider {
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";
    const DEFAULT_MAX_TOKENS: u32 = 4096;

    #[must_use]
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            api_version: Self::DEFAULT_API_VERSION.to_string(),
        }
    }

    fn build_request(&self, body: &Request) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        self.client
            .post(url)
            .header("Content-Type", "application/json")
            .header("accept", "application/json")
            .header("anthropic-version", &self.api_version)
            .header("x-api-key", &self.api_key)
            .json(body)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let anthropic_request = to_request(&request, Some(true));

        let response = self.build_request(&anthropic_request).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let sse_stream = SseEventStream::new(response.bytes_stream());
        Ok(Box::pin(AnthropicStreamAdapter::new(sse_stream)))
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(serde::Serialize)]
struct Request {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, PartialEq, serde::Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

// ============================================================================
// Conversions
// ============================================================================

fn to_request(request: &ChatRequest, stream: Option<bool>) -> Request {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<RequestMessage> = Vec::new();

    for msg in &request.messages {
        let role = match msg.role {
            Role::System => {
                if !msg.content.is_empty() {
                    system_parts.push(&msg.content);
                }
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        // The Messages API rejects empty content blocks.
        if msg.content.is_empty() {
            continue;
        }

        // The Messages API requires strict user/assistant alternation.
        match messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => messages.push(RequestMessage {
                role,
                content: msg.content.clone(),
            }),
        }
    }

    Request {
        model: request.model.clone(),
        max_tokens: request
            .max_tokens
            .unwrap_or(AnthropicProvider::DEFAULT_MAX_TOKENS),
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        messages,
        temperature: request.temperature,
        stream,
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Adapter that converts SSE events into Anthropic StreamEvents.
struct AnthropicStreamAdapter<S> {
    inner: SseEventStream<S>,
    done: bool,
    usage: Option<Usage>,
    /// Input tokens from message_start event.
    input_tokens: u32,
}

impl<S> AnthropicStreamAdapter<S> {
    fn new(inner: SseEventStream<S>) -> Self {
        Self {
            inner,
            done: false,
            usage: None,
            input_tokens: 0,
        }
    }
}

impl<S> Stream for AnthropicStreamAdapter<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if event.data.is_empty() {
                        continue;
                    }

                    let parsed = match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::debug!(
                                data = %event.data,
                                error = %e,
                                "failed to parse Anthropic SSE event"
                            );
                            continue;
                        }
                    };

                    match parsed {
                        AnthropicStreamEvent::MessageStart { message: Some(msg) } => {
                            if let Some(tokens) =
                                msg.pointer("/usage/input_tokens").and_then(|v| v.as_u64())
                            {
                                self.input_tokens = tokens as u32;
                            }
                        }
                        AnthropicStreamEvent::ContentBlockDelta { delta } => {
                            if let Some(text) = delta.text
                                && !text.is_empty()
                            {
                                return Poll::Ready(Some(Ok(StreamEvent::Token(text))));
                            }
                        }
                        AnthropicStreamEvent::MessageDelta { usage: Some(u) } => {
                            self.usage = Some(Usage {
                                prompt_tokens: self.input_tokens,
                                completion_tokens: u.output_tokens,
                                total_tokens: self.input_tokens + u.output_tokens,
                            });
                        }
                        AnthropicStreamEvent::MessageStop => {
                            self.done = true;
                            return Poll::Ready(Some(Ok(StreamEvent::Done {
                                usage: self.usage.take(),
                            })));
                        }
                        AnthropicStreamEvent::Error { error } => {
                            self.done = true;
                            return Poll::Ready(Some(Err(LLMError::Stream(error.message))));
                        }
                        _ => {}
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(Some(Ok(StreamEvent::Done {
                        usage: self.usage.take(),
                    })));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Anthropic SSE stream events. Only the fields used for text streaming are read.
#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: Option<serde_json::Value>,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        usage: Option<StreamUsage>,
    },
    MessageStop,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(serde::Deserialize)]
struct Delta {
    text: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamUsage {
    output_tokens: u32,
}

#[derive(serde::Deserialize)]
struct StreamError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use bytes::Bytes;
    use futures::StreamExt;

    fn request(messages: Vec<Message>) -> ChatRequest {
        let mut request = ChatRequest::from_messages(messages);
        request.model = "claude-4-sonnet-20250514".to_string();
        request
    }

    #[test]
    fn system_messages_are_lifted_out() {
        let req = to_request(
            &request(vec![
                Message::text(Role::System, "Be brief."),
                Message::text(Role::User, "Hi"),
            ]),
            None,
        );
        assert_eq!(req.system.as_deref(), Some("Be brief."));
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, 4096);
        assert!(req.stream.is_none());
    }

    #[test]
    fn consecutive_same_role_messages_merge() {
        let req = to_request(
            &request(vec![
                Message::text(Role::User, "one"),
                Message::text(Role::User, "two"),
                Message::text(Role::Assistant, "ok"),
                Message::text(Role::User, ""),
            ]),
            Some(true),
        );
        assert_eq!(
            req.messages,
            vec![
                RequestMessage {
                    role: "user",
                    content: "one\n\ntwo".to_string()
                },
                RequestMessage {
                    role: "assistant",
                    content: "ok".to_string()
                },
            ]
        );
        assert_eq!(req.stream, Some(true));
    }

    #[test]
    fn empty_messages_are_dropped() {
        let req = to_request(
            &request(vec![
                Message::text(Role::User, "one"),
                Message::text(Role::Assistant, ""),
                Message::text(Role::User, "two"),
                Message::text(Role::System, ""),
            ]),
            None,
        );
        assert!(req.system.is_none());
        assert_eq!(
            req.messages,
            vec![RequestMessage {
                role: "user",
                content: "one\n\ntwo".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn stream_yields_text_and_usage() {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":7}}}\n\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        let items: Vec<Result<Bytes, reqwest::Error>> =
            vec![Ok(Bytes::copy_from_slice(body.as_bytes()))];
        let events: Vec<StreamEvent> =
            AnthropicStreamAdapter::new(SseEventStream::new(futures::stream::iter(items)))
                .map(|e| e.unwrap())
                .collect()
                .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Hi".to_string()),
                StreamEvent::Done {
                    usage: Some(Usage {
                        prompt_tokens: 7,
                        completion_tokens: 1,
                        total_tokens: 8,
                    }),
                },
            ]
        );
    }
}
