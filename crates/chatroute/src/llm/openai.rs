//! OpenAI-compatible LLM provider.
//!
//! Works with OpenAI, OpenRouter, and other compatible APIs. Only the
//! streaming Chat Completions endpoint is used.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;

use super::error::{LLMError, error_from_response};
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatStream, Message, StreamEvent, Usage};
use crate::sse_parser::SseEventStream;

/// OpenAI-compatible provider (works for OpenAI and OpenRouter).
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    headers: Vec<(String, String)>,
}

impl OpenAICompatibleProvider {
    #[must_use]
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
            headers: Vec::new(),
        }
    }

    /// Attach extra headers sent with every request.
    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    fn build_request<T: serde::Serialize>(&self, body: &T) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        req.json(body)
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let stream_request = StreamRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let response = self.build_request(&stream_request).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let sse_stream = SseEventStream::new(response.bytes_stream());
        Ok(Box::pin(OpenAIStreamAdapter::new(sse_stream)))
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(serde::Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(serde::Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<StreamChunkError>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(serde::Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamChunkError {
    message: String,
}

/// Adapter from SSE events to [`StreamEvent`]s for the Chat Completions format.
struct OpenAIStreamAdapter<S> {
    inner: SseEventStream<S>,
    usage: Option<Usage>,
    done: bool,
}

impl<S> OpenAIStreamAdapter<S> {
    fn new(inner: SseEventStream<S>) -> Self {
        Self {
            inner,
            usage: None,
            done: false,
        }
    }
}

impl<S> Stream for OpenAIStreamAdapter<S>
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
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        self.done = true;
                        let usage = self.usage.take();
                        return Poll::Ready(Some(Ok(StreamEvent::Done { usage })));
                    }

                    // Unparseable chunks (vendor extensions, comments) are skipped.
                    let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
                        continue;
                    };
                    if let Some(err) = chunk.error {
                        self.done = true;
                        return Poll::Ready(Some(Err(LLMError::Stream(err.message))));
                    }
                    if chunk.usage.is_some() {
                        self.usage = chunk.usage;
                    }
                    if let Some(choice) = chunk.choices.into_iter().next()
                        && let Some(content) = choice.delta.content
                        && !content.is_empty()
                    {
                        return Poll::Ready(Some(Ok(StreamEvent::Token(content))));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    let usage = self.usage.take();
                    return Poll::Ready(Some(Ok(StreamEvent::Done { usage })));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
