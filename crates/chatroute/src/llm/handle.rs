//! A configured, callable reference to one model on one provider.

use std::fmt;
use std::sync::Arc;

use super::error::LLMError;
use super::provider::{LLMProvider, Provider};
use super::types::{ChatRequest, ChatStream};

/// A model id bound to a provider client, its endpoint and credentials.
///
/// Cloning is cheap; the underlying HTTP client is shared.
#[derive(Clone)]
pub struct ModelHandle {
    provider: Provider,
    model_id: String,
    base_url: String,
    headers: Vec<(String, String)>,
    client: Arc<dyn LLMProvider>,
}

impl ModelHandle {
    pub fn new(
        provider: Provider,
        model_id: impl Into<String>,
        base_url: impl Into<String>,
        client: Arc<dyn LLMProvider>,
    ) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            base_url: base_url.into(),
            headers: Vec::new(),
            client,
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Extra request headers sent to the provider (excluding auth).
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Look up an extra header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub async fn chat_stream(&self, mut request: ChatRequest) -> Result<ChatStream, LLMError> {
        request.model = self.model_id.clone();
        self.client.chat_stream(request).await
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
