//! LLM provider clients, provider selection and model handles.

mod anthropic;
mod error;
mod handle;
mod openai;
mod provider;
mod registry;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::LLMError;
pub use handle::ModelHandle;
pub use openai::OpenAICompatibleProvider;
pub use provider::{LLMProvider, Provider, UnknownProvider};
pub use registry::{
    EnvLookup, ModelIds, ProviderConfig, ProviderRegistry, ProviderStatus, config_for,
};
pub use types::{ChatRequest, ChatStream, Message, Role, StreamEvent, Usage};

#[cfg(test)]
pub(crate) use registry::tests::FakeEnv;
