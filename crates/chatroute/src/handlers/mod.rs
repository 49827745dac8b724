//! HTTP request handlers.

mod chat;
mod health;
mod provider;
mod version;

pub use chat::{get_stream, start_stream, stop_stream};
pub use health::{livez, readyz};
pub use provider::provider_status;
pub use version::version;
