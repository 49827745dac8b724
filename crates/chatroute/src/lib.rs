//! chatroute - routes chat requests to a configured LLM provider and streams
//! responses back to browser clients.

pub mod config;
pub mod handlers;
pub mod llm;
pub mod model;
pub mod response;
pub mod server;
pub mod sse_parser;
pub mod stream;
