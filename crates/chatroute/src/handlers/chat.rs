//! Chat stream HTTP handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::llm::{ChatRequest, Message, Provider};
use crate::response;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct StartStreamRequest {
    messages: Vec<Message>,
    /// Use this provider instead of the startup default.
    #[serde(default)]
    provider: Option<Provider>,
    /// Use the provider's fallback model.
    #[serde(default)]
    fallback: bool,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

/// GET /api/chat/{id}/stream
///
/// Returns the in-flight stream for the conversation, or an empty 200 when
/// there is none.
pub async fn get_stream(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    info!(conversation_id = %id, "GET stream");

    match state.streams.get_stream(&id).await {
        Some(stream) => stream.response(),
        None => Response::default(),
    }
}

/// DELETE /api/chat/{id}/stream
pub async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.streams.stop_stream(&id).await;

    (
        StatusCode::NO_CONTENT,
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONTENT_TYPE, "text/plain"),
        ],
    )
}

/// POST /api/chat/{id}/stream
///
/// Starts a model stream for the conversation and returns it as SSE.
///
/// Events emitted:
/// - `start`: `{}`
/// - `token`: `{"content": "..."}`
/// - `done`: `{"message_id": "msg_...", "usage": {...}}`
/// - `error`: `{"message": "..."}`
pub async fn start_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StartStreamRequest>,
) -> Response {
    if req.messages.is_empty() {
        return response::bad_request("messages must not be empty").into_response();
    }

    let model = state.context.create_model(req.provider, req.fallback);

    let setup = state
        .context
        .registry()
        .validate_provider_setup(Some(model.provider()));
    if let Some(message) = setup.error {
        warn!(conversation_id = %id, provider = %model.provider(), "{message}");
        return response::service_unavailable(message).into_response();
    }

    let mut request = ChatRequest::from_messages(req.messages);
    request.temperature = req.temperature;
    request.max_tokens = req.max_tokens;

    match state.streams.start_stream(&id, model, request).await {
        Ok(stream) => stream.response(),
        Err(e) => {
            error!(conversation_id = %id, error = %e, "failed to start stream");
            response::bad_gateway(e.to_string()).into_response()
        }
    }
}
