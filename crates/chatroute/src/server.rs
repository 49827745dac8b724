use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::model::AppContext;
use crate::stream::StreamManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub context: AppContext,
    pub streams: Arc<dyn StreamManager>,
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api = Router::new()
        .route("/provider", get(handlers::provider_status))
        .route(
            "/chat/{id}/stream",
            get(handlers::get_stream)
                .post(handlers::start_stream)
                .delete(handlers::stop_stream),
        );

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api", api)
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}
